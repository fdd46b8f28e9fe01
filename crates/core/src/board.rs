//! Narrow board capability used by the session engine.
//!
//! The engine never implements chess rules itself: it asks a [`RulesEngine`]
//! for a [`Board`] and talks to it only through legal-move enumeration,
//! play/undo, and check queries. [`ShakmatyEngine`] is the default backend.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Position};
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BoardError {
    #[error("invalid position `{fen}`: {reason}")]
    InvalidPosition { fen: String, reason: String },

    #[error("malformed move `{0}`")]
    MalformedMove(String),

    #[error("illegal move `{0}`")]
    IllegalMove(String),
}

//
// ─── MOVE VOCABULARY ───────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    White,
    Black,
}

impl Side {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

/// Piece a pawn may promote to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromotionPiece {
    Queen,
    Rook,
    Bishop,
    Knight,
}

impl PromotionPiece {
    #[must_use]
    pub fn to_char(self) -> char {
        match self {
            PromotionPiece::Queen => 'q',
            PromotionPiece::Rook => 'r',
            PromotionPiece::Bishop => 'b',
            PromotionPiece::Knight => 'n',
        }
    }

    #[must_use]
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'q' => Some(PromotionPiece::Queen),
            'r' => Some(PromotionPiece::Rook),
            'b' => Some(PromotionPiece::Bishop),
            'n' => Some(PromotionPiece::Knight),
            _ => None,
        }
    }
}

/// A board square such as `e4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Square {
    file: u8,
    rank: u8,
}

impl Square {
    /// `file` and `rank` are zero-based (`a1` is `(0, 0)`).
    #[must_use]
    pub fn new(file: u8, rank: u8) -> Option<Self> {
        (file < 8 && rank < 8).then_some(Self { file, rank })
    }

    #[must_use]
    pub fn file(self) -> u8 {
        self.file
    }

    #[must_use]
    pub fn rank(self) -> u8 {
        self.rank
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", char::from(b'a' + self.file), char::from(b'1' + self.rank))
    }
}

impl FromStr for Square {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return Err(BoardError::MalformedMove(s.to_owned()));
        }
        let file = bytes[0].wrapping_sub(b'a');
        let rank = bytes[1].wrapping_sub(b'1');
        Square::new(file, rank).ok_or_else(|| BoardError::MalformedMove(s.to_owned()))
    }
}

/// A move in coordinate form: origin, destination, optional promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoardMove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PromotionPiece>,
}

impl BoardMove {
    #[must_use]
    pub fn new(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            promotion: None,
        }
    }

    #[must_use]
    pub fn with_promotion(mut self, piece: PromotionPiece) -> Self {
        self.promotion = Some(piece);
        self
    }

    /// UCI spelling, e.g. `e2e4` or `b7b8q`.
    #[must_use]
    pub fn uci(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BoardMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(piece) = self.promotion {
            write!(f, "{}", piece.to_char())?;
        }
        Ok(())
    }
}

impl FromStr for BoardMove {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.is_ascii() || !(4..=5).contains(&s.len()) {
            return Err(BoardError::MalformedMove(s.to_owned()));
        }
        let from: Square = s[0..2].parse()?;
        let to: Square = s[2..4].parse()?;
        let promotion = match s[4..].chars().next() {
            None => None,
            Some(c) => Some(
                PromotionPiece::from_char(c).ok_or_else(|| BoardError::MalformedMove(s.to_owned()))?,
            ),
        };
        Ok(Self {
            from,
            to,
            promotion,
        })
    }
}

/// Result of playing a legal move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayedMove {
    pub mv: BoardMove,
    pub captured: bool,
    pub gives_check: bool,
}

//
// ─── CAPABILITY TRAITS ─────────────────────────────────────────────────────────
//

/// A mutable board position with undo.
pub trait Board: Send {
    /// Current position in FEN.
    fn fen(&self) -> String;

    fn side_to_move(&self) -> Side;

    /// Every legal move for the side to move.
    fn legal_moves(&self) -> Vec<BoardMove>;

    /// Play a legal move.
    ///
    /// # Errors
    ///
    /// Returns `BoardError::IllegalMove` if the move is not legal here; the
    /// board is left untouched.
    fn play(&mut self, mv: &BoardMove) -> Result<PlayedMove, BoardError>;

    /// Take back the last played move.
    fn undo(&mut self) -> Option<BoardMove>;

    fn is_check(&self) -> bool;

    fn is_checkmate(&self) -> bool;

    fn is_legal(&self, mv: &BoardMove) -> bool {
        self.legal_moves().contains(mv)
    }

    /// True when `from -> to` is a promotion with several legal pieces, so the
    /// player has to pick one before the move can be judged.
    fn requires_promotion_choice(&self, from: Square, to: Square) -> bool {
        self.legal_moves()
            .iter()
            .filter(|m| m.from == from && m.to == to && m.promotion.is_some())
            .count()
            > 1
    }
}

/// Builds boards from FEN.
pub trait RulesEngine: Send + Sync {
    /// # Errors
    ///
    /// Returns `BoardError::InvalidPosition` for malformed or impossible positions.
    fn load(&self, fen: &str) -> Result<Box<dyn Board>, BoardError>;
}

//
// ─── SHAKMATY BACKEND ──────────────────────────────────────────────────────────
//

/// Standard chess rules backed by `shakmaty`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShakmatyEngine;

impl RulesEngine for ShakmatyEngine {
    fn load(&self, fen: &str) -> Result<Box<dyn Board>, BoardError> {
        Ok(Box::new(ShakmatyBoard::from_fen(fen)?))
    }
}

#[derive(Debug, Clone)]
pub struct ShakmatyBoard {
    position: Chess,
    history: Vec<(Chess, BoardMove)>,
}

impl ShakmatyBoard {
    /// # Errors
    ///
    /// Returns `BoardError::InvalidPosition` if the FEN cannot be parsed or
    /// describes an illegal setup.
    pub fn from_fen(fen: &str) -> Result<Self, BoardError> {
        let invalid = |reason: String| BoardError::InvalidPosition {
            fen: fen.to_owned(),
            reason,
        };
        let parsed: Fen = fen.trim().parse().map_err(|e| invalid(format!("{e}")))?;
        let position: Chess = parsed
            .into_position(CastlingMode::Standard)
            .map_err(|e| invalid(format!("{e}")))?;
        Ok(Self {
            position,
            history: Vec::new(),
        })
    }
}

fn to_board_move(mv: &shakmaty::Move) -> Option<BoardMove> {
    match mv.to_uci(CastlingMode::Standard) {
        uci @ UciMove::Normal { .. } => uci.to_string().parse().ok(),
        _ => None,
    }
}

impl Board for ShakmatyBoard {
    fn fen(&self) -> String {
        Fen::from_position(&self.position, EnPassantMode::Legal).to_string()
    }

    fn side_to_move(&self) -> Side {
        match self.position.turn() {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }

    fn legal_moves(&self) -> Vec<BoardMove> {
        self.position
            .legal_moves()
            .iter()
            .filter_map(to_board_move)
            .collect()
    }

    fn play(&mut self, mv: &BoardMove) -> Result<PlayedMove, BoardError> {
        let uci: UciMove = mv
            .uci()
            .parse()
            .map_err(|_| BoardError::MalformedMove(mv.uci()))?;
        let legal = uci
            .to_move(&self.position)
            .map_err(|_| BoardError::IllegalMove(mv.uci()))?;
        let captured = legal.is_capture();
        let next = self
            .position
            .clone()
            .play(legal)
            .map_err(|_| BoardError::IllegalMove(mv.uci()))?;

        let previous = std::mem::replace(&mut self.position, next);
        self.history.push((previous, *mv));

        Ok(PlayedMove {
            mv: *mv,
            captured,
            gives_check: self.position.is_check(),
        })
    }

    fn undo(&mut self) -> Option<BoardMove> {
        let (previous, mv) = self.history.pop()?;
        self.position = previous;
        Some(mv)
    }

    fn is_check(&self) -> bool {
        self.position.is_check()
    }

    fn is_checkmate(&self) -> bool {
        self.position.is_checkmate()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn mv(s: &str) -> BoardMove {
        s.parse().unwrap()
    }

    #[test]
    fn parses_and_prints_uci() {
        assert_eq!(mv("e2e4").uci(), "e2e4");
        assert_eq!(mv("b7b8q").promotion, Some(PromotionPiece::Queen));
        assert!("e9e4".parse::<BoardMove>().is_err());
        assert!("e7e8k".parse::<BoardMove>().is_err());
    }

    #[test]
    fn play_and_undo_restore_position() {
        let mut board = ShakmatyEngine.load(START).unwrap();
        assert_eq!(board.side_to_move(), Side::White);
        assert_eq!(board.legal_moves().len(), 20);

        let played = board.play(&mv("e2e4")).unwrap();
        assert!(!played.captured);
        assert_eq!(board.side_to_move(), Side::Black);

        assert_eq!(board.undo(), Some(mv("e2e4")));
        assert_eq!(board.fen(), START);
        assert_eq!(board.undo(), None);
    }

    #[test]
    fn illegal_moves_leave_board_untouched() {
        let mut board = ShakmatyEngine.load(START).unwrap();
        let err = board.play(&mv("e2e5")).unwrap_err();
        assert_eq!(err, BoardError::IllegalMove("e2e5".into()));
        assert_eq!(board.fen(), START);
    }

    #[test]
    fn detects_checkmate() {
        // Fool's mate, one move before the end.
        let fen = "rnbqkbnr/pppp1ppp/8/4p3/6P1/5P2/PPPPP2P/RNBQKBNR b KQkq - 0 2";
        let mut board = ShakmatyEngine.load(fen).unwrap();
        let played = board.play(&mv("d8h4")).unwrap();
        assert!(played.gives_check);
        assert!(board.is_checkmate());
    }

    #[test]
    fn promotion_requires_a_choice() {
        let fen = "8/1P6/8/8/8/8/6k1/4K3 w - - 0 1";
        let board = ShakmatyEngine.load(fen).unwrap();
        let from: Square = "b7".parse().unwrap();
        let to: Square = "b8".parse().unwrap();
        assert!(board.requires_promotion_choice(from, to));
        assert!(!board.requires_promotion_choice("e1".parse().unwrap(), "e2".parse().unwrap()));
    }

    #[test]
    fn castling_uses_king_destination() {
        let fen = "r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1";
        let mut board = ShakmatyEngine.load(fen).unwrap();
        assert!(board.is_legal(&mv("e1g1")));
        board.play(&mv("e1g1")).unwrap();
        assert_eq!(board.side_to_move(), Side::Black);
    }

    #[test]
    fn rejects_invalid_fen() {
        assert!(matches!(
            ShakmatyEngine.load("not a fen"),
            Err(BoardError::InvalidPosition { .. })
        ));
    }
}
