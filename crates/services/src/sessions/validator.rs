use puzzle_core::board::{Board, BoardError, BoardMove, PlayedMove, Square};

/// How a submitted player move relates to the solution line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Judgement {
    /// The pawn reaches the last rank with several legal pieces to choose from.
    PromotionPending { from: Square, to: Square },
    /// Matches the expected token, or mates. The move stays on the board.
    Correct { played: PlayedMove, checkmate: bool },
    /// Legal but wrong. The move has already been taken back.
    Incorrect { played: PlayedMove },
    /// Not a legal move here; the board was never touched.
    Illegal,
}

/// Judges player moves against one puzzle's solution tokens.
#[derive(Debug, Clone)]
pub struct MoveValidator {
    solution: Vec<String>,
}

impl MoveValidator {
    #[must_use]
    pub fn new(solution: &[String]) -> Self {
        Self {
            solution: solution.to_vec(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.solution.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.solution.is_empty()
    }

    #[must_use]
    pub fn expected(&self, index: usize) -> Option<&str> {
        self.solution.get(index).map(String::as_str)
    }

    /// The solution token at `index` as a move.
    ///
    /// # Errors
    ///
    /// Returns `BoardError::MalformedMove` if the index is past the line or the
    /// token does not parse.
    pub fn move_at(&self, index: usize) -> Result<BoardMove, BoardError> {
        self.expected(index)
            .ok_or_else(|| BoardError::MalformedMove(format!("<solution index {index}>")))?
            .parse()
    }

    /// Classify a `from -> to` drag made by the player at solution `index`.
    pub fn classify(
        &self,
        board: &mut dyn Board,
        index: usize,
        from: Square,
        to: Square,
    ) -> Judgement {
        if board.requires_promotion_choice(from, to) {
            return Judgement::PromotionPending { from, to };
        }
        let candidate = board
            .legal_moves()
            .into_iter()
            .find(|m| m.from == from && m.to == to);
        match candidate {
            Some(mv) => self.judge(board, index, mv),
            None => Judgement::Illegal,
        }
    }

    /// Judge a fully specified move (promotion piece included).
    ///
    /// A move is correct when its UCI spelling equals the expected token or
    /// when it delivers mate; anything else legal is undone.
    pub fn judge(&self, board: &mut dyn Board, index: usize, mv: BoardMove) -> Judgement {
        let Ok(played) = board.play(&mv) else {
            return Judgement::Illegal;
        };

        let checkmate = board.is_checkmate();
        let matches = self
            .expected(index)
            .is_some_and(|token| token.eq_ignore_ascii_case(&mv.uci()));

        if matches || checkmate {
            Judgement::Correct { played, checkmate }
        } else {
            board.undo();
            Judgement::Incorrect { played }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use puzzle_core::board::{PromotionPiece, ShakmatyBoard};

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    fn validator(tokens: &[&str]) -> MoveValidator {
        let tokens: Vec<String> = tokens.iter().map(|t| (*t).to_owned()).collect();
        MoveValidator::new(&tokens)
    }

    #[test]
    fn expected_move_is_correct_and_stays_played() {
        let mut board = ShakmatyBoard::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let v = validator(&["e2e4", "e7e5"]);

        let judgement = v.classify(&mut board, 0, sq("e2"), sq("e4"));
        assert!(matches!(
            judgement,
            Judgement::Correct {
                checkmate: false,
                ..
            }
        ));
        assert!(board.fen().starts_with("rnbqkbnr/pppppppp/8/8/4P3"));
    }

    #[test]
    fn wrong_move_is_undone() {
        let start = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
        let mut board = ShakmatyBoard::from_fen(start).unwrap();
        let v = validator(&["e2e4", "e7e5"]);

        let judgement = v.classify(&mut board, 0, sq("d2"), sq("d4"));
        assert!(matches!(judgement, Judgement::Incorrect { .. }));
        assert_eq!(board.fen(), start);
    }

    #[test]
    fn illegal_move_never_reaches_the_board() {
        let start = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
        let mut board = ShakmatyBoard::from_fen(start).unwrap();
        let v = validator(&["e2e4", "e7e5"]);

        assert_eq!(v.classify(&mut board, 0, sq("e2"), sq("e5")), Judgement::Illegal);
        assert_eq!(board.fen(), start);
    }

    #[test]
    fn any_mate_is_correct() {
        // Rb8 mates; it counts even when the line expects something else.
        let mut board = ShakmatyBoard::from_fen("6k1/5ppp/8/8/8/8/8/1R4K1 w - - 0 1").unwrap();
        let v = validator(&["b1b8"]);
        let mut other = board.clone();

        assert!(matches!(
            v.classify(&mut board, 0, sq("b1"), sq("b8")),
            Judgement::Correct { checkmate: true, .. }
        ));

        let v = validator(&["a2a3"]);
        assert!(matches!(
            v.classify(&mut other, 0, sq("b1"), sq("b8")),
            Judgement::Correct { checkmate: true, .. }
        ));
    }

    #[test]
    fn promotion_waits_for_a_piece_then_checks_the_full_token() {
        let fen = "8/1P6/8/8/8/8/6k1/4K3 w - - 0 1";
        let mut board = ShakmatyBoard::from_fen(fen).unwrap();
        let v = validator(&["b7b8n"]);

        assert_eq!(
            v.classify(&mut board, 0, sq("b7"), sq("b8")),
            Judgement::PromotionPending {
                from: sq("b7"),
                to: sq("b8")
            }
        );
        assert_eq!(board.fen(), ShakmatyBoard::from_fen(fen).unwrap().fen());

        let queen = BoardMove::new(sq("b7"), sq("b8")).with_promotion(PromotionPiece::Queen);
        assert!(matches!(
            v.judge(&mut board, 0, queen),
            Judgement::Incorrect { .. }
        ));

        let knight = BoardMove::new(sq("b7"), sq("b8")).with_promotion(PromotionPiece::Knight);
        assert!(matches!(
            v.judge(&mut board, 0, knight),
            Judgement::Correct { .. }
        ));
    }
}
