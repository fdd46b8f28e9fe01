use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::PuzzleId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PuzzleError {
    #[error("puzzle position cannot be empty")]
    EmptyPosition,

    #[error("solution needs an opening move and at least one player move")]
    SolutionTooShort,

    #[error("invalid solution token `{0}`")]
    InvalidToken(String),
}

//
// ─── PUZZLE ────────────────────────────────────────────────────────────────────
//

/// A tactical puzzle body, fetched lazily as the session pointer advances.
///
/// The solution alternates opponent and player moves in UCI notation,
/// starting with the opponent move that sets the puzzle up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Puzzle {
    id: PuzzleId,
    fen: String,
    solution: Vec<String>,
    themes: Vec<String>,
}

impl Puzzle {
    /// Builds a puzzle from its starting position, solution tokens and themes.
    ///
    /// # Errors
    ///
    /// Returns `PuzzleError` when the position is blank, the solution has fewer
    /// than two tokens, or a token is not shaped like a UCI move.
    pub fn new(
        id: PuzzleId,
        fen: impl Into<String>,
        solution: Vec<String>,
        themes: Vec<String>,
    ) -> Result<Self, PuzzleError> {
        let fen = fen.into().trim().to_owned();
        if fen.is_empty() {
            return Err(PuzzleError::EmptyPosition);
        }
        if solution.len() < 2 {
            return Err(PuzzleError::SolutionTooShort);
        }
        if let Some(bad) = solution.iter().find(|token| !is_uci_shaped(token)) {
            return Err(PuzzleError::InvalidToken(bad.clone()));
        }

        Ok(Self {
            id,
            fen,
            solution,
            themes,
        })
    }

    /// Builds a puzzle from the space-separated move list used by the puzzle
    /// database (`"e2e4 e7e5 g1f3"`).
    ///
    /// # Errors
    ///
    /// Same as [`Puzzle::new`].
    pub fn from_move_list(
        id: PuzzleId,
        fen: impl Into<String>,
        moves: &str,
        themes: Vec<String>,
    ) -> Result<Self, PuzzleError> {
        let solution = moves.split_whitespace().map(str::to_owned).collect();
        Self::new(id, fen, solution, themes)
    }

    #[must_use]
    pub fn id(&self) -> &PuzzleId {
        &self.id
    }

    #[must_use]
    pub fn fen(&self) -> &str {
        &self.fen
    }

    #[must_use]
    pub fn solution(&self) -> &[String] {
        &self.solution
    }

    #[must_use]
    pub fn themes(&self) -> &[String] {
        &self.themes
    }

    /// Space-separated solution, as stored.
    #[must_use]
    pub fn move_list(&self) -> String {
        self.solution.join(" ")
    }

    /// Number of moves the player has to find.
    #[must_use]
    pub fn player_move_count(&self) -> usize {
        self.solution.len() / 2
    }
}

fn is_uci_shaped(token: &str) -> bool {
    let bytes = token.as_bytes();
    let square = |file: u8, rank: u8| (b'a'..=b'h').contains(&file) && (b'1'..=b'8').contains(&rank);
    match bytes.len() {
        4 => square(bytes[0], bytes[1]) && square(bytes[2], bytes[3]),
        5 => {
            square(bytes[0], bytes[1])
                && square(bytes[2], bytes[3])
                && matches!(bytes[4], b'q' | b'r' | b'b' | b'n')
        }
        _ => false,
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
