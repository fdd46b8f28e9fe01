use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use puzzle_core::board::{Board, BoardMove, PlayedMove, PromotionPiece, RulesEngine, Side, Square};
use puzzle_core::model::{Puzzle, PuzzleId, PuzzleRef, PuzzleSet, SessionSettings, UserStats};

use super::progress::{
    ProgressionTracker, PuzzleCommit, PuzzleSolve, SessionProgress, SetCommit, SolvedPuzzle,
};
use super::validator::{Judgement, MoveValidator};
use crate::error::{EngineFailure, SessionError};

//
// ─── STATES & EFFECTS ──────────────────────────────────────────────────────────
//

/// Where a training session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// A puzzle body fetch is in flight.
    Loading,
    /// The opponent's setup move is scheduled.
    AwaitingOpponentOpening,
    AwaitingPlayerMove,
    AwaitingPromotionChoice,
    AwaitingOpponentReply,
    /// The last move was wrong; the player may try again.
    MistakeRegistered,
    PuzzleComplete,
    SetComplete,
    SessionEnded,
}

impl SessionPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::SetComplete | SessionPhase::SessionEnded)
    }

    fn accepts_player_move(self) -> bool {
        matches!(
            self,
            SessionPhase::AwaitingPlayerMove | SessionPhase::MistakeRegistered
        )
    }
}

/// Request for the body of the puzzle at the current pointer.
///
/// Only the most recently issued ticket may install a puzzle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
    puzzle_id: PuzzleId,
}

impl LoadTicket {
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn puzzle_id(&self) -> &PuzzleId {
        &self.puzzle_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    PlayOpening,
    PlayOpponentReply,
}

/// A delayed opponent move. Fire it with [`SessionController::fire`] once
/// `delay` has passed; a superseded token does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTransition {
    pub token: u64,
    pub action: TransitionAction,
    pub delay: Duration,
}

/// Work the caller has to carry out after a controller operation.
#[derive(Debug, Default, Clone, PartialEq)]
#[must_use]
pub struct Effects {
    pub load: Option<LoadTicket>,
    pub schedule: Option<ScheduledTransition>,
    pub puzzle_commit: Option<PuzzleCommit>,
    pub set_commit: Option<SetCommit>,
    pub failure: Option<EngineFailure>,
}

impl Effects {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Result of a player move, as seen by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Not a legal move; nothing changed.
    Illegal,
    /// The player must pick a promotion piece.
    PromotionPending { from: Square, to: Square },
    Correct {
        played: PlayedMove,
        puzzle_complete: bool,
    },
    /// The move was taken back. `mistakes` counts this puzzle's mistakes so far.
    Incorrect { played: PlayedMove, mistakes: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveResult {
    pub outcome: MoveOutcome,
    pub effects: Effects,
}

//
// ─── ACTIVE PUZZLE ─────────────────────────────────────────────────────────────
//

struct ActivePuzzle {
    /// Set entry as loaded at session start.
    entry: PuzzleRef,
    puzzle: Puzzle,
    board: Box<dyn Board>,
    validator: MoveValidator,
    /// Solution tokens played so far, by either side.
    move_index: usize,
    mistakes: u32,
    did_cheat: bool,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    pending_promotion: Option<(Square, Square)>,
    orientation: Side,
    last_move: Option<PlayedMove>,
}

//
// ─── CONTROLLER ────────────────────────────────────────────────────────────────
//

/// The training session state machine.
///
/// Synchronous and free of I/O: every operation takes the current time when
/// it needs one and returns the [`Effects`] (fetches, delayed moves, commits)
/// that the driver has to perform.
pub struct SessionController {
    settings: SessionSettings,
    rules: Arc<dyn RulesEngine>,
    queue: Vec<PuzzleRef>,
    pointer: usize,
    skipped: usize,
    phase: SessionPhase,
    active: Option<ActivePuzzle>,
    generation: u64,
    next_token: u64,
    pending_transition: Option<ScheduledTransition>,
    total_mistakes: u32,
    history: Vec<SolvedPuzzle>,
    tracker: ProgressionTracker,
}

impl SessionController {
    /// Start a pass over the set's unplayed puzzles, in set order.
    ///
    /// When nothing is left to play the session is complete straight away; a
    /// pass that was fully solved but never closed gets its set commit then.
    pub fn start(
        set: &PuzzleSet,
        user: UserStats,
        settings: SessionSettings,
        rules: Arc<dyn RulesEngine>,
    ) -> (Self, Effects) {
        let queue = set.unplayed_in_order();
        let tracker = ProgressionTracker::new(set, user, &settings);
        let mut controller = Self {
            settings,
            rules,
            queue,
            pointer: 0,
            skipped: 0,
            phase: SessionPhase::Loading,
            active: None,
            generation: 0,
            next_token: 0,
            pending_transition: None,
            total_mistakes: 0,
            history: Vec::new(),
            tracker,
        };

        let mut effects = Effects::default();
        if controller.queue.is_empty() {
            controller.phase = SessionPhase::SetComplete;
            if !set.puzzles().is_empty() {
                tracing::info!(set_id = %set.id(), "closing fully solved pass");
                effects.set_commit = Some(controller.tracker.complete_set());
            }
        } else {
            tracing::info!(
                set_id = %set.id(),
                remaining = controller.queue.len(),
                "session started"
            );
            effects.load = Some(controller.issue_ticket());
        }
        (controller, effects)
    }

    //
    // ─── QUERIES ───────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        SessionProgress {
            total: self.queue.len(),
            completed: self.history.len(),
            remaining: self.queue.len().saturating_sub(self.pointer),
            mistakes: self.total_mistakes,
            is_complete: self.phase == SessionPhase::SetComplete,
        }
    }

    /// Puzzles solved so far in this session, with their grades.
    #[must_use]
    pub fn history(&self) -> &[SolvedPuzzle] {
        &self.history
    }

    /// Local copy of the user's statistics, updated as puzzles are committed.
    #[must_use]
    pub fn user(&self) -> &UserStats {
        self.tracker.user()
    }

    #[must_use]
    pub fn current_puzzle(&self) -> Option<&Puzzle> {
        self.active.as_ref().map(|a| &a.puzzle)
    }

    #[must_use]
    pub fn board_fen(&self) -> Option<String> {
        self.active.as_ref().map(|a| a.board.fen())
    }

    /// Side the board should be shown from: the player's side.
    #[must_use]
    pub fn orientation(&self) -> Option<Side> {
        self.active.as_ref().map(|a| a.orientation)
    }

    #[must_use]
    pub fn last_move(&self) -> Option<PlayedMove> {
        self.active.as_ref().and_then(|a| a.last_move)
    }

    #[must_use]
    pub fn legal_moves(&self) -> Vec<BoardMove> {
        self.active
            .as_ref()
            .map(|a| a.board.legal_moves())
            .unwrap_or_default()
    }

    /// Mistakes on the current puzzle.
    #[must_use]
    pub fn mistakes(&self) -> u32 {
        self.active.as_ref().map_or(0, |a| a.mistakes)
    }

    #[must_use]
    pub fn pending_promotion(&self) -> Option<(Square, Square)> {
        self.active.as_ref().and_then(|a| a.pending_promotion)
    }

    #[must_use]
    pub fn pending_transition(&self) -> Option<ScheduledTransition> {
        self.pending_transition
    }

    //
    // ─── LOADING ───────────────────────────────────────────────────────────────
    //

    /// Install a fetched puzzle body and schedule the opponent's opening move.
    ///
    /// Results for a superseded ticket are ignored.
    pub fn puzzle_loaded(
        &mut self,
        ticket: &LoadTicket,
        puzzle: Puzzle,
        now: DateTime<Utc>,
    ) -> Effects {
        if !self.is_current(ticket) {
            tracing::debug!(puzzle_id = %ticket.puzzle_id, "ignoring stale puzzle load");
            return Effects::default();
        }
        if puzzle.id() != &ticket.puzzle_id {
            return self.skip_current(format!("received puzzle {} instead", puzzle.id()));
        }
        let board = match self.rules.load(puzzle.fen()) {
            Ok(board) => board,
            Err(err) => return self.skip_current(err.to_string()),
        };
        let Some(entry) = self.queue.get(self.pointer).cloned() else {
            return self.skip_current("puzzle pointer out of range".to_owned());
        };

        tracing::debug!(puzzle_id = %puzzle.id(), "puzzle loaded");
        let orientation = board.side_to_move().opposite();
        self.active = Some(ActivePuzzle {
            entry,
            validator: MoveValidator::new(puzzle.solution()),
            puzzle,
            board,
            move_index: 0,
            mistakes: 0,
            did_cheat: false,
            started_at: now,
            completed_at: None,
            pending_promotion: None,
            orientation,
            last_move: None,
        });
        self.phase = SessionPhase::AwaitingOpponentOpening;

        Effects {
            schedule: Some(self.schedule(
                TransitionAction::PlayOpening,
                self.settings.opening_delay(),
            )),
            ..Effects::default()
        }
    }

    /// Record a failed fetch: the puzzle is skipped without statistics.
    pub fn fetch_failed(&mut self, ticket: &LoadTicket, reason: impl Into<String>) -> Effects {
        if !self.is_current(ticket) {
            tracing::debug!(puzzle_id = %ticket.puzzle_id, "ignoring stale fetch failure");
            return Effects::default();
        }
        self.skip_current(reason.into())
    }

    //
    // ─── TRANSITIONS ───────────────────────────────────────────────────────────
    //

    /// Run a scheduled opponent move.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoActivePuzzle` if the transition is current but
    /// no puzzle is loaded.
    pub fn fire(&mut self, token: u64, now: DateTime<Utc>) -> Result<Effects, SessionError> {
        let Some(transition) = self.pending_transition.filter(|t| t.token == token) else {
            tracing::debug!(token, "ignoring stale transition");
            return Ok(Effects::default());
        };
        self.pending_transition = None;

        let active = self.active.as_mut().ok_or(SessionError::NoActivePuzzle)?;
        let played = active
            .validator
            .move_at(active.move_index)
            .and_then(|mv| active.board.play(&mv));
        let played = match played {
            Ok(played) => played,
            Err(err) => {
                let reason = format!("solution line is not playable: {err}");
                return Ok(self.skip_current(reason));
            }
        };
        active.move_index += 1;
        active.last_move = Some(played);

        match transition.action {
            TransitionAction::PlayOpening => {
                self.phase = SessionPhase::AwaitingPlayerMove;
            }
            TransitionAction::PlayOpponentReply => {
                if active.move_index >= active.validator.len() {
                    self.complete(now);
                } else {
                    self.phase = SessionPhase::AwaitingPlayerMove;
                }
            }
        }
        Ok(Effects::default())
    }

    //
    // ─── PLAYER COMMANDS ───────────────────────────────────────────────────────
    //

    /// Submit a `from -> to` move.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` when the player is not on move and
    /// `SessionError::NoActivePuzzle` if no puzzle is loaded.
    pub fn submit_move(
        &mut self,
        from: Square,
        to: Square,
        now: DateTime<Utc>,
    ) -> Result<MoveResult, SessionError> {
        if !self.phase.accepts_player_move() {
            return Err(self.invalid("submit_move"));
        }
        let active = self.active.as_mut().ok_or(SessionError::NoActivePuzzle)?;
        let judgement = active
            .validator
            .classify(active.board.as_mut(), active.move_index, from, to);
        Ok(self.apply_judgement(judgement, now))
    }

    /// Finish a pending promotion with the chosen piece.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless a promotion is pending.
    pub fn choose_promotion(
        &mut self,
        piece: PromotionPiece,
        now: DateTime<Utc>,
    ) -> Result<MoveResult, SessionError> {
        if self.phase != SessionPhase::AwaitingPromotionChoice {
            return Err(self.invalid("choose_promotion"));
        }
        let active = self.active.as_mut().ok_or(SessionError::NoActivePuzzle)?;
        let (from, to) = active
            .pending_promotion
            .take()
            .ok_or(SessionError::NoActivePuzzle)?;
        let mv = BoardMove::new(from, to).with_promotion(piece);
        let judgement = active
            .validator
            .judge(active.board.as_mut(), active.move_index, mv);

        if judgement == Judgement::Illegal {
            active.pending_promotion = Some((from, to));
        }
        Ok(self.apply_judgement(judgement, now))
    }

    /// Drop a pending promotion and let the player move again.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless a promotion is pending.
    pub fn cancel_promotion(&mut self) -> Result<(), SessionError> {
        if self.phase != SessionPhase::AwaitingPromotionChoice {
            return Err(self.invalid("cancel_promotion"));
        }
        if let Some(active) = self.active.as_mut() {
            active.pending_promotion = None;
        }
        self.phase = SessionPhase::AwaitingPlayerMove;
        Ok(())
    }

    /// Reveal the expected move. The puzzle will be graded as cheated.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` when it is not the player's turn.
    pub fn reveal_solution(&mut self) -> Result<String, SessionError> {
        if !(self.phase.accepts_player_move()
            || self.phase == SessionPhase::AwaitingPromotionChoice)
        {
            return Err(self.invalid("reveal_solution"));
        }
        let active = self.active.as_mut().ok_or(SessionError::NoActivePuzzle)?;
        let token = active
            .validator
            .expected(active.move_index)
            .ok_or(SessionError::NoActivePuzzle)?
            .to_owned();
        active.did_cheat = true;
        Ok(token)
    }

    /// Commit the finished puzzle and move on to the next one.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoRemainingPuzzles` once the pass is over and
    /// `SessionError::InvalidState` if the current puzzle is not finished.
    pub fn change_puzzle(&mut self) -> Result<Effects, SessionError> {
        match self.phase {
            SessionPhase::PuzzleComplete => {}
            SessionPhase::SetComplete => return Err(SessionError::NoRemainingPuzzles),
            _ => return Err(self.invalid("change_puzzle")),
        }
        let commit = self.finish_active()?;
        let mut effects = self.enter_next();
        effects.puzzle_commit = Some(commit);
        Ok(effects)
    }

    /// End the session.
    ///
    /// An unfinished puzzle contributes nothing. A finished one that was not
    /// advanced past yet is still committed, closing the pass if it was last.
    pub fn leave(&mut self) -> Effects {
        if self.phase.is_terminal() {
            return Effects::default();
        }

        let mut effects = Effects::default();
        if self.phase == SessionPhase::PuzzleComplete {
            match self.finish_active() {
                Ok(commit) => {
                    effects.puzzle_commit = Some(commit);
                    if self.pointer >= self.queue.len() && self.skipped == 0 {
                        effects.set_commit = Some(self.tracker.complete_set());
                    }
                }
                Err(err) => tracing::warn!(error = %err, "finished puzzle could not be committed"),
            }
        }

        tracing::info!(completed = self.history.len(), "session ended");
        self.active = None;
        self.pending_transition = None;
        self.generation += 1;
        self.phase = SessionPhase::SessionEnded;
        effects
    }

    //
    // ─── INTERNALS ─────────────────────────────────────────────────────────────
    //

    fn apply_judgement(&mut self, judgement: Judgement, now: DateTime<Utc>) -> MoveResult {
        let mut effects = Effects::default();
        let outcome = match (judgement, self.active.as_mut()) {
            (_, None) | (Judgement::Illegal, _) => MoveOutcome::Illegal,
            (Judgement::PromotionPending { from, to }, Some(active)) => {
                active.pending_promotion = Some((from, to));
                self.phase = SessionPhase::AwaitingPromotionChoice;
                MoveOutcome::PromotionPending { from, to }
            }
            (Judgement::Incorrect { played }, Some(active)) => {
                active.mistakes += 1;
                self.total_mistakes += 1;
                self.phase = SessionPhase::MistakeRegistered;
                tracing::debug!(
                    puzzle_id = %active.puzzle.id(),
                    mv = %played.mv,
                    mistakes = active.mistakes,
                    "wrong move"
                );
                MoveOutcome::Incorrect {
                    played,
                    mistakes: active.mistakes,
                }
            }
            (Judgement::Correct { played, checkmate }, Some(active)) => {
                active.move_index += 1;
                active.last_move = Some(played);
                active.pending_promotion = None;
                let puzzle_complete = checkmate || active.move_index >= active.validator.len();
                if puzzle_complete {
                    self.complete(now);
                } else {
                    self.phase = SessionPhase::AwaitingOpponentReply;
                    effects.schedule = Some(self.schedule(
                        TransitionAction::PlayOpponentReply,
                        self.settings.reply_delay(),
                    ));
                }
                MoveOutcome::Correct {
                    played,
                    puzzle_complete,
                }
            }
        };
        MoveResult { outcome, effects }
    }

    fn complete(&mut self, now: DateTime<Utc>) {
        if let Some(active) = self.active.as_mut() {
            active.completed_at = Some(now);
            tracing::info!(
                puzzle_id = %active.puzzle.id(),
                mistakes = active.mistakes,
                "puzzle complete"
            );
        }
        self.pending_transition = None;
        self.phase = SessionPhase::PuzzleComplete;
    }

    /// Commit the finished active puzzle and step the pointer past it.
    fn finish_active(&mut self) -> Result<PuzzleCommit, SessionError> {
        let active = self.active.take().ok_or(SessionError::NoActivePuzzle)?;
        let completed_at = active.completed_at.ok_or(SessionError::NoActivePuzzle)?;
        let commit = self.tracker.complete_puzzle(
            &active.entry,
            &active.puzzle,
            &PuzzleSolve {
                mistakes: active.mistakes,
                did_cheat: active.did_cheat,
                started_at: active.started_at,
                completed_at,
            },
        );
        self.history.push(SolvedPuzzle {
            puzzle_id: active.entry.puzzle_id.clone(),
            grade: commit.delta.grade,
        });
        self.pointer += 1;
        Ok(commit)
    }

    fn skip_current(&mut self, reason: String) -> Effects {
        let puzzle_id = self.queue.get(self.pointer).map(|p| p.puzzle_id.clone());
        self.active = None;
        self.pending_transition = None;
        self.skipped += 1;
        self.pointer += 1;

        let mut effects = self.enter_next();
        if let Some(puzzle_id) = puzzle_id {
            tracing::warn!(puzzle_id = %puzzle_id, reason = %reason, "skipping puzzle");
            effects.failure = Some(EngineFailure::Fetch { puzzle_id, reason });
        }
        effects
    }

    /// Request the next puzzle, or end the pass when the list is exhausted.
    fn enter_next(&mut self) -> Effects {
        self.pending_transition = None;
        let mut effects = Effects::default();
        if self.pointer < self.queue.len() {
            self.phase = SessionPhase::Loading;
            effects.load = Some(self.issue_ticket());
            return effects;
        }

        self.phase = SessionPhase::SetComplete;
        if self.skipped == 0 {
            tracing::info!(solved = self.history.len(), "set complete");
            effects.set_commit = Some(self.tracker.complete_set());
        } else {
            tracing::warn!(
                skipped = self.skipped,
                "pass ended with skipped puzzles; set left open"
            );
        }
        effects
    }

    fn issue_ticket(&mut self) -> LoadTicket {
        self.generation += 1;
        LoadTicket {
            generation: self.generation,
            puzzle_id: self.queue[self.pointer].puzzle_id.clone(),
        }
    }

    fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.phase == SessionPhase::Loading && ticket.generation == self.generation
    }

    fn schedule(&mut self, action: TransitionAction, delay: Duration) -> ScheduledTransition {
        self.next_token += 1;
        let transition = ScheduledTransition {
            token: self.next_token,
            action,
            delay,
        };
        self.pending_transition = Some(transition);
        transition
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            phase: self.phase,
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use puzzle_core::board::ShakmatyEngine;
    use puzzle_core::model::{PuzzleSetId, UserId};
    use puzzle_core::time::fixed_now;

    // Black plays a7a6; white wins with Rb7 a5 Rb8#. Rb8 is mate at once too.
    const ROOK_FEN: &str = "6k1/p4ppp/8/8/8/8/8/1R4K1 b - - 0 1";
    const ROOK_LINE: &str = "a7a6 b1b7 a6a5 b7b8";
    // Black king steps aside; white promotes to a queen.
    const PROMO_FEN: &str = "8/1P4k1/8/8/8/8/8/4K3 b - - 0 1";
    const PROMO_LINE: &str = "g7f7 b7b8q";

    fn pid(s: &str) -> PuzzleId {
        PuzzleId::new(s).unwrap()
    }

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    fn puzzle(id: &str, fen: &str, line: &str) -> Puzzle {
        Puzzle::from_move_list(pid(id), fen, line, vec!["mate".into()]).unwrap()
    }

    fn set_of(ids: &[&str]) -> PuzzleSet {
        let refs = ids
            .iter()
            .zip(0..)
            .map(|(id, order)| PuzzleRef::new(pid(id), order))
            .collect();
        PuzzleSet::new(PuzzleSetId::new(1), UserId::new(1), "Set", refs).unwrap()
    }

    fn start(set: &PuzzleSet) -> (SessionController, Effects) {
        SessionController::start(
            set,
            UserStats::new(UserId::new(1)),
            SessionSettings::instant(),
            Arc::new(ShakmatyEngine),
        )
    }

    fn at(secs: i64) -> DateTime<Utc> {
        fixed_now() + ChronoDuration::seconds(secs)
    }

    /// Load `puzzle` for the pending ticket and play the opening move.
    fn load(controller: &mut SessionController, effects: Effects, puzzle: Puzzle, now: DateTime<Utc>) {
        let ticket = effects.load.expect("load requested");
        let effects = controller.puzzle_loaded(&ticket, puzzle, now);
        let opening = effects.schedule.expect("opening scheduled");
        assert_eq!(opening.action, TransitionAction::PlayOpening);
        assert_eq!(controller.phase(), SessionPhase::AwaitingOpponentOpening);
        let effects = controller.fire(opening.token, now).unwrap();
        assert!(effects.is_empty());
        assert_eq!(controller.phase(), SessionPhase::AwaitingPlayerMove);
    }

    fn reply(controller: &mut SessionController, result: &MoveResult, now: DateTime<Utc>) {
        let transition = result.effects.schedule.expect("reply scheduled");
        assert_eq!(transition.action, TransitionAction::PlayOpponentReply);
        let effects = controller.fire(transition.token, now).unwrap();
        assert!(effects.is_empty());
    }

    #[test]
    fn empty_fresh_set_completes_without_commit() {
        let set = PuzzleSet::new(PuzzleSetId::new(1), UserId::new(1), "Empty", Vec::new()).unwrap();
        let (controller, effects) = start(&set);
        assert_eq!(controller.phase(), SessionPhase::SetComplete);
        assert!(effects.is_empty());
    }

    #[test]
    fn fully_played_set_is_closed_on_start() {
        let mut set = set_of(&["a"]);
        set.apply_puzzle_delta(&puzzle_core::model::PuzzleCompletionDelta {
            puzzle_id: pid("a"),
            mistakes: 0,
            time_taken_secs: 2.0,
            grade: puzzle_core::grading::Grade::MAX,
            streak: 1,
            time_with_penalty_secs: 2.0,
        })
        .unwrap();

        let (controller, effects) = start(&set);
        assert_eq!(controller.phase(), SessionPhase::SetComplete);
        assert!(effects.load.is_none());
        let commit = effects.set_commit.expect("pass closed");
        assert!((commit.delta.total_time_secs - 3.0).abs() < 1e-9);
    }

    #[test]
    fn loading_orients_board_for_the_player() {
        let set = set_of(&["a"]);
        let (mut controller, effects) = start(&set);
        assert_eq!(controller.phase(), SessionPhase::Loading);

        load(&mut controller, effects, puzzle("a", ROOK_FEN, ROOK_LINE), at(0));
        assert_eq!(controller.orientation(), Some(Side::White));
        assert_eq!(controller.last_move().map(|m| m.mv.uci()), Some("a7a6".to_owned()));
    }

    #[test]
    fn solving_the_full_line_completes_after_two_player_moves() {
        let set = set_of(&["a", "b"]);
        let (mut controller, effects) = start(&set);
        load(&mut controller, effects, puzzle("a", ROOK_FEN, ROOK_LINE), at(0));

        let first = controller.submit_move(sq("b1"), sq("b7"), at(1)).unwrap();
        assert!(matches!(
            first.outcome,
            MoveOutcome::Correct {
                puzzle_complete: false,
                ..
            }
        ));
        assert_eq!(controller.phase(), SessionPhase::AwaitingOpponentReply);
        reply(&mut controller, &first, at(1));
        assert_eq!(controller.phase(), SessionPhase::AwaitingPlayerMove);

        let second = controller.submit_move(sq("b7"), sq("b8"), at(3)).unwrap();
        assert!(matches!(
            second.outcome,
            MoveOutcome::Correct {
                puzzle_complete: true,
                ..
            }
        ));
        assert_eq!(controller.phase(), SessionPhase::PuzzleComplete);
        assert!(second.effects.schedule.is_none());

        let effects = controller.change_puzzle().unwrap();
        let commit = effects.puzzle_commit.expect("puzzle committed");
        assert_eq!(commit.delta.puzzle_id, pid("a"));
        assert_eq!(commit.delta.time_taken_secs, 3.0);
        assert_eq!(commit.delta.grade.value(), 5);
        assert_eq!(effects.load.map(|t| t.puzzle_id().clone()), Some(pid("b")));
        assert!(effects.set_commit.is_none());
        assert_eq!(controller.phase(), SessionPhase::Loading);
    }

    #[test]
    fn mate_ends_the_puzzle_early() {
        let set = set_of(&["a"]);
        let (mut controller, effects) = start(&set);
        load(&mut controller, effects, puzzle("a", ROOK_FEN, ROOK_LINE), at(0));

        let result = controller.submit_move(sq("b1"), sq("b8"), at(2)).unwrap();
        assert!(matches!(
            result.outcome,
            MoveOutcome::Correct {
                puzzle_complete: true,
                ..
            }
        ));
        assert_eq!(controller.phase(), SessionPhase::PuzzleComplete);
    }

    #[test]
    fn wrong_move_counts_mistakes_without_advancing() {
        let set = set_of(&["a"]);
        let (mut controller, effects) = start(&set);
        load(&mut controller, effects, puzzle("a", ROOK_FEN, ROOK_LINE), at(0));
        let before = controller.board_fen();

        let result = controller.submit_move(sq("b1"), sq("c1"), at(1)).unwrap();
        assert!(matches!(
            result.outcome,
            MoveOutcome::Incorrect { mistakes: 1, .. }
        ));
        assert_eq!(controller.phase(), SessionPhase::MistakeRegistered);
        assert_eq!(controller.board_fen(), before);
        assert_eq!(controller.progress().mistakes, 1);

        // Still expecting b1b7.
        let retry = controller.submit_move(sq("b1"), sq("b7"), at(2)).unwrap();
        assert!(matches!(retry.outcome, MoveOutcome::Correct { .. }));
        assert_eq!(controller.mistakes(), 1);
    }

    #[test]
    fn illegal_move_changes_nothing() {
        let set = set_of(&["a"]);
        let (mut controller, effects) = start(&set);
        load(&mut controller, effects, puzzle("a", ROOK_FEN, ROOK_LINE), at(0));

        let result = controller.submit_move(sq("b1"), sq("a3"), at(1)).unwrap();
        assert_eq!(result.outcome, MoveOutcome::Illegal);
        assert!(result.effects.is_empty());
        assert_eq!(controller.phase(), SessionPhase::AwaitingPlayerMove);
        assert_eq!(controller.mistakes(), 0);
    }

    #[test]
    fn moves_are_rejected_outside_the_players_turn() {
        let set = set_of(&["a"]);
        let (mut controller, _effects) = start(&set);
        let err = controller.submit_move(sq("b1"), sq("b7"), at(0)).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                phase: SessionPhase::Loading,
                ..
            }
        ));
    }

    #[test]
    fn promotion_waits_for_a_piece() {
        let set = set_of(&["p"]);
        let (mut controller, effects) = start(&set);
        load(&mut controller, effects, puzzle("p", PROMO_FEN, PROMO_LINE), at(0));

        let pending = controller.submit_move(sq("b7"), sq("b8"), at(1)).unwrap();
        assert_eq!(
            pending.outcome,
            MoveOutcome::PromotionPending {
                from: sq("b7"),
                to: sq("b8")
            }
        );
        assert_eq!(controller.phase(), SessionPhase::AwaitingPromotionChoice);

        let wrong = controller
            .choose_promotion(PromotionPiece::Rook, at(2))
            .unwrap();
        assert!(matches!(wrong.outcome, MoveOutcome::Incorrect { .. }));
        assert_eq!(controller.pending_promotion(), None);

        controller.submit_move(sq("b7"), sq("b8"), at(3)).unwrap();
        let right = controller
            .choose_promotion(PromotionPiece::Queen, at(4))
            .unwrap();
        assert!(matches!(
            right.outcome,
            MoveOutcome::Correct {
                puzzle_complete: true,
                ..
            }
        ));
    }

    #[test]
    fn odd_line_completes_after_the_opponent_reply() {
        let set = set_of(&["a"]);
        let (mut controller, effects) = start(&set);
        load(&mut controller, effects, puzzle("a", ROOK_FEN, "a7a6 b1b7 a6a5"), at(0));

        let result = controller.submit_move(sq("b1"), sq("b7"), at(1)).unwrap();
        reply(&mut controller, &result, at(2));
        assert_eq!(controller.phase(), SessionPhase::PuzzleComplete);
    }

    #[test]
    fn revealing_the_solution_marks_the_puzzle_cheated() {
        let set = set_of(&["a"]);
        let (mut controller, effects) = start(&set);
        load(&mut controller, effects, puzzle("a", ROOK_FEN, ROOK_LINE), at(0));

        assert_eq!(controller.reveal_solution().unwrap(), "b1b7");
        controller.submit_move(sq("b1"), sq("b8"), at(1)).unwrap();

        let effects = controller.change_puzzle().unwrap();
        assert_eq!(effects.puzzle_commit.unwrap().delta.grade.value(), 1);
    }

    #[test]
    fn last_puzzle_commits_then_closes_the_set_once() {
        let set = set_of(&["a"]);
        let (mut controller, effects) = start(&set);
        load(&mut controller, effects, puzzle("a", ROOK_FEN, ROOK_LINE), at(0));
        controller.submit_move(sq("b1"), sq("c1"), at(1)).unwrap();
        controller.submit_move(sq("b1"), sq("b8"), at(4)).unwrap();

        let effects = controller.change_puzzle().unwrap();
        let puzzle_commit = effects.puzzle_commit.expect("puzzle committed");
        let set_commit = effects.set_commit.expect("set committed");
        assert!((set_commit.delta.total_time_secs - (4.0 + 3.0 + 1.0)).abs() < 1e-9);
        assert_eq!(puzzle_commit.delta.streak, 0);
        assert_eq!(controller.phase(), SessionPhase::SetComplete);
        assert!(controller.progress().is_complete);
        assert_eq!(controller.history().len(), 1);

        assert!(matches!(
            controller.change_puzzle(),
            Err(SessionError::NoRemainingPuzzles)
        ));
        assert!(controller.leave().is_empty());
    }

    #[test]
    fn stale_tickets_and_tokens_are_ignored() {
        let set = set_of(&["a", "b"]);
        let (mut controller, effects) = start(&set);
        let first = effects.load.clone().unwrap();
        let failed = controller.fetch_failed(&first, "timeout");
        assert!(matches!(failed.failure, Some(EngineFailure::Fetch { .. })));
        let second = failed.load.clone().unwrap();

        // The superseded fetch resolving late must not install puzzle a.
        let late = controller.puzzle_loaded(&first, puzzle("a", ROOK_FEN, ROOK_LINE), at(0));
        assert!(late.is_empty());
        assert_eq!(controller.phase(), SessionPhase::Loading);

        let loaded = controller.puzzle_loaded(&second, puzzle("b", ROOK_FEN, ROOK_LINE), at(0));
        let opening = loaded.schedule.unwrap();
        assert!(controller.fire(opening.token + 10, at(0)).unwrap().is_empty());
        assert_eq!(controller.phase(), SessionPhase::AwaitingOpponentOpening);
        let effects = controller.fire(opening.token, at(0)).unwrap();
        assert!(effects.is_empty());
        assert_eq!(controller.phase(), SessionPhase::AwaitingPlayerMove);
    }

    #[test]
    fn skipped_puzzle_leaves_the_set_open() {
        let set = set_of(&["a"]);
        let (mut controller, effects) = start(&set);
        let ticket = effects.load.unwrap();
        let effects = controller.puzzle_loaded(&ticket, puzzle("a", "not a fen", ROOK_LINE), at(0));

        assert!(matches!(effects.failure, Some(EngineFailure::Fetch { .. })));
        assert!(effects.set_commit.is_none());
        assert_eq!(controller.phase(), SessionPhase::SetComplete);
    }

    #[test]
    fn leaving_mid_puzzle_commits_nothing_and_cancels_the_reply() {
        let set = set_of(&["a"]);
        let (mut controller, effects) = start(&set);
        load(&mut controller, effects, puzzle("a", ROOK_FEN, ROOK_LINE), at(0));
        let result = controller.submit_move(sq("b1"), sq("b7"), at(1)).unwrap();
        let token = result.effects.schedule.unwrap().token;

        assert!(controller.leave().is_empty());
        assert_eq!(controller.phase(), SessionPhase::SessionEnded);
        assert!(controller.fire(token, at(2)).unwrap().is_empty());
        assert!(controller.current_puzzle().is_none());
    }

    #[test]
    fn leaving_after_a_finished_puzzle_still_commits_it() {
        let set = set_of(&["a", "b"]);
        let (mut controller, effects) = start(&set);
        load(&mut controller, effects, puzzle("a", ROOK_FEN, ROOK_LINE), at(0));
        controller.submit_move(sq("b1"), sq("b8"), at(2)).unwrap();

        let effects = controller.leave();
        assert!(effects.puzzle_commit.is_some());
        assert!(effects.set_commit.is_none());
        assert!(effects.load.is_none());
    }
}
