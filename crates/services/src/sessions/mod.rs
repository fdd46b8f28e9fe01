mod achievements;
mod controller;
mod progress;
mod validator;
mod view;
mod workflow;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use achievements::{
    AchievementEvaluator, AchievementPayload, EVALUATION_TIMEOUT, HttpAchievementConfig,
    HttpAchievementEvaluator, NoAchievements,
};
pub use controller::{
    Effects, LoadTicket, MoveOutcome, MoveResult, ScheduledTransition, SessionController,
    SessionPhase, TransitionAction,
};
pub use progress::{
    ProgressionTracker, PuzzleCommit, PuzzleSolve, SessionProgress, SetCommit, SolvedPuzzle,
};
pub use validator::{Judgement, MoveValidator};
pub use view::{SetOverview, SetOverviewService};
pub use workflow::{ActiveSession, NoticeKind, NoticeReceiver, SessionLoopService, SessionNotice};
