use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use puzzle_core::board::{PromotionPiece, RulesEngine, Square};
use puzzle_core::model::{
    AchievementId, PuzzleSetId, SessionId, SessionSettings, UserId, UserStatsDelta,
};
use storage::repository::{PuzzleRepository, PuzzleSetRepository, Storage, UserRepository};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::achievements::{AchievementEvaluator, AchievementPayload, EVALUATION_TIMEOUT};
use super::controller::{Effects, LoadTicket, MoveOutcome, SessionController, SessionPhase};
use super::progress::{PuzzleCommit, SessionProgress, SetCommit};
use crate::Clock;
use crate::error::{AchievementError, EngineFailure, SessionError};

//
// ─── NOTICES ───────────────────────────────────────────────────────────────────
//

/// Something the surrounding application should report to the player.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionNotice {
    pub session_id: SessionId,
    pub kind: NoticeKind,
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum NoticeKind {
    /// A fetch or write failed; the session kept going.
    Failure(EngineFailure),
    AchievementsUnlocked(Vec<AchievementId>),
    /// The pass was persisted as the set's `cycles`-th completed cycle.
    SetCompleted { cycles: u32, total_time: f64 },
}

pub type NoticeReceiver = mpsc::UnboundedReceiver<SessionNotice>;

#[derive(Clone)]
struct Notifier {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<SessionNotice>,
}

impl Notifier {
    fn send(&self, kind: NoticeKind) {
        // Nobody listening is fine.
        let _ = self.tx.send(SessionNotice {
            session_id: self.session_id,
            kind,
        });
    }

    fn failure(&self, failure: EngineFailure) {
        tracing::warn!(session_id = %self.session_id, error = %failure, "session failure");
        self.send(NoticeKind::Failure(failure));
    }
}

//
// ─── BACKGROUND WORKERS ────────────────────────────────────────────────────────
//

enum Job<T> {
    Run(T),
    Flush(oneshot::Sender<()>),
}

/// Applies queued jobs one after another, off the session's path.
///
/// Workers hold no session state: results can only surface as notices.
#[async_trait]
trait Worker: Send + Sync + 'static {
    type Job: Send + 'static;

    async fn apply(&self, job: Self::Job);
}

async fn run_worker<W: Worker>(worker: W, mut jobs: mpsc::UnboundedReceiver<Job<W::Job>>) {
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Run(job) => worker.apply(job).await,
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Sending half of a worker, plus its task handle.
struct WorkQueue<T> {
    tx: Option<mpsc::UnboundedSender<Job<T>>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkQueue<T> {
    fn spawn<W: Worker<Job = T>>(worker: W) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(worker, rx));
        Self {
            tx: Some(tx),
            worker: Some(handle),
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Job<T>>> {
        self.tx.clone()
    }

    fn push(&self, job: T) {
        match &self.tx {
            Some(tx) if tx.send(Job::Run(job)).is_ok() => {}
            _ => tracing::warn!("work queue closed; dropping job"),
        }
    }

    fn close(&mut self) {
        self.tx = None;
    }

    /// Wait for jobs queued so far, or for the worker to exit once closed.
    async fn flush(&mut self) {
        if let Some(tx) = &self.tx {
            let (done, wait) = oneshot::channel();
            if tx.send(Job::Flush(done)).is_ok() {
                let _ = wait.await;
            }
        } else if let Some(handle) = self.worker.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "background worker stopped abnormally");
            }
        }
    }
}

enum CommitJob {
    Puzzle(Box<PuzzleCommit>),
    Set { commit: SetCommit, cycles: u32 },
}

/// Writes puzzle, set and user deltas in the order they were produced.
struct CommitWorker {
    sets: Arc<dyn PuzzleSetRepository>,
    users: Arc<dyn UserRepository>,
    achievements: Option<mpsc::UnboundedSender<Job<AchievementPayload>>>,
    notifier: Notifier,
}

#[async_trait]
impl Worker for CommitWorker {
    type Job = CommitJob;

    async fn apply(&self, job: CommitJob) {
        match job {
            CommitJob::Puzzle(commit) => self.apply_puzzle(*commit).await,
            CommitJob::Set { commit, cycles } => self.apply_set(commit, cycles).await,
        }
    }
}

impl CommitWorker {
    async fn apply_puzzle(&self, commit: PuzzleCommit) {
        let puzzle_id = &commit.delta.puzzle_id;
        match self
            .sets
            .record_puzzle_completion(commit.set_id, &commit.delta)
            .await
        {
            Ok(entry) => tracing::debug!(
                puzzle_id = %puzzle_id,
                grades = entry.grades.len(),
                "puzzle progress saved"
            ),
            Err(err) => self.notifier.failure(EngineFailure::Persistence {
                target: format!("puzzle {puzzle_id} in set {}", commit.set_id),
                reason: err.to_string(),
            }),
        }

        self.apply_user(commit.user_id, &commit.user_delta).await;

        // Checked after the user write so the evaluator sees updated counters.
        if let Some(tx) = &self.achievements {
            let _ = tx.send(Job::Run(commit.achievements));
        }
    }

    async fn apply_set(&self, commit: SetCommit, cycles: u32) {
        match self
            .sets
            .record_cycle_completion(commit.set_id, &commit.delta)
            .await
        {
            Ok(()) => self.notifier.send(NoticeKind::SetCompleted {
                cycles,
                total_time: commit.delta.total_time_secs,
            }),
            Err(err) => self.notifier.failure(EngineFailure::Persistence {
                target: format!("set {}", commit.set_id),
                reason: err.to_string(),
            }),
        }
        self.apply_user(commit.user_id, &commit.user_delta).await;
    }

    async fn apply_user(&self, user_id: UserId, delta: &UserStatsDelta) {
        if delta.is_empty() {
            return;
        }
        if let Err(err) = self.users.apply_user_delta(user_id, delta).await {
            self.notifier.failure(EngineFailure::Persistence {
                target: format!("user {user_id}"),
                reason: err.to_string(),
            });
        }
    }
}

/// Runs achievement checks on their own queue so a slow evaluator never
/// holds back progress writes.
struct AchievementWorker {
    evaluator: Arc<dyn AchievementEvaluator>,
    timeout: Duration,
    notifier: Notifier,
}

#[async_trait]
impl Worker for AchievementWorker {
    type Job = AchievementPayload;

    async fn apply(&self, payload: AchievementPayload) {
        let result = tokio::time::timeout(self.timeout, self.evaluator.evaluate(&payload))
            .await
            .unwrap_or_else(|_| Err(AchievementError::TimedOut(self.timeout)));
        match result {
            Ok(unlocked) if unlocked.is_empty() => {}
            Ok(unlocked) => {
                tracing::info!(count = unlocked.len(), "achievements unlocked");
                self.notifier.send(NoticeKind::AchievementsUnlocked(unlocked));
            }
            Err(err) => self.notifier.failure(EngineFailure::Achievements {
                reason: err.to_string(),
            }),
        }
    }
}

//
// ─── SESSION LOOP SERVICE ──────────────────────────────────────────────────────
//

/// Starts training sessions against storage.
#[derive(Clone)]
pub struct SessionLoopService {
    clock: Clock,
    puzzles: Arc<dyn PuzzleRepository>,
    sets: Arc<dyn PuzzleSetRepository>,
    users: Arc<dyn UserRepository>,
    rules: Arc<dyn RulesEngine>,
    achievements: Arc<dyn AchievementEvaluator>,
    achievement_timeout: Duration,
    settings: SessionSettings,
}

impl SessionLoopService {
    #[must_use]
    pub fn new(
        clock: Clock,
        storage: &Storage,
        rules: Arc<dyn RulesEngine>,
        achievements: Arc<dyn AchievementEvaluator>,
    ) -> Self {
        Self {
            clock,
            puzzles: Arc::clone(&storage.puzzles),
            sets: Arc::clone(&storage.sets),
            users: Arc::clone(&storage.users),
            rules,
            achievements,
            achievement_timeout: EVALUATION_TIMEOUT,
            settings: SessionSettings::default(),
        }
    }

    /// Give up on an achievement check after `timeout`.
    #[must_use]
    pub fn with_achievement_timeout(mut self, timeout: Duration) -> Self {
        self.achievement_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a pass over the set's unplayed puzzles.
    ///
    /// Returns once the first puzzle is on the board and waiting for the
    /// player (or the pass is already over), together with the notice stream.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SetNotFound`/`UserNotFound` for unknown IDs and
    /// `SessionError::Storage` when they cannot be loaded.
    pub async fn start_session(
        &self,
        set_id: PuzzleSetId,
        user_id: UserId,
    ) -> Result<(ActiveSession, NoticeReceiver), SessionError> {
        let set = self
            .sets
            .get_set(set_id)
            .await?
            .ok_or(SessionError::SetNotFound(set_id))?;
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or(SessionError::UserNotFound(user_id))?;

        let session_id = SessionId::random();
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Notifier { session_id, tx };
        let achievements = WorkQueue::spawn(AchievementWorker {
            evaluator: Arc::clone(&self.achievements),
            timeout: self.achievement_timeout,
            notifier: notifier.clone(),
        });
        let commits = WorkQueue::spawn(CommitWorker {
            sets: Arc::clone(&self.sets),
            users: Arc::clone(&self.users),
            achievements: achievements.sender(),
            notifier: notifier.clone(),
        });

        let (controller, effects) = SessionController::start(
            &set,
            user,
            self.settings.clone(),
            Arc::clone(&self.rules),
        );
        tracing::info!(%session_id, %set_id, %user_id, "training session opened");

        let mut session = ActiveSession {
            id: session_id,
            clock: self.clock.clone(),
            controller,
            puzzles: Arc::clone(&self.puzzles),
            commits,
            achievements,
            notifier,
            next_cycle: set.cycles().saturating_add(1),
        };
        session.drive(effects).await?;
        Ok((session, rx))
    }
}

//
// ─── ACTIVE SESSION ────────────────────────────────────────────────────────────
//

/// A running session: the controller plus the I/O it asks for.
///
/// Every command returns once the session has settled, that is after any
/// opponent reply has been played and the next puzzle fetched. Dropping the
/// session closes the background queues; queued work still gets applied.
pub struct ActiveSession {
    id: SessionId,
    clock: Clock,
    controller: SessionController,
    puzzles: Arc<dyn PuzzleRepository>,
    commits: WorkQueue<CommitJob>,
    achievements: WorkQueue<AchievementPayload>,
    notifier: Notifier,
    next_cycle: u32,
}

impl ActiveSession {
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Read access to board, history and per-puzzle state.
    #[must_use]
    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.controller.phase()
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        self.controller.progress()
    }

    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` when the player is not on move.
    pub async fn submit_move(
        &mut self,
        from: Square,
        to: Square,
    ) -> Result<MoveOutcome, SessionError> {
        let result = self.controller.submit_move(from, to, self.clock.now())?;
        self.drive(result.effects).await?;
        Ok(result.outcome)
    }

    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless a promotion is pending.
    pub async fn choose_promotion(
        &mut self,
        piece: PromotionPiece,
    ) -> Result<MoveOutcome, SessionError> {
        let result = self.controller.choose_promotion(piece, self.clock.now())?;
        self.drive(result.effects).await?;
        Ok(result.outcome)
    }

    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` unless a promotion is pending.
    pub fn cancel_promotion(&mut self) -> Result<(), SessionError> {
        self.controller.cancel_promotion()
    }

    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` when it is not the player's turn.
    pub fn reveal_solution(&mut self) -> Result<String, SessionError> {
        self.controller.reveal_solution()
    }

    /// Commit the finished puzzle and load the next one.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoRemainingPuzzles` after the pass is over.
    pub async fn next_puzzle(&mut self) -> Result<(), SessionError> {
        let effects = self.controller.change_puzzle()?;
        self.drive(effects).await
    }

    /// End the session and close the background queues.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` only if driving the final effects fails.
    pub async fn leave(&mut self) -> Result<(), SessionError> {
        let effects = self.controller.leave();
        let result = self.drive(effects).await;
        self.commits.close();
        self.achievements.close();
        result
    }

    /// Wait until every queued write has been applied and every achievement
    /// check has answered or timed out.
    pub async fn flush(&mut self) {
        self.commits.flush().await;
        self.achievements.flush().await;
    }

    /// Carry out effects until the controller has nothing left to do.
    async fn drive(&mut self, effects: Effects) -> Result<(), SessionError> {
        let mut pending = Some(effects);
        while let Some(effects) = pending.take() {
            if let Some(failure) = effects.failure {
                self.notifier.failure(failure);
            }
            if let Some(commit) = effects.puzzle_commit {
                self.commits.push(CommitJob::Puzzle(Box::new(commit)));
            }
            if let Some(commit) = effects.set_commit {
                self.commits.push(CommitJob::Set {
                    commit,
                    cycles: self.next_cycle,
                });
            }

            if let Some(ticket) = effects.load {
                pending = Some(self.fetch(ticket).await);
            } else if let Some(transition) = effects.schedule {
                if !transition.delay.is_zero() {
                    tokio::time::sleep(transition.delay).await;
                }
                pending = Some(self.controller.fire(transition.token, self.clock.now())?);
            } else if self.controller.phase() == SessionPhase::PuzzleComplete
                && self.controller.settings().auto_advance()
            {
                pending = Some(self.controller.change_puzzle()?);
            }
        }
        Ok(())
    }

    async fn fetch(&mut self, ticket: LoadTicket) -> Effects {
        match self.puzzles.get_puzzle(ticket.puzzle_id()).await {
            Ok(Some(puzzle)) => self
                .controller
                .puzzle_loaded(&ticket, puzzle, self.clock.now()),
            Ok(None) => self.controller.fetch_failed(&ticket, "puzzle not found"),
            Err(err) => self.controller.fetch_failed(&ticket, err.to_string()),
        }
    }
}
