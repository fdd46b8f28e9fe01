//! Terminal front end for a training session.

use puzzle_core::board::{PromotionPiece, Side, Square};
use puzzle_core::model::{PuzzleSetId, UserId};
use services::session::NoticeReceiver;
use services::{ActiveSession, MoveOutcome, NoticeKind, SessionError, SessionLoopService, SessionPhase};
use tokio::io::{AsyncBufReadExt, BufReader};

enum Input {
    Move {
        from: Square,
        to: Square,
        promotion: Option<PromotionPiece>,
    },
    Promote(PromotionPiece),
    Hint,
    Next,
    Quit,
    Help,
    Unknown,
}

impl Input {
    fn parse(line: &str) -> Self {
        match line {
            "hint" | "solution" => return Self::Hint,
            "next" | "n!" => return Self::Next,
            "quit" | "exit" => return Self::Quit,
            "help" | "?" => return Self::Help,
            _ => {}
        }

        let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
        let mut chars = compact.chars();
        if compact.len() == 1 {
            return chars
                .next()
                .and_then(PromotionPiece::from_char)
                .map_or(Self::Unknown, Self::Promote);
        }
        if !(4..=5).contains(&compact.len()) {
            return Self::Unknown;
        }
        let (Ok(from), Ok(to)) = (compact[0..2].parse(), compact[2..4].parse()) else {
            return Self::Unknown;
        };
        let promotion = compact[4..].chars().next().and_then(PromotionPiece::from_char);
        Self::Move {
            from,
            to,
            promotion,
        }
    }
}

fn print_help() {
    println!("moves: e2e4 or e2 e4 (append q/r/b/n to promote)");
    println!("commands: hint, next, quit, help");
}

fn show(session: &ActiveSession) {
    let controller = session.controller();
    let progress = session.progress();
    if let Some(puzzle) = controller.current_puzzle() {
        let side = match controller.orientation() {
            Some(Side::White) => "white",
            Some(Side::Black) => "black",
            None => "-",
        };
        println!(
            "[{}/{}] puzzle {} ({}), you play {side}",
            progress.completed + 1,
            progress.total,
            puzzle.id(),
            puzzle.themes().join(" ")
        );
    }
    if let Some(fen) = controller.board_fen() {
        println!("  {fen}");
    }
    if let Some(last) = controller.last_move() {
        let check = if last.gives_check { "+" } else { "" };
        println!("  last move {}{check}", last.mv);
    }
    match session.phase() {
        SessionPhase::PuzzleComplete => println!("  solved! type `next` to continue"),
        SessionPhase::AwaitingPromotionChoice => println!("  promote to q, r, b or n?"),
        SessionPhase::MistakeRegistered => {
            println!("  not the move ({} mistakes), try again", controller.mistakes());
        }
        _ => {}
    }
}

fn report_outcome(result: Result<MoveOutcome, SessionError>) {
    match result {
        Ok(MoveOutcome::Illegal) => println!("illegal move"),
        Ok(MoveOutcome::PromotionPending { .. }) => {}
        Ok(MoveOutcome::Correct { played, .. }) => {
            let capture = if played.captured { " (capture)" } else { "" };
            println!("correct: {}{capture}", played.mv);
        }
        Ok(MoveOutcome::Incorrect { played, .. }) => println!("{} is wrong", played.mv),
        Err(err) => println!("{err}"),
    }
}

fn report_notices(notices: &mut NoticeReceiver) {
    while let Ok(notice) = notices.try_recv() {
        match notice.kind {
            NoticeKind::Failure(failure) => println!("! {failure}"),
            NoticeKind::AchievementsUnlocked(ids) => {
                for id in ids {
                    println!("* achievement unlocked: {id}");
                }
            }
            NoticeKind::SetCompleted { cycles, total_time } => {
                println!("* cycle {cycles} finished in {total_time:.2}s");
            }
            _ => {}
        }
    }
}

/// Play set `set_id` on stdin/stdout until the pass ends or the player quits.
///
/// # Errors
///
/// Returns an error if the session cannot start or stdin fails.
pub async fn run(
    svc: &SessionLoopService,
    set_id: PuzzleSetId,
    user_id: UserId,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut session, mut notices) = svc.start_session(set_id, user_id).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_help();

    loop {
        report_notices(&mut notices);
        if session.phase().is_terminal() {
            break;
        }
        show(&session);

        let Some(line) = lines.next_line().await? else {
            session.leave().await?;
            break;
        };
        match Input::parse(line.trim()) {
            Input::Move {
                from,
                to,
                promotion,
            } => {
                let result = session.submit_move(from, to).await;
                match (result, promotion) {
                    (Ok(MoveOutcome::PromotionPending { .. }), Some(piece)) => {
                        report_outcome(session.choose_promotion(piece).await);
                    }
                    (result, _) => report_outcome(result),
                }
            }
            Input::Promote(piece) => report_outcome(session.choose_promotion(piece).await),
            Input::Hint => match session.reveal_solution() {
                Ok(token) => println!("solution move: {token}"),
                Err(err) => println!("{err}"),
            },
            Input::Next => {
                if let Err(err) = session.next_puzzle().await {
                    println!("{err}");
                }
            }
            Input::Quit => {
                session.leave().await?;
                break;
            }
            Input::Help => print_help(),
            Input::Unknown => println!("unrecognised input, type `help`"),
        }
    }

    session.flush().await;
    report_notices(&mut notices);

    let history = session.controller().history();
    if !history.is_empty() {
        println!("solved this session:");
        for solved in history {
            println!("  {} grade {}", solved.puzzle_id, solved.grade);
        }
    }
    if session.phase() == SessionPhase::SetComplete && history.is_empty() {
        println!("nothing left to play in this set");
    }
    Ok(())
}
