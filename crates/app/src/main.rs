use std::fmt;

use puzzle_core::model::{PuzzleSetId, SessionSettings, UserId};
use services::{AppServices, Clock, SetOverview};
use tracing_subscriber::EnvFilter;

mod play;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidId { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    MissingFile,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::MissingFile => write!(f, "import requires --file <csv>"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_id(flag: &'static str, value: String) -> Result<u64, ArgsError> {
    value
        .parse::<u64>()
        .map_err(|_| ArgsError::InvalidId { flag, raw: value })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Play,
    Import,
    Stats,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "play" => Some(Self::Play),
            "import" => Some(Self::Import),
            "stats" => Some(Self::Stats),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    user_id: UserId,
    set_id: Option<PuzzleSetId>,
    auto_advance: bool,
    file: Option<String>,
    title: Option<String>,
    limit: Option<usize>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("PUZZLE_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://puzzles.sqlite3".into(), normalize_sqlite_url);
        let mut user_id = std::env::var("PUZZLE_USER_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| UserId::new(1), UserId::new);
        let mut set_id = None;
        let mut auto_advance = false;
        let mut file = None;
        let mut title = None;
        let mut limit = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--user-id" => {
                    let value = require_value(args, "--user-id")?;
                    user_id = UserId::new(parse_id("--user-id", value)?);
                }
                "--set-id" => {
                    let value = require_value(args, "--set-id")?;
                    set_id = Some(PuzzleSetId::new(parse_id("--set-id", value)?));
                }
                "--auto-advance" => auto_advance = true,
                "--file" => file = Some(require_value(args, "--file")?),
                "--title" => title = Some(require_value(args, "--title")?),
                "--limit" => {
                    let value = require_value(args, "--limit")?;
                    let parsed = parse_id("--limit", value)?;
                    limit = usize::try_from(parsed).ok();
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            user_id,
            set_id,
            auto_advance,
            file,
            title,
            limit,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- play   [--set-id <id>] [--auto-advance]");
    eprintln!("  cargo run -p app -- import --file <csv> [--set-id <id>] [--title <t>] [--limit <n>]");
    eprintln!("  cargo run -p app -- stats  [--set-id <id>]");
    eprintln!();
    eprintln!("Common options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite://puzzles.sqlite3)");
    eprintln!("  --user-id <id>            Player id (default: 1)");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PUZZLE_DB_URL, PUZZLE_USER_ID, ACHIEVEMENTS_URL, RUST_LOG (.env is read)");
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn print_overview(overview: &SetOverview) {
    let secs = |v: Option<f64>| v.map_or_else(|| "-".to_owned(), |s| format!("{s:.2}s"));
    println!("#{} {}", overview.set_id, overview.title);
    println!(
        "  progress {}/{} ({:.0}%), cycles {}",
        overview.progression,
        overview.length,
        overview.completion_ratio() * 100.0,
        overview.cycles
    );
    println!(
        "  best {}  last {}  average {}  change {}",
        secs(overview.best_time),
        secs(overview.last_time),
        secs(overview.average_time),
        secs(overview.last_change)
    );
    let grade = overview
        .average_grade
        .map_or_else(|| "-".to_owned(), |g| format!("{g:.2}"));
    println!("  average grade {grade}, mistakes {}", overview.total_mistakes);
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None => Command::Play,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Play,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let parsed = Args::parse(&mut argv.into_iter()).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let settings = SessionSettings::default().with_auto_advance(parsed.auto_advance);
    let app = AppServices::new_sqlite(&parsed.db_url, Clock::default_clock(), settings).await?;

    match cmd {
        Command::Import => {
            let path = parsed.file.as_deref().ok_or(ArgsError::MissingFile)?;
            let csv = tokio::fs::read_to_string(path).await?;
            let set_id = parsed.set_id.unwrap_or_else(|| PuzzleSetId::new(1));
            let title = parsed.title.clone().unwrap_or_else(|| path.to_owned());
            let report = app
                .importer()
                .import_csv(&csv, set_id, parsed.user_id, &title, parsed.limit)
                .await?;
            println!(
                "imported {} puzzles into set #{} ({} rows skipped)",
                report.imported, report.set_id, report.skipped
            );
            Ok(())
        }
        Command::Stats => {
            let overviews = app.overviews();
            let listed = match parsed.set_id {
                Some(set_id) => vec![overviews.overview(set_id).await?],
                None => overviews.list_overviews(parsed.user_id).await?,
            };
            if listed.is_empty() {
                println!("no puzzle sets for user {}", parsed.user_id);
            }
            for overview in &listed {
                print_overview(overview);
            }
            Ok(())
        }
        Command::Play => {
            let set_id = parsed.set_id.unwrap_or_else(|| PuzzleSetId::new(1));
            play::run(&app.session_loop(), set_id, parsed.user_id).await?;
            if let Ok(overview) = app.overviews().overview(set_id).await {
                print_overview(&overview);
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
