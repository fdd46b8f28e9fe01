#![forbid(unsafe_code)]

pub mod app_services;
pub mod error;
pub mod import_service;
pub mod sessions;

pub use puzzle_core::Clock;
pub use sessions as session;

pub use app_services::AppServices;
pub use error::{AchievementError, AppServicesError, EngineFailure, ImportError, SessionError};
pub use import_service::{ImportReport, PuzzleImportService, parse_puzzle_row};

pub use sessions::{
    ActiveSession, MoveOutcome, NoticeKind, SessionLoopService, SessionNotice, SessionPhase,
    SetOverview, SetOverviewService,
};
