//! Flow Journal - a small self-hosted journaling service
//!
//! Users register, then keep a daily mood journal alongside weekly, intro and
//! final reflections. Everything is served as JSON over HTTP with Basic auth
//! and stored in a single SQLite file.
//!
//! # Records
//!
//! | Record | Natural key | Route |
//! |--------|-------------|-------|
//! | intro reflection | user | `/api/intro-reflection` |
//! | daily entry | user + date | `/api/entries` |
//! | weekly reflection | user + week number | `/api/weekly-reflection` |
//! | final reflection | user | `/api/final-reflection` |
//!
//! Saving a record replaces any earlier version with the same natural key.
//!
//! # Quick Start
//!
//! ```no_run
//! use flowjournal::{Database, DailyEntryInput};
//! use chrono::NaiveDate;
//!
//! let db = Database::new("flowjournal.db").unwrap();
//! let user_id = db.register("ana", "correct horse").unwrap();
//!
//! let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
//! let mut entry = DailyEntryInput::empty(date);
//! entry.energy_level = Some(7);
//! entry.selected_emotions = vec!["calm".into()];
//! db.save_daily_entry(user_id, &entry).unwrap();
//!
//! let recent = db.list_daily_entries(user_id, 7).unwrap();
//! println!("{} entries", recent.len());
//! ```

pub mod auth;
pub mod config;
pub mod db;
pub mod journal;
pub mod logging;
pub mod schema;
pub mod serve;

pub use auth::{authenticate, AuthError, Credentials};
pub use config::Config;
pub use db::{Database, DbError, UserIdentity, UserStatus, CURRENT_SCHEMA, DEFAULT_EMOTION_WHEEL};
pub use journal::{
    DailyEntry, DailyEntryInput, DailyEntrySummary, Emotions, FinalReflection,
    FinalReflectionInput, IntroReflection, IntroReflectionInput, JournalRecord, TableSpec,
    WeeklyReflection, WeeklyReflectionInput,
};
pub use serve::{route, ApiError, ApiRequest, JournalServer, Reply, ShutdownHandle};

// Re-export TS trait for downstream use
#[cfg(feature = "ts-rs")]
pub use ts_rs::TS;
