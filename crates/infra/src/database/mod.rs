//! SQLite persistence for attempt history

pub mod attempt_repository;
pub mod manager;

pub use attempt_repository::SqliteAttemptRepository;
pub use manager::{DbManager, SqliteConnection};
