//! # Steadycall Infrastructure
//!
//! Infrastructure implementations of the core ports.
//!
//! This crate contains:
//! - SQLite attempt storage (r2d2 pool, WAL mode)
//! - An in-memory attempt store
//! - Configuration loading from files and the environment
//! - Tracing subscriber setup
//! - Executor bootstrap and retention cleanup
//!
//! ## Architecture
//! - Implements traits defined in `steadycall-core`
//! - Contains all "impure" code (filesystem, database, environment)

pub mod bootstrap;
pub mod config;
pub mod database;
pub mod errors;
pub mod memory_store;
pub mod observability;

// Re-export commonly used items
pub use bootstrap::{build_executor, purge_expired};
pub use database::{DbManager, SqliteAttemptRepository};
pub use errors::InfraError;
pub use memory_store::InMemoryAttemptStore;
pub use observability::init_tracing;
