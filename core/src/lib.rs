//! The command core of the schema-management toolkit.
//!
//! Everything here orchestrates the connector capabilities: the executor
//! plays migration directories against a target database under the revision
//! ledger; the state readers turn URLs into realms; the dev-database
//! session wraps the lock/clean-check/snapshot protocol; the commands tie
//! those together for the CLI. No user-facing formatting happens in this
//! crate — commands return structured values and emit structured events.

pub mod commands;
pub mod dev;
pub mod executor;
pub mod state;

pub use dev::{DevSession, DEV_LOCK_NAME};
pub use executor::{apply_migrations, replay, ExecutionSummary, ExecutorOptions, ValidationMode};
pub use state::{read_realm, StateSource};

/// The advisory lock serializing executions against one target database.
pub const LOCK_NAME: &str = "atlas_migration_execute";
