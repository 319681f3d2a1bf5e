//! The commands the CLI wires up. Each command is a thin orchestration of
//! the executor, the state readers and the connector capabilities; none of
//! them format user-facing text.

mod create_migration;
mod lint;
mod migrate_set;
mod migrate_status;
mod schema_cmds;

pub use create_migration::{create_migration, CreateMigrationParams};
pub use lint::{migrate_lint, split_files, ChangeDetector, LintParams};
pub use migrate_set::migrate_set;
pub use migrate_status::{migrate_status, MigrationStatus, StatusReport};
pub use schema_cmds::{
    schema_apply_execute, schema_clean, schema_inspect, schema_plan, SchemaApplyTxMode, SchemaPlanParams,
};

use crate::dev::DevSession;
use crate::executor::{replay, ValidationMode};
use chrono::Utc;
use schema_connector::{version_timestamp, ConnectorResult, LocalDir, SchemaConnector};
use std::time::Duration;

/// `migrate hash`: recompute and rewrite the sum file.
pub fn migrate_hash(dir: &LocalDir) -> ConnectorResult<()> {
    dir.sync_sum()
}

/// `migrate new`: create an empty migration file and re-seal the directory.
/// Returns the created file name.
pub fn migrate_new(dir: &LocalDir, name: &str) -> ConnectorResult<String> {
    let version = version_timestamp(Utc::now());
    let file_name = if name.is_empty() {
        format!("{version}.sql")
    } else {
        format!("{version}_{name}.sql")
    };
    dir.write_file(&file_name, "")?;
    dir.sync_sum()?;
    Ok(file_name)
}

/// `migrate validate`: check directory integrity, and, when a dev database
/// is given, prove the directory replays cleanly on it.
pub async fn migrate_validate(
    dir: &LocalDir,
    dev: Option<&mut dyn SchemaConnector>,
    lock_timeout: Duration,
) -> ConnectorResult<()> {
    if dir.files()?.is_empty() {
        return Ok(());
    }
    dir.validate()?;

    if let Some(dev) = dev {
        let mut session = DevSession::acquire(dev, lock_timeout).await?;
        let replayed = replay(session.conn(), dir, None, ValidationMode::Require).await;
        let closed = session.close().await;
        replayed?;
        closed?;
    }

    Ok(())
}

/// Integrity check shared by the commands that read a directory: an empty
/// directory is fine, a non-empty one must match its sum file.
pub(crate) fn ensure_sealed(dir: &LocalDir) -> ConnectorResult<()> {
    if dir.files()?.is_empty() {
        return Ok(());
    }
    dir.validate()
}
