//! `migrate status`: where the target database stands relative to the
//! directory.

use super::ensure_sealed;
use schema_connector::{ConnectorResult, LocalDir, RevisionStore as _, SchemaConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    Ok,
    Pending,
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatus::Ok => f.write_str("OK"),
            MigrationStatus::Pending => f.write_str("PENDING"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: MigrationStatus,
    /// The highest fully applied version.
    pub current: Option<String>,
    pub executed: usize,
    pub pending_files: Vec<String>,
    /// Set when the last revision stopped mid-file.
    pub partially_applied: Option<String>,
}

pub async fn migrate_status(connector: &mut dyn SchemaConnector, dir: &LocalDir) -> ConnectorResult<StatusReport> {
    ensure_sealed(dir)?;
    let files = dir.files()?;

    // A missing ledger table simply means nothing was applied yet.
    let revisions = connector.read_revisions().await.unwrap_or_default();

    let current = revisions
        .iter()
        .filter(|r| r.is_applied())
        .map(|r| r.version.clone())
        .max();

    let partially_applied = revisions
        .iter()
        .find(|r| !r.is_applied())
        .map(|r| r.version.clone());

    let pending_files: Vec<String> = files
        .iter()
        .filter(|f| match (&current, &partially_applied) {
            (_, Some(partial)) => f.version.as_str() >= partial.as_str(),
            (Some(current), None) => f.version.as_str() > current.as_str(),
            (None, None) => true,
        })
        .map(|f| f.file_name.clone())
        .collect();

    let status = if pending_files.is_empty() {
        MigrationStatus::Ok
    } else {
        MigrationStatus::Pending
    };

    Ok(StatusReport {
        status,
        current,
        executed: revisions.len(),
        pending_files,
        partially_applied,
    })
}
