//! The revision ledger: one row per migration file applied to a target
//! database, with statement-level progress.

use crate::ConnectorResult;
use chrono::{DateTime, Utc};
use enumflags2::{bitflags, BitFlags};

/// The default name of the ledger table.
pub const DEFAULT_REVISION_TABLE: &str = "atlas_schema_revisions";

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionKind {
    /// A synthetic revision marking the starting point of an existing
    /// database; nothing was executed for it.
    Baseline,
    /// A regular file execution.
    Execute,
    /// The user declared the revision manually resolved after a failure.
    Resolved,
    /// The revision marks a checkpoint file.
    Checkpoint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    pub version: String,
    pub description: String,
    pub kind: BitFlags<RevisionKind>,
    pub executed_at: DateTime<Utc>,
    pub execution_time_ms: i64,
    /// Statements applied so far. Always `<= total`.
    pub applied: usize,
    /// Total statements of the file at execution time.
    pub total: usize,
    /// Hash of the file bytes.
    pub hash: String,
    /// Hash of each applied statement, in order. Enables resume to detect
    /// edits of the already-executed prefix.
    pub partial_hashes: Vec<String>,
    pub operator_version: String,
    pub error: Option<String>,
    pub error_stmt: Option<String>,
    pub meta: Option<serde_json::Value>,
}

impl Revision {
    pub fn new(version: impl Into<String>, description: impl Into<String>, operator_version: impl Into<String>) -> Self {
        Revision {
            version: version.into(),
            description: description.into(),
            kind: RevisionKind::Execute.into(),
            executed_at: Utc::now(),
            execution_time_ms: 0,
            applied: 0,
            total: 0,
            hash: String::new(),
            partial_hashes: Vec::new(),
            operator_version: operator_version.into(),
            error: None,
            error_stmt: None,
            meta: None,
        }
    }

    pub fn baseline(version: impl Into<String>, operator_version: impl Into<String>) -> Self {
        let mut revision = Revision::new(version, "baseline", operator_version);
        revision.kind = RevisionKind::Baseline | RevisionKind::Resolved;
        revision
    }

    pub fn is_resolved(&self) -> bool {
        self.kind.contains(RevisionKind::Resolved)
    }

    /// A revision counts as fully applied once every statement ran, or once
    /// it was explicitly resolved (errors may still be recorded).
    pub fn is_applied(&self) -> bool {
        self.is_resolved() || self.applied >= self.total
    }
}

/// Persistence of revisions on the target database. Implementations keep
/// rows ordered by execution time, ties broken by version.
#[async_trait::async_trait]
pub trait RevisionStore {
    /// Ensures the ledger table exists.
    async fn ledger_up(&mut self) -> ConnectorResult<()>;

    /// All revisions, ascending by `executed_at`, then by version.
    async fn read_revisions(&mut self) -> ConnectorResult<Vec<Revision>>;

    /// Inserts or replaces the revision with the same version.
    async fn write_revision(&mut self, revision: &Revision) -> ConnectorResult<()>;

    async fn delete_revision(&mut self, version: &str) -> ConnectorResult<()>;
}
