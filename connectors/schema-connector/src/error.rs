//! The error taxonomy shared by every connector and by the command layer.
//!
//! Integrity and execution errors are never swallowed; "no changes" and "no
//! pending files" are not errors at all and are reported through the
//! structured outcomes of the respective operations.

use std::time::Duration;

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// A caller mistake: missing or contradictory inputs. Mapped to exit
    /// code 1 by the command layer.
    #[error("{0}")]
    Configuration(String),

    /// The dialect cannot express the requested change.
    #[error("unsupported change: {0}")]
    UnsupportedChange(String),

    /// A migration file does not match its recorded hash. Re-running
    /// `atlas migrate hash` re-seals the directory.
    #[error("checksum mismatch for {file} (run `atlas migrate hash` after editing migration files)")]
    ChecksumMismatch { file: String },

    #[error("checksum file not found (run `atlas migrate hash` to create atlas.sum)")]
    ChecksumNotFound,

    /// An already-applied migration file changed on disk after being applied.
    #[error("applied migration {file} was modified after execution: {reason}")]
    HistoryChanged { file: String, reason: String },

    /// Migration files exist with versions lower than already-applied ones.
    #[error("migration history is non-linear: files {out_of_order:?} are out of order with the applied revisions")]
    HistoryNonLinear {
        pending: Vec<String>,
        out_of_order: Vec<String>,
    },

    /// The revision ledger references a version with no file in the directory.
    #[error("revision {version} has no matching migration file in the directory")]
    MissingMigration { version: String },

    /// The target database contains objects but no revision ledger, and
    /// neither `--allow-dirty` nor a baseline was given.
    #[error("target database is not empty (found {object}); use a baseline version or --allow-dirty")]
    DirtyDatabase { object: String },

    /// The dev database must be empty and is not. Never auto-cleaned.
    #[error("dev database is not clean: found {object_kind} {object_name:?}")]
    NotClean {
        object_kind: String,
        object_name: String,
    },

    /// Advisory lock contention.
    #[error("advisory lock {name:?} is held by another process")]
    Locked { name: String },

    #[error("could not acquire advisory lock {name:?} within {timeout:?}")]
    LockTimeout { name: String, timeout: Duration },

    /// A file-level `atlas:txmode` directive contradicts the requested mode.
    #[error("transaction mode conflict in {file}: directive requests {directive:?}, execution runs with {requested:?}")]
    TxModeConflict {
        file: String,
        directive: crate::TxMode,
        requested: crate::TxMode,
    },

    /// A statement of a migration file failed on the target database.
    #[error("migration {version} failed: {message}\n\nstatement:\n{statement}")]
    Statement {
        version: String,
        statement: String,
        message: String,
    },

    /// The differ received malformed input. No I/O is involved.
    #[error("cannot diff: {message}")]
    Diff { message: String },

    /// A database-level failure outside of statement execution.
    #[error("{message}")]
    Database { message: String },

    /// A subprocess (such as git) failed or is missing.
    #[error("{program}: {message}")]
    Subprocess { program: String, message: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConnectorError {
    pub fn configuration(message: impl Into<String>) -> Self {
        ConnectorError::Configuration(message.into())
    }

    pub fn database(message: impl std::fmt::Display) -> Self {
        ConnectorError::Database {
            message: message.to_string(),
        }
    }

    pub fn diff(message: impl Into<String>) -> Self {
        ConnectorError::Diff {
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ConnectorError::Io {
            context: context.into(),
            source,
        }
    }

    /// Errors caused by caller input rather than by the operation itself.
    /// The command layer maps these to exit code 1 and shows usage.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ConnectorError::Configuration(_) | ConnectorError::TxModeConflict { .. }
        )
    }
}
