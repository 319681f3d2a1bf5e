//! The contract between the command layer and the per-dialect connectors.
//!
//! A connector is a bundle of capabilities over one database: introspection,
//! diffing, plan generation, raw execution, advisory locking, cleanliness
//! checking and the revision ledger. The command layer only ever talks to
//! `dyn SchemaConnector`; optional capabilities (snapshotting, dev-database
//! normalization) are discovered by probing, not assumed.
//!
//! This crate also owns everything connector-independent: the change and
//! plan vocabulary, the migration directory with its integrity manifest, SQL
//! statement and directive scanning, revision types, structured execution
//! events and the lint report model.

mod change;
mod checks;
mod directives;
mod error;
mod events;
mod format;
mod migrations;
mod plan;
mod revisions;
mod statements;

pub use change::{
    Change, ChangeCategory, ColumnChange, ColumnRename, DiffOptions, Migration, Pair, TableChange, TableRename,
};
pub use checks::{Analyzer, CheckFile, Diagnostic, Report, Reporter, StmtChanges};
pub use directives::{
    delimiter_directive, scan_directives, tx_mode_directive, Directive, TxMode, DIRECTIVE_DELIMITER,
    DIRECTIVE_NOLINT, DIRECTIVE_PREFIX, DIRECTIVE_TXMODE,
};
pub use error::{ConnectorError, ConnectorResult};
pub use events::{ExecutionLog, ExecutionLogger, MemoryLogger, NopLogger};
pub use format::{DefaultFormatter, Formatter};
pub use migrations::{hash_bytes, version_timestamp, HashFile, LocalDir, MigrationFile, SUM_FILE_NAME};
pub use plan::{Plan, PlanChange, PlanOptions};
pub use revisions::{Revision, RevisionKind, RevisionStore, DEFAULT_REVISION_TABLE};
pub use statements::{split_sql_statements, Stmt};

use sql_realm::Realm;
use std::time::Duration;

/// Filters applied while introspecting.
#[derive(Debug, Default, Clone)]
pub struct InspectOptions {
    /// Restrict to these schemas. Empty means all.
    pub schemas: Vec<String>,
    /// Restrict to these tables. Empty means all.
    pub tables: Vec<String>,
    /// Glob patterns (over `table` and `schema.table`) to leave out.
    pub exclude: Vec<String>,
}

impl InspectOptions {
    pub fn includes_schema(&self, name: &str) -> bool {
        (self.schemas.is_empty() || self.schemas.iter().any(|s| s == name))
            && !self.exclude.iter().any(|p| glob_match(p, name))
    }

    pub fn includes_table(&self, schema: &str, table: &str) -> bool {
        if !self.tables.is_empty() && !self.tables.iter().any(|t| t == table) {
            return false;
        }
        let qualified = format!("{schema}.{table}");
        !self
            .exclude
            .iter()
            .any(|p| glob_match(p, table) || glob_match(p, &qualified))
    }
}

/// Minimal glob matching: `*` matches any run of characters, `?` exactly one.
fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..])),
            (Some(b'?'), Some(_)) => inner(&p[1..], &n[1..]),
            (Some(pc), Some(nc)) if pc == nc => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

/// Releases an advisory lock when dropped.
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        LockGuard {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}

/// The object names present on a database at snapshot time. Restoring drops
/// everything created since.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaSnapshot {
    pub tables: Vec<String>,
    pub indexes: Vec<String>,
    pub views: Vec<String>,
    pub triggers: Vec<String>,
}

#[async_trait::async_trait]
pub trait Inspector {
    /// Reads the whole realm of the connected database.
    async fn inspect_realm(&mut self, options: &InspectOptions) -> ConnectorResult<Realm>;

    /// Reads a single schema, returned as a one-schema realm.
    async fn inspect_schema(&mut self, name: &str, options: &InspectOptions) -> ConnectorResult<Realm>;
}

#[async_trait::async_trait]
pub trait PlanApplier {
    /// Materializes a change list into ordered SQL with reverse statements.
    async fn plan_changes(&mut self, name: &str, migration: &Migration, options: &PlanOptions)
        -> ConnectorResult<Plan>;

    /// Plans and executes in one go. Returns the number of statements run.
    async fn apply_changes(&mut self, migration: &Migration, options: &PlanOptions) -> ConnectorResult<usize>;
}

#[async_trait::async_trait]
pub trait Locker {
    /// Takes the database-native advisory lock `name`, waiting up to
    /// `timeout`. Contention surfaces as [`ConnectorError::Locked`] or
    /// [`ConnectorError::LockTimeout`].
    async fn lock(&mut self, name: &str, timeout: Duration) -> ConnectorResult<LockGuard>;
}

#[async_trait::async_trait]
pub trait CleanChecker {
    /// Fails with [`ConnectorError::NotClean`] when the database contains
    /// any object besides the given revision table.
    async fn check_clean(&mut self, revision_table: &str) -> ConnectorResult<()>;
}

#[async_trait::async_trait]
pub trait Snapshoter {
    async fn snapshot(&mut self) -> ConnectorResult<SchemaSnapshot>;

    /// Drops every object not present in the snapshot.
    async fn restore(&mut self, snapshot: SchemaSnapshot) -> ConnectorResult<()>;
}

#[async_trait::async_trait]
pub trait Normalizer {
    /// Round-trips a realm through the database to resolve defaults, type
    /// aliases and expressions the way the engine reports them.
    async fn normalize(&mut self, realm: Realm) -> ConnectorResult<Realm>;
}

#[async_trait::async_trait]
pub trait SqlExecutor {
    /// Executes one statement verbatim.
    async fn raw_cmd(&mut self, sql: &str) -> ConnectorResult<()>;
}

/// A per-dialect driver. Composes the mandatory capabilities as supertraits;
/// optional ones are probed through the `as_*` accessors.
#[async_trait::async_trait]
pub trait SchemaConnector:
    Inspector + PlanApplier + Locker + CleanChecker + SqlExecutor + RevisionStore + Send
{
    fn connector_name(&self) -> &'static str;

    /// The schema objects land in when no schema is named.
    fn default_schema_name(&self) -> &str;

    /// The configured name of the revision ledger table.
    fn revision_table_name(&self) -> &str {
        DEFAULT_REVISION_TABLE
    }

    /// An empty realm containing only the default schema; the base for
    /// "from nothing" diffs.
    fn empty_realm(&self) -> Realm;

    /// Computes the ordered change list turning `from` into `to`. Pure; all
    /// dialect-specific equivalence decisions are the connector's.
    fn diff(&self, from: Realm, to: Realm, options: &DiffOptions) -> ConnectorResult<Migration>;

    /// Drops every user object, leaving an empty database.
    async fn reset(&mut self) -> ConnectorResult<()>;

    /// The dialect's lint analyzers.
    fn analyzers(&self) -> Vec<Box<dyn Analyzer>>;

    fn as_snapshoter(&mut self) -> Option<&mut dyn Snapshoter> {
        None
    }

    fn as_normalizer(&mut self) -> Option<&mut dyn Normalizer> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("ignored_*", "ignored_table"));
        assert!(!glob_match("ignored_*", "kept_table"));
        assert!(glob_match("main.?", "main.t"));
        assert!(!glob_match("main.?", "main.table"));
    }

    #[test]
    fn inspect_options_filter_tables() {
        let options = InspectOptions {
            schemas: vec![],
            tables: vec![],
            exclude: vec!["main.secret_*".into()],
        };
        assert!(options.includes_table("main", "users"));
        assert!(!options.includes_table("main", "secret_keys"));
    }
}
