//! A fluent test API over a scratch SQLite database and a scratch migration
//! directory.

pub use schema_connector::{
    ConnectorError, ConnectorResult, ExecutionLog, LocalDir, MemoryLogger, Revision, TxMode,
};
pub use schema_core::commands::MigrationStatus;
pub use tempfile::TempDir;

use schema_connector::{Inspector as _, RevisionStore as _, SchemaConnector, SqlExecutor as _};
use schema_core::commands::{self, CreateMigrationParams};
use schema_core::{ExecutionSummary, ExecutorOptions, StateSource};
use sql_realm::Realm;
use sql_schema_connector::SqlSchemaConnector;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Runs a future on a thread-local tokio runtime, so tests stay plain
/// `#[test]` functions.
pub fn tok<O, F: Future<Output = O>>(future: F) -> O {
    thread_local! {
        static RT: tokio::runtime::Runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
    }
    RT.with(|rt| rt.block_on(future))
}

pub struct TestApi {
    _db_dir: TempDir,
    db_path: PathBuf,
    connector: SqlSchemaConnector,
}

impl Default for TestApi {
    fn default() -> Self {
        TestApi::new()
    }
}

impl TestApi {
    pub fn new() -> Self {
        let db_dir = tempfile::tempdir().unwrap();
        let db_path = db_dir.path().join("test.db");
        let connector = SqlSchemaConnector::sqlite_file(&db_path).unwrap();
        TestApi {
            _db_dir: db_dir,
            db_path,
            connector,
        }
    }

    /// A second connector to the same database, for concurrency tests.
    pub fn second_connection(&self) -> SqlSchemaConnector {
        SqlSchemaConnector::sqlite_file(&self.db_path).unwrap()
    }

    /// A fresh in-memory dev database.
    pub fn dev_connector(&self) -> SqlSchemaConnector {
        SqlSchemaConnector::sqlite_in_memory().unwrap()
    }

    pub fn create_migrations_directory(&self) -> TempDir {
        tempfile::tempdir().unwrap()
    }

    pub fn dir(&self, tmp: &TempDir) -> LocalDir {
        LocalDir::open(tmp.path()).unwrap()
    }

    /// Writes a migration file and re-seals the directory.
    pub fn write_migration(&self, dir: &LocalDir, file_name: &str, contents: &str) {
        dir.write_file(file_name, contents).unwrap();
        dir.sync_sum().unwrap();
    }

    pub fn raw_cmd(&mut self, sql: &str) {
        tok(self.connector.raw_cmd(sql)).unwrap()
    }

    pub fn revisions(&mut self) -> Vec<Revision> {
        tok(self.connector.read_revisions()).unwrap()
    }

    pub fn apply_migrations<'a>(&'a mut self, dir: &'a LocalDir) -> ApplyMigrations<'a> {
        ApplyMigrations {
            connector: &mut self.connector,
            dir,
            options: ExecutorOptions {
                tx_mode: TxMode::None,
                lock_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        }
    }

    pub fn migrate_status(&mut self, dir: &LocalDir) -> commands::StatusReport {
        tok(commands::migrate_status(&mut self.connector, dir)).unwrap()
    }

    pub fn migrate_set(&mut self, dir: &LocalDir, version: &str) {
        tok(commands::migrate_set(&mut self.connector, dir, version, "tests")).unwrap()
    }

    /// Runs `migrate diff` against an HCL desired state.
    pub fn create_migration_from_hcl(&self, dir: &LocalDir, name: &str, hcl: &str) -> Option<String> {
        let hcl_dir = tempfile::tempdir().unwrap();
        let schema_path = hcl_dir.path().join("schema.hcl");
        std::fs::write(&schema_path, hcl).unwrap();

        let mut dev = self.dev_connector();
        tok(commands::create_migration(
            &mut dev,
            CreateMigrationParams {
                name,
                dir,
                desired: StateSource::HclFiles(vec![schema_path]),
                diff_options: Default::default(),
                lock_timeout: Duration::from_secs(5),
            },
        ))
        .unwrap()
    }

    #[track_caller]
    pub fn assert_schema(&mut self) -> SchemaAssertion {
        let realm = tok(self.connector.inspect_realm(&Default::default())).unwrap();
        SchemaAssertion { realm }
    }

    pub fn connector(&mut self) -> &mut SqlSchemaConnector {
        &mut self.connector
    }
}

pub struct ApplyMigrations<'a> {
    connector: &'a mut SqlSchemaConnector,
    dir: &'a LocalDir,
    options: ExecutorOptions,
}

impl<'a> ApplyMigrations<'a> {
    pub fn tx_mode(mut self, mode: TxMode) -> Self {
        self.options.tx_mode = mode;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.options.dry_run = true;
        self
    }

    pub fn allow_dirty(mut self) -> Self {
        self.options.allow_dirty = true;
        self
    }

    pub fn baseline(mut self, version: &str) -> Self {
        self.options.baseline_version = Some(version.to_owned());
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.options.lock_timeout = timeout;
        self
    }

    #[track_caller]
    pub fn send(self) -> ApplyAssertions {
        match self.try_send() {
            Ok(assertions) => assertions,
            Err(err) => panic!("apply_migrations failed: {err}"),
        }
    }

    pub fn try_send(mut self) -> ConnectorResult<ApplyAssertions> {
        let logger = Arc::new(MemoryLogger::default());
        self.options.logger = logger.clone();
        let summary = tok(schema_core::apply_migrations(self.connector, self.dir, &self.options))?;
        Ok(ApplyAssertions {
            summary,
            events: logger.events(),
        })
    }

    #[track_caller]
    pub fn send_unwrap_err(mut self) -> (ConnectorError, Vec<ExecutionLog>) {
        let logger = Arc::new(MemoryLogger::default());
        self.options.logger = logger.clone();
        let result = tok(schema_core::apply_migrations(self.connector, self.dir, &self.options));
        match result {
            Ok(_) => panic!("expected apply_migrations to fail"),
            Err(err) => (err, logger.events()),
        }
    }
}

pub struct ApplyAssertions {
    pub summary: ExecutionSummary,
    pub events: Vec<ExecutionLog>,
}

impl ApplyAssertions {
    /// Asserts the descriptions of the applied files, in order.
    #[track_caller]
    pub fn assert_applied_migrations(self, expected: &[&str]) -> Self {
        let applied: Vec<String> = self
            .summary
            .applied_files
            .iter()
            .map(|file_name| description_of(file_name))
            .collect();
        assert_eq!(applied, expected, "applied files: {:?}", self.summary.applied_files);
        self
    }

    /// Asserts that a statement was logged whose text contains `needle`.
    #[track_caller]
    pub fn assert_statement_logged(self, needle: &str) -> Self {
        let found = self.events.iter().any(|event| {
            matches!(event, ExecutionLog::Statement { sql } if sql.contains(needle))
        });
        assert!(found, "no logged statement contains {needle:?}; events: {:#?}", self.events);
        self
    }

    pub fn statements(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ExecutionLog::Statement { sql } => Some(sql.as_str()),
                _ => None,
            })
            .collect()
    }
}

fn description_of(file_name: &str) -> String {
    file_name
        .trim_end_matches(".sql")
        .split_once('_')
        .map(|(_, description)| description)
        .unwrap_or("")
        .to_owned()
}

pub struct SchemaAssertion {
    pub realm: Realm,
}

impl SchemaAssertion {
    #[track_caller]
    pub fn assert_has_table(self, name: &str) -> Self {
        assert!(
            self.realm.find_table("main", name).is_some(),
            "expected table {name:?} to exist",
        );
        self
    }

    #[track_caller]
    pub fn assert_has_no_table(self, name: &str) -> Self {
        assert!(
            self.realm.find_table("main", name).is_none(),
            "expected table {name:?} not to exist",
        );
        self
    }

    #[track_caller]
    pub fn assert_column(self, table: &str, column: &str) -> Self {
        let table_walker = self
            .realm
            .find_table("main", table)
            .unwrap_or_else(|| panic!("table {table:?} not found"));
        assert!(
            table_walker.column(column).is_some(),
            "expected column {column:?} on table {table:?}",
        );
        self
    }
}
