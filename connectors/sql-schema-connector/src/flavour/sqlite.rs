//! The SQLite flavour.
//!
//! Uses rusqlite directly. SQLite has no server-side advisory locks, so the
//! locker takes an exclusive flock on a sibling `<database>.lock` file;
//! in-memory databases, which are private to their connection, lock against
//! a process-wide registry instead.

mod describe;
mod renderer;

use super::SqlFlavour;
use crate::checker;
use enumflags2::BitFlags;
use fs2::FileExt as _;
use rusqlite::params;
use schema_connector::{
    Analyzer, ConnectorError, ConnectorResult, InspectOptions, LockGuard, Migration, Plan, PlanOptions, Revision,
    RevisionKind, SchemaSnapshot, TableChange,
};
use sql_realm::{
    walkers::{ColumnWalker, ForeignKeyWalker, IndexWalker, SchemaWalker, TableWalker},
    ColumnTypeFamily, DefaultValue, Realm,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

static MEMORY_LOCKS: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
static NEXT_MEMORY_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

pub(crate) struct SqliteFlavour {
    conn: rusqlite::Connection,
    file_path: Option<PathBuf>,
    /// Namespaces the in-memory lock registry per database.
    lock_key: String,
}

impl SqliteFlavour {
    pub(crate) fn new_file(path: &Path) -> ConnectorResult<Self> {
        let conn = rusqlite::Connection::open(path).map_err(ConnectorError::database)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(ConnectorError::database)?;
        Ok(SqliteFlavour {
            conn,
            file_path: Some(path.to_owned()),
            lock_key: path.display().to_string(),
        })
    }

    pub(crate) fn new_in_memory() -> ConnectorResult<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(ConnectorError::database)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(ConnectorError::database)?;
        let id = NEXT_MEMORY_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(SqliteFlavour {
            conn,
            file_path: None,
            lock_key: format!(":memory:{id}"),
        })
    }

    fn master_objects(&self) -> ConnectorResult<SchemaSnapshot> {
        let mut snapshot = SchemaSnapshot::default();
        let mut stmt = self
            .conn
            .prepare(
                "SELECT type, name FROM sqlite_master WHERE name NOT LIKE 'sqlite_%' AND (type != 'index' OR sql IS NOT NULL) ORDER BY name",
            )
            .map_err(ConnectorError::database)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(ConnectorError::database)?;
        for row in rows {
            let (object_type, name) = row.map_err(ConnectorError::database)?;
            match object_type.as_str() {
                "table" => snapshot.tables.push(name),
                "index" => snapshot.indexes.push(name),
                "view" => snapshot.views.push(name),
                "trigger" => snapshot.triggers.push(name),
                _ => (),
            }
        }
        Ok(snapshot)
    }

    /// Drops every object not listed in `keep`, dependents first.
    fn drop_objects_except(&mut self, keep: &SchemaSnapshot) -> ConnectorResult<()> {
        let current = self.master_objects()?;
        let mut script = String::from("PRAGMA foreign_keys = OFF;\n");

        for trigger in current.triggers.iter().filter(|t| !keep.triggers.contains(t)) {
            script.push_str(&format!("DROP TRIGGER {};\n", quoted(trigger)));
        }
        for view in current.views.iter().filter(|v| !keep.views.contains(v)) {
            script.push_str(&format!("DROP VIEW {};\n", quoted(view)));
        }
        for index in current.indexes.iter().filter(|i| !keep.indexes.contains(i)) {
            script.push_str(&format!("DROP INDEX {};\n", quoted(index)));
        }
        for table in current.tables.iter().filter(|t| !keep.tables.contains(t)) {
            script.push_str(&format!("DROP TABLE {};\n", quoted(table)));
        }

        script.push_str("PRAGMA foreign_keys = ON;\n");
        self.conn.execute_batch(&script).map_err(ConnectorError::database)
    }
}

#[async_trait::async_trait]
impl SqlFlavour for SqliteFlavour {
    fn connector_name(&self) -> &'static str {
        "sqlite"
    }

    fn default_schema_name(&self) -> &str {
        "main"
    }

    fn identifiers_match(&self, a: &str, b: &str) -> bool {
        a.eq_ignore_ascii_case(b)
    }

    fn column_types_match(&self, previous: ColumnWalker<'_>, next: ColumnWalker<'_>) -> bool {
        let previous_type = previous.tpe();
        let next_type = next.tpe();
        match (&previous_type.family, &next_type.family) {
            // Unclassified types compare by spelling.
            (ColumnTypeFamily::Unsupported, _) | (_, ColumnTypeFamily::Unsupported) => {
                previous_type.raw.eq_ignore_ascii_case(&next_type.raw)
            }
            (a, b) => a == b,
        }
    }

    fn defaults_match(&self, previous: Option<&DefaultValue>, next: Option<&DefaultValue>) -> bool {
        match (previous, next) {
            (None, None) => true,
            (Some(DefaultValue::Literal(a)), Some(DefaultValue::Literal(b))) => a == b,
            (Some(DefaultValue::Expr(a)), Some(DefaultValue::Expr(b))) => {
                let normalize = |s: &str| s.split_whitespace().collect::<String>().to_ascii_lowercase();
                normalize(a) == normalize(b)
            }
            _ => false,
        }
    }

    fn is_system_index_name(&self, name: &str) -> bool {
        name.starts_with("sqlite_autoindex_")
    }

    fn index_attrs_changed(&self, _previous: IndexWalker<'_>, _next: IndexWalker<'_>) -> bool {
        false
    }

    fn foreign_key_changed(&self, _previous: ForeignKeyWalker<'_>, _next: ForeignKeyWalker<'_>) -> bool {
        false
    }

    fn table_attrs_changed(&self, _previous: TableWalker<'_>, _next: TableWalker<'_>) -> BitFlags<TableChange> {
        // SQLite has no table comments, charsets or collations to compare.
        BitFlags::empty()
    }

    fn schema_attrs_changed(&self, _previous: SchemaWalker<'_>, _next: SchemaWalker<'_>) -> bool {
        false
    }

    fn render_plan(&self, name: &str, migration: &Migration, options: &PlanOptions) -> ConnectorResult<Plan> {
        renderer::render_plan(name, migration, options)
    }

    async fn raw_cmd(&mut self, sql: &str) -> ConnectorResult<()> {
        tracing::debug!(sql, "executing");
        self.conn.execute_batch(sql).map_err(ConnectorError::database)
    }

    async fn describe_realm(&mut self, options: &InspectOptions) -> ConnectorResult<Realm> {
        describe::describe(&self.conn, options)
    }

    async fn acquire_lock(&mut self, name: &str, timeout: Duration) -> ConnectorResult<LockGuard> {
        let started = Instant::now();

        match &self.file_path {
            Some(path) => {
                let lock_path = PathBuf::from(format!("{}.lock", path.display()));
                let file = std::fs::File::create(&lock_path)
                    .map_err(|err| ConnectorError::io(format!("creating lock file {}", lock_path.display()), err))?;

                loop {
                    match file.try_lock_exclusive() {
                        Ok(()) => {
                            return Ok(LockGuard::new(move || {
                                let _ = fs2::FileExt::unlock(&file);
                            }));
                        }
                        Err(_) if timeout.is_zero() => {
                            return Err(ConnectorError::Locked { name: name.to_owned() });
                        }
                        Err(_) if started.elapsed() >= timeout => {
                            return Err(ConnectorError::LockTimeout {
                                name: name.to_owned(),
                                timeout,
                            });
                        }
                        Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
                    }
                }
            }
            None => {
                let key = format!("{}/{name}", self.lock_key);
                let locks = MEMORY_LOCKS.get_or_init(Default::default);
                loop {
                    if locks.lock().unwrap().insert(key.clone()) {
                        let release_key = key.clone();
                        return Ok(LockGuard::new(move || {
                            if let Some(locks) = MEMORY_LOCKS.get() {
                                locks.lock().unwrap().remove(&release_key);
                            }
                        }));
                    }
                    if timeout.is_zero() {
                        return Err(ConnectorError::Locked { name: name.to_owned() });
                    }
                    if started.elapsed() >= timeout {
                        return Err(ConnectorError::LockTimeout {
                            name: name.to_owned(),
                            timeout,
                        });
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    async fn check_clean(&mut self, revision_table: &str) -> ConnectorResult<()> {
        let offending: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT type, name FROM sqlite_master \
                 WHERE name NOT LIKE 'sqlite_%' AND name != ?1 AND NOT (type = 'index' AND tbl_name = ?1) \
                 ORDER BY name LIMIT 1",
                [revision_table],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(ConnectorError::database(other)),
            })?;

        match offending {
            None => Ok(()),
            Some((object_kind, object_name)) => Err(ConnectorError::NotClean {
                object_kind,
                object_name,
            }),
        }
    }

    async fn snapshot(&mut self) -> ConnectorResult<SchemaSnapshot> {
        self.master_objects()
    }

    async fn restore(&mut self, snapshot: SchemaSnapshot) -> ConnectorResult<()> {
        self.drop_objects_except(&snapshot)
    }

    async fn reset(&mut self) -> ConnectorResult<()> {
        self.drop_objects_except(&SchemaSnapshot::default())
    }

    async fn ledger_up(&mut self, table: &str) -> ConnectorResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n\
             \x20 version TEXT NOT NULL PRIMARY KEY,\n\
             \x20 description TEXT NOT NULL,\n\
             \x20 type INTEGER NOT NULL DEFAULT 2,\n\
             \x20 applied INTEGER NOT NULL DEFAULT 0,\n\
             \x20 total INTEGER NOT NULL DEFAULT 0,\n\
             \x20 executed_at TEXT NOT NULL,\n\
             \x20 execution_time INTEGER NOT NULL DEFAULT 0,\n\
             \x20 error TEXT NULL,\n\
             \x20 error_stmt TEXT NULL,\n\
             \x20 hash TEXT NOT NULL DEFAULT '',\n\
             \x20 partial_hashes TEXT NULL,\n\
             \x20 operator_version TEXT NOT NULL DEFAULT '',\n\
             \x20 meta TEXT NULL\n\
             )",
            quoted(table)
        );
        self.conn.execute_batch(&sql).map_err(ConnectorError::database)
    }

    async fn read_revisions(&mut self, table: &str) -> ConnectorResult<Vec<Revision>> {
        let sql = format!(
            "SELECT version, description, type, applied, total, executed_at, execution_time, \
             error, error_stmt, hash, partial_hashes, operator_version, meta \
             FROM {} ORDER BY executed_at ASC, version ASC",
            quoted(table)
        );
        let mut stmt = self.conn.prepare(&sql).map_err(ConnectorError::database)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, String>(11)?,
                    row.get::<_, Option<String>>(12)?,
                ))
            })
            .map_err(ConnectorError::database)?;

        let mut revisions = Vec::new();
        for row in rows {
            let (
                version,
                description,
                kind_bits,
                applied,
                total,
                executed_at,
                execution_time_ms,
                error,
                error_stmt,
                hash,
                partial_hashes,
                operator_version,
                meta,
            ) = row.map_err(ConnectorError::database)?;

            let executed_at = chrono::DateTime::parse_from_rfc3339(&executed_at)
                .map_err(|err| ConnectorError::database(format!("invalid executed_at in revision {version}: {err}")))?
                .with_timezone(&chrono::Utc);
            let partial_hashes = match partial_hashes {
                Some(json) => serde_json::from_str(&json)
                    .map_err(|err| ConnectorError::database(format!("invalid partial_hashes in revision {version}: {err}")))?,
                None => Vec::new(),
            };
            let meta = meta.and_then(|json| serde_json::from_str(&json).ok());

            revisions.push(Revision {
                version,
                description,
                kind: BitFlags::<RevisionKind>::from_bits_truncate(kind_bits as u8),
                executed_at,
                execution_time_ms,
                applied: applied as usize,
                total: total as usize,
                hash,
                partial_hashes,
                operator_version,
                error,
                error_stmt,
                meta,
            });
        }

        Ok(revisions)
    }

    async fn write_revision(&mut self, table: &str, revision: &Revision) -> ConnectorResult<()> {
        let sql = format!(
            "INSERT INTO {} (version, description, type, applied, total, executed_at, execution_time, \
             error, error_stmt, hash, partial_hashes, operator_version, meta) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
             ON CONFLICT (version) DO UPDATE SET \
             description = excluded.description, type = excluded.type, applied = excluded.applied, \
             total = excluded.total, executed_at = excluded.executed_at, \
             execution_time = excluded.execution_time, error = excluded.error, \
             error_stmt = excluded.error_stmt, hash = excluded.hash, \
             partial_hashes = excluded.partial_hashes, operator_version = excluded.operator_version, \
             meta = excluded.meta",
            quoted(table)
        );

        let partial_hashes = serde_json::to_string(&revision.partial_hashes).map_err(ConnectorError::database)?;
        let meta = revision
            .meta
            .as_ref()
            .map(|meta| serde_json::to_string(meta))
            .transpose()
            .map_err(ConnectorError::database)?;

        self.conn
            .execute(
                &sql,
                params![
                    revision.version,
                    revision.description,
                    revision.kind.bits() as i64,
                    revision.applied as i64,
                    revision.total as i64,
                    revision.executed_at.to_rfc3339(),
                    revision.execution_time_ms,
                    revision.error,
                    revision.error_stmt,
                    revision.hash,
                    partial_hashes,
                    revision.operator_version,
                    meta,
                ],
            )
            .map_err(ConnectorError::database)?;
        Ok(())
    }

    async fn delete_revision(&mut self, table: &str, version: &str) -> ConnectorResult<()> {
        let sql = format!("DELETE FROM {} WHERE version = ?1", quoted(table));
        self.conn.execute(&sql, [version]).map_err(ConnectorError::database)?;
        Ok(())
    }

    fn analyzers(&self) -> Vec<Box<dyn Analyzer>> {
        vec![
            Box::new(checker::DestructiveChangesAnalyzer),
            Box::new(checker::DataDependentChangesAnalyzer),
        ]
    }
}

fn quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
