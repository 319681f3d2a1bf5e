//! The migration executor: computes pending files against the revision
//! ledger and plays them statement by statement, with resume, transaction
//! modes, advisory locking and dry runs.

use crate::LOCK_NAME;
use schema_connector::{
    hash_bytes, CleanChecker as _, ConnectorError, ConnectorResult, ExecutionLog, ExecutionLogger, Inspector as _,
    LocalDir, Locker as _, MigrationFile, NopLogger, Revision, RevisionKind, RevisionStore as _, SchemaConnector,
    SqlExecutor as _, Stmt, TxMode,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct ExecutorOptions {
    pub tx_mode: TxMode,
    /// Proceed on a non-empty database with no revision ledger.
    pub allow_dirty: bool,
    /// Mark this version (and everything before it) as the starting point of
    /// an existing database instead of executing it.
    pub baseline_version: Option<String>,
    /// Only consider files from this version on.
    pub from_version: Option<String>,
    /// Apply at most this many pending files.
    pub count: Option<usize>,
    pub operator_version: String,
    pub lock_timeout: Duration,
    /// Log the full run without executing statements or writing revisions.
    pub dry_run: bool,
    pub logger: Arc<dyn ExecutionLogger>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        ExecutorOptions {
            tx_mode: TxMode::default(),
            allow_dirty: false,
            baseline_version: None,
            from_version: None,
            count: None,
            operator_version: format!("atlas v{}", env!("CARGO_PKG_VERSION")),
            lock_timeout: Duration::from_secs(10),
            dry_run: false,
            logger: Arc::new(NopLogger),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExecutionSummary {
    pub applied_files: Vec<String>,
    pub statements_applied: usize,
    pub target_version: Option<String>,
}

struct PendingFile {
    file: MigrationFile,
    /// Resume offset: statements already applied by a previous run.
    skip: usize,
    /// The partial revision being resumed, when there is one.
    revision: Option<Revision>,
}

/// Applies all pending files of `dir` to the connected database.
#[tracing::instrument(skip_all, fields(dir = %dir.path().display()))]
pub async fn apply_migrations(
    connector: &mut dyn SchemaConnector,
    dir: &LocalDir,
    options: &ExecutorOptions,
) -> ConnectorResult<ExecutionSummary> {
    let files = dir.files()?;
    if !files.is_empty() {
        dir.validate()?;
    }

    let _guard = connector.lock(LOCK_NAME, options.lock_timeout).await?;

    let revisions = if options.dry_run {
        // A dry run must not create the ledger table on a fresh database.
        connector.read_revisions().await.unwrap_or_default()
    } else {
        connector.ledger_up().await?;
        connector.read_revisions().await?
    };

    let pending = compute_pending(connector, &files, &revisions, options).await?;
    tracing::debug!(
        pending = pending.len(),
        dry_run = options.dry_run,
        tx_mode = %options.tx_mode,
        "computed pending migrations"
    );

    options.logger.log(ExecutionLog::ExecutionStart {
        pending: pending.len(),
        target_version: pending.last().map(|p| p.file.version.clone()),
    });

    let mut summary = ExecutionSummary {
        target_version: pending.last().map(|p| p.file.version.clone()),
        ..Default::default()
    };

    if pending.is_empty() {
        options.logger.log(ExecutionLog::Done {
            files_applied: 0,
            statements_applied: 0,
        });
        return Ok(summary);
    }

    if options.tx_mode == TxMode::All && !options.dry_run {
        connector.raw_cmd("BEGIN").await?;
    }

    for pending_file in pending {
        let applied = execute_file(connector, &pending_file, options).await;
        match applied {
            Ok(statements) => {
                summary.statements_applied += statements;
                summary.applied_files.push(pending_file.file.file_name.clone());
                options.logger.log(ExecutionLog::FileDone {
                    file_name: pending_file.file.file_name.clone(),
                });
            }
            Err(err) => {
                if options.tx_mode == TxMode::All && !options.dry_run {
                    return Err(compose_rollback(connector, err).await);
                }
                return Err(err);
            }
        }
    }

    if options.tx_mode == TxMode::All && !options.dry_run {
        connector.raw_cmd("COMMIT").await?;
    }

    options.logger.log(ExecutionLog::Done {
        files_applied: summary.applied_files.len(),
        statements_applied: summary.statements_applied,
    });

    Ok(summary)
}

/// The pending-file computation: everything after the highest applied
/// revision, resuming a partially applied file first. History must stay
/// linear — files older than the applied head, missing files for recorded
/// revisions, and edits to applied files are all hard errors.
async fn compute_pending(
    connector: &mut dyn SchemaConnector,
    files: &[MigrationFile],
    revisions: &[Revision],
    options: &ExecutorOptions,
) -> ConnectorResult<Vec<PendingFile>> {
    let find_file = |version: &str| files.iter().find(|f| f.version == version);

    let mut pending: Vec<PendingFile> = Vec::new();

    if revisions.is_empty() {
        match &options.baseline_version {
            Some(baseline) => {
                let position = files
                    .iter()
                    .position(|f| &f.version == baseline)
                    .ok_or_else(|| {
                        ConnectorError::configuration(format!("baseline version {baseline} not found in the directory"))
                    })?;

                if !options.dry_run {
                    let mut revision =
                        Revision::baseline(baseline.clone(), options.operator_version.clone());
                    let file = &files[position];
                    revision.description = file.description.clone();
                    revision.hash = file.checksum();
                    connector.write_revision(&revision).await?;
                }

                pending.extend(files.iter().skip(position + 1).map(|file| PendingFile {
                    file: file.clone(),
                    skip: 0,
                    revision: None,
                }));
            }
            None => {
                if !options.allow_dirty {
                    let revision_table = connector.revision_table_name().to_owned();
                    match connector.check_clean(&revision_table).await {
                        Ok(()) => (),
                        Err(ConnectorError::NotClean {
                            object_kind,
                            object_name,
                        }) => {
                            return Err(ConnectorError::DirtyDatabase {
                                object: format!("{object_kind} {object_name:?}"),
                            });
                        }
                        Err(other) => return Err(other),
                    }
                }
                pending.extend(files.iter().map(|file| PendingFile {
                    file: file.clone(),
                    skip: 0,
                    revision: None,
                }));
            }
        }
    } else {
        // Integrity: every non-resolved revision needs its file, and fully
        // applied files must still match their recorded hash.
        for revision in revisions {
            match find_file(&revision.version) {
                None if !revision.is_resolved() => {
                    return Err(ConnectorError::MissingMigration {
                        version: revision.version.clone(),
                    });
                }
                Some(file)
                    if revision.is_applied()
                        && !revision.is_resolved()
                        && !revision.hash.is_empty()
                        && revision.hash != file.checksum() =>
                {
                    return Err(ConnectorError::HistoryChanged {
                        file: file.file_name.clone(),
                        reason: "the file content no longer matches the hash recorded at execution time".into(),
                    });
                }
                _ => (),
            }
        }

        let last = revisions
            .iter()
            .max_by(|a, b| a.version.cmp(&b.version))
            .expect("revisions are non-empty");

        let out_of_order: Vec<String> = files
            .iter()
            .filter(|f| f.version.as_str() <= last.version.as_str())
            .filter(|f| !revisions.iter().any(|r| r.version == f.version))
            .map(|f| f.file_name.clone())
            .collect();
        let ahead: Vec<String> = files
            .iter()
            .filter(|f| f.version.as_str() > last.version.as_str())
            .map(|f| f.file_name.clone())
            .collect();
        if !out_of_order.is_empty() {
            return Err(ConnectorError::HistoryNonLinear {
                pending: ahead,
                out_of_order,
            });
        }

        if last.applied < last.total && !last.is_resolved() {
            let file = find_file(&last.version).ok_or_else(|| ConnectorError::MissingMigration {
                version: last.version.clone(),
            })?;
            pending.push(PendingFile {
                file: file.clone(),
                skip: last.applied,
                revision: Some(last.clone()),
            });
        }

        pending.extend(
            files
                .iter()
                .filter(|f| f.version.as_str() > last.version.as_str())
                .map(|file| PendingFile {
                    file: file.clone(),
                    skip: 0,
                    revision: None,
                }),
        );
    }

    if let Some(from) = &options.from_version {
        pending.retain(|p| p.file.version.as_str() >= from.as_str());
    }
    if let Some(count) = options.count {
        pending.truncate(count);
    }

    Ok(pending)
}

async fn execute_file(
    connector: &mut dyn SchemaConnector,
    pending: &PendingFile,
    options: &ExecutorOptions,
) -> ConnectorResult<usize> {
    let file = &pending.file;
    let statements = file.statements()?;
    let file_mode = reconcile_tx_mode(file, options.tx_mode)?;

    verify_resume_point(pending, &statements)?;

    options.logger.log(ExecutionLog::FileStart {
        file_name: file.file_name.clone(),
        version: file.version.clone(),
        skipped_statements: pending.skip,
    });

    let use_file_tx = file_mode == TxMode::File && options.tx_mode != TxMode::All;
    if use_file_tx && !options.dry_run {
        connector.raw_cmd("BEGIN").await?;
    }

    let mut revision = pending.revision.clone().unwrap_or_else(|| {
        Revision::new(
            file.version.clone(),
            file.description.clone(),
            options.operator_version.clone(),
        )
    });
    revision.kind |= RevisionKind::Execute;
    revision.total = statements.len();
    revision.hash = file.checksum();
    revision.partial_hashes.truncate(pending.skip);
    revision.error = None;
    revision.error_stmt = None;

    let started = Instant::now();
    let mut applied_now = 0usize;

    for (index, statement) in statements.iter().enumerate().skip(pending.skip) {
        options.logger.log(ExecutionLog::Statement {
            sql: statement.text.clone(),
        });

        if options.dry_run {
            applied_now += 1;
            continue;
        }

        if let Err(err) = connector.raw_cmd(&statement.text).await {
            let message = err.to_string();
            options.logger.log(ExecutionLog::Error {
                message: message.clone(),
                statement: Some(statement.text.clone()),
            });

            let statement_error = ConnectorError::Statement {
                version: file.version.clone(),
                statement: statement.text.clone(),
                message,
            };

            // In transactional modes the rollback undoes this run's
            // statements; recorded progress goes back to the resume point.
            let statement_error = if use_file_tx {
                revision.applied = pending.skip;
                revision.partial_hashes.truncate(pending.skip);
                compose_rollback(connector, statement_error).await
            } else {
                statement_error
            };

            revision.error = Some(statement_error.to_string());
            revision.error_stmt = Some(statement.text.clone());
            revision.execution_time_ms = started.elapsed().as_millis() as i64;
            connector.write_revision(&revision).await?;

            return Err(statement_error);
        }

        applied_now += 1;
        revision.applied = index + 1;
        revision.partial_hashes.push(hash_bytes(statement.text.as_bytes()));
        revision.execution_time_ms = started.elapsed().as_millis() as i64;
        connector.write_revision(&revision).await?;
    }

    if !options.dry_run {
        revision.applied = revision.total;
        revision.execution_time_ms = started.elapsed().as_millis() as i64;
        connector.write_revision(&revision).await?;

        if use_file_tx {
            connector.raw_cmd("COMMIT").await?;
        }
    }

    Ok(applied_now)
}

/// Replays the directory (bounded by `to_version`) on the connected
/// database and returns the introspected realm. The caller is responsible
/// for holding a dev-database session (locked, proven clean).
pub async fn replay(
    connector: &mut dyn SchemaConnector,
    dir: &LocalDir,
    to_version: Option<&str>,
    validation: ValidationMode,
) -> ConnectorResult<sql_realm::Realm> {
    let files = dir.files()?;
    if !files.is_empty() {
        match dir.validate() {
            Ok(()) => (),
            Err(ConnectorError::ChecksumNotFound) if validation == ValidationMode::AllowMissingSum => (),
            Err(err) => return Err(err),
        }
    }

    for file in files {
        if let Some(bound) = to_version {
            if file.version.as_str() > bound {
                break;
            }
        }
        for statement in file.statements()? {
            connector.raw_cmd(&statement.text).await.map_err(|err| {
                ConnectorError::Statement {
                    version: file.version.clone(),
                    statement: statement.text.clone(),
                    message: err.to_string(),
                }
            })?;
        }
    }

    connector.inspect_realm(&Default::default()).await
}

/// Directory-integrity strictness for replays. Imported foreign-format
/// directories may legitimately lack a sum file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Require,
    AllowMissingSum,
}

fn reconcile_tx_mode(file: &MigrationFile, requested: TxMode) -> ConnectorResult<TxMode> {
    match (requested, file.tx_mode()?) {
        // A file opting out of transactions cannot run inside the global one.
        (TxMode::All, Some(TxMode::None)) => Err(ConnectorError::TxModeConflict {
            file: file.file_name.clone(),
            directive: TxMode::None,
            requested: TxMode::All,
        }),
        (TxMode::All, _) => Ok(TxMode::All),
        (_, Some(directive)) => Ok(directive),
        (requested, None) => Ok(requested),
    }
}

/// Resuming a partially applied file is only sound when the already-applied
/// prefix is untouched; the per-statement hashes prove it.
fn verify_resume_point(pending: &PendingFile, statements: &[Stmt]) -> ConnectorResult<()> {
    let Some(revision) = &pending.revision else { return Ok(()) };
    if pending.skip == 0 {
        return Ok(());
    }

    if statements.len() < pending.skip {
        return Err(ConnectorError::HistoryChanged {
            file: pending.file.file_name.clone(),
            reason: format!(
                "{} statements were already applied but the file now has {}",
                pending.skip,
                statements.len()
            ),
        });
    }

    for (index, (stmt, recorded)) in statements.iter().zip(&revision.partial_hashes).take(pending.skip).enumerate() {
        if &hash_bytes(stmt.text.as_bytes()) != recorded {
            return Err(ConnectorError::HistoryChanged {
                file: pending.file.file_name.clone(),
                reason: format!("statement {} changed after it was applied", index + 1),
            });
        }
    }

    Ok(())
}

async fn compose_rollback(connector: &mut dyn SchemaConnector, original: ConnectorError) -> ConnectorError {
    match connector.raw_cmd("ROLLBACK").await {
        Ok(()) => original,
        Err(rollback_err) => ConnectorError::Database {
            message: format!("{original}; additionally, rolling back failed: {rollback_err}"),
        },
    }
}
