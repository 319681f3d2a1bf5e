//! `migrate lint`: replay new migration files on the dev database and run
//! the dialect's analyzers over the simulated effect of every statement.

use crate::dev::DevSession;
use schema_connector::{
    CheckFile, ConnectorError, ConnectorResult, DiffOptions, ExecutionLog, ExecutionLogger, Inspector as _, LocalDir,
    MigrationFile, NopLogger, Report, SchemaConnector, SqlExecutor as _, StmtChanges, DIRECTIVE_NOLINT,
};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

/// Which files of the directory count as "new" for linting.
#[derive(Debug, Clone)]
pub enum ChangeDetector {
    /// The final `n` files are new, everything before them is base.
    Latest(usize),
    /// Files added relative to a git base branch are new.
    Git {
        work_dir: PathBuf,
        base: String,
        /// The migration directory path relative to the repository root.
        dir_path: PathBuf,
    },
}

pub struct LintParams<'a> {
    pub dir: &'a LocalDir,
    pub detector: ChangeDetector,
    pub lock_timeout: Duration,
    pub logger: Arc<dyn ExecutionLogger>,
}

impl<'a> LintParams<'a> {
    pub fn new(dir: &'a LocalDir, detector: ChangeDetector) -> Self {
        LintParams {
            dir,
            detector,
            lock_timeout: Duration::from_secs(10),
            logger: Arc::new(NopLogger),
        }
    }
}

/// Splits the directory files into `(base, new)` according to the detector.
pub fn split_files(
    dir: &LocalDir,
    detector: &ChangeDetector,
) -> ConnectorResult<(Vec<MigrationFile>, Vec<MigrationFile>)> {
    let mut files = dir.files()?;

    match detector {
        ChangeDetector::Latest(n) => {
            let split = files.len().saturating_sub(*n);
            let new = files.split_off(split);
            Ok((files, new))
        }
        ChangeDetector::Git { work_dir, base, dir_path } => {
            let output = Command::new("git")
                .args(["--no-pager", "diff", "--name-only", "--diff-filter=A", base, "HEAD", "--"])
                .arg(dir_path)
                .current_dir(work_dir)
                .output()
                .map_err(|err| ConnectorError::Subprocess {
                    program: "git".into(),
                    message: if err.kind() == std::io::ErrorKind::NotFound {
                        "git executable not found in PATH".into()
                    } else {
                        err.to_string()
                    },
                })?;

            if !output.status.success() {
                return Err(ConnectorError::Subprocess {
                    program: "git".into(),
                    message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
                });
            }

            let added: Vec<String> = String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter_map(|line| line.rsplit('/').next())
                .map(ToOwned::to_owned)
                .collect();

            let (base_files, new_files) = files
                .into_iter()
                .partition(|file| !added.iter().any(|name| name == &file.file_name));
            Ok((base_files, new_files))
        }
    }
}

#[tracing::instrument(skip_all)]
pub async fn migrate_lint(dev: &mut dyn SchemaConnector, params: LintParams<'_>) -> ConnectorResult<Vec<Report>> {
    super::ensure_sealed(params.dir)?;
    let (base, new) = split_files(params.dir, &params.detector)?;
    tracing::debug!(base = base.len(), new = new.len(), "split migration files for lint");

    let mut session = DevSession::acquire(dev, params.lock_timeout).await?;
    let result = lint_inner(&mut session, &base, &new, params.logger.as_ref()).await;
    let closed = session.close().await;
    let reports = result?;
    closed?;
    Ok(reports)
}

async fn lint_inner(
    session: &mut DevSession<'_>,
    base: &[MigrationFile],
    new: &[MigrationFile],
    logger: &dyn ExecutionLogger,
) -> ConnectorResult<Vec<Report>> {
    // Bring the dev database to the base state.
    for file in base {
        for statement in file.statements()? {
            session.conn().raw_cmd(&statement.text).await.map_err(|err| {
                ConnectorError::Statement {
                    version: file.version.clone(),
                    statement: statement.text,
                    message: err.to_string(),
                }
            })?;
        }
    }

    let mut current = session.conn().inspect_realm(&Default::default()).await?;
    let analyzers = session.conn().analyzers();
    let mut reports = Vec::with_capacity(new.len());

    for file in new {
        logger.log(ExecutionLog::ChecksStart {
            file_name: file.file_name.clone(),
        });
        let before_file = current.clone();
        let mut statements = Vec::new();

        for statement in file.statements()? {
            session.conn().raw_cmd(&statement.text).await.map_err(|err| {
                ConnectorError::Statement {
                    version: file.version.clone(),
                    statement: statement.text.clone(),
                    message: err.to_string(),
                }
            })?;

            let after = session.conn().inspect_realm(&Default::default()).await?;
            let changes = session
                .conn()
                .diff(current.clone(), after.clone(), &DiffOptions::default())?;
            statements.push(StmtChanges {
                pos: statement.pos,
                stmt: statement.text,
                changes,
            });
            current = after;
        }

        let sum = session
            .conn()
            .diff(before_file, current.clone(), &DiffOptions::default())?;
        let check_file = CheckFile {
            name: file.file_name.clone(),
            statements,
            sum,
        };

        let skipped = nolint_set(file);
        let mut diagnostics = Vec::new();
        for analyzer in &analyzers {
            match &skipped {
                Some(skip) if skip.is_empty() || skip.iter().any(|name| name == analyzer.name()) => continue,
                _ => analyzer.analyze(&check_file, &mut diagnostics),
            }
        }

        logger.log(ExecutionLog::ChecksDone {
            file_name: file.file_name.clone(),
            diagnostics: diagnostics.len(),
        });
        reports.push(Report {
            file_name: file.file_name.clone(),
            diagnostics,
        });
    }

    Ok(reports)
}

/// The `atlas:nolint` directive: present with no value skips every
/// analyzer, otherwise the value lists the analyzers to skip.
fn nolint_set(file: &MigrationFile) -> Option<Vec<String>> {
    file.directives
        .iter()
        .find(|d| d.key == DIRECTIVE_NOLINT)
        .map(|d| d.value.split_whitespace().map(ToOwned::to_owned).collect())
}
