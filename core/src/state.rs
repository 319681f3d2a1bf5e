//! State readers: a uniform way to obtain a realm from heterogeneous
//! sources — a live database, a set of HCL files, loose SQL files replayed
//! on the dev database, or a migration directory replayed through the
//! executor.
//!
//! The source kind is picked from the URL: driver schemes connect, `env://`
//! resolves an environment variable and recurses, `file://` (or a bare
//! path) classifies by content — a directory containing `atlas.sum` is a
//! migration directory, otherwise the `.sql` / `.hcl` files decide.

use crate::dev::DevSession;
use crate::executor::{replay, ValidationMode};
use schema_connector::{
    ConnectorError, ConnectorResult, Inspector as _, LocalDir, Normalizer as _, SchemaConnector, SqlExecutor as _,
    SUM_FILE_NAME,
};
use sql_realm::Realm;
use sql_schema_connector::SqlSchemaConnector;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub enum StateSource {
    /// A live database to introspect.
    Database(String),
    HclFiles(Vec<PathBuf>),
    SqlFiles(Vec<PathBuf>),
    MigrationDir {
        path: PathBuf,
        to_version: Option<String>,
    },
}

impl StateSource {
    pub fn parse(raw: &str) -> ConnectorResult<StateSource> {
        if let Some(var) = raw.strip_prefix("env://") {
            let resolved = std::env::var(var)
                .map_err(|_| ConnectorError::configuration(format!("environment variable {var} is not set")))?;
            return StateSource::parse(&resolved);
        }

        if raw.starts_with("sqlite:") || raw.starts_with("mysql:") || raw.starts_with("postgres:") {
            return Ok(StateSource::Database(raw.to_owned()));
        }

        let rest = raw.strip_prefix("file://").unwrap_or(raw);
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, query),
            None => (rest, ""),
        };
        let path = PathBuf::from(path);
        let to_version = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("version="))
            .map(ToOwned::to_owned);

        if path.is_dir() {
            if path.join(SUM_FILE_NAME).is_file() {
                return Ok(StateSource::MigrationDir { path, to_version });
            }
            let sql = files_with_extension(&path, "sql")?;
            let hcl = files_with_extension(&path, "hcl")?;
            return match (sql.is_empty(), hcl.is_empty()) {
                (false, true) => Ok(StateSource::SqlFiles(sql)),
                (true, false) => Ok(StateSource::HclFiles(hcl)),
                (false, false) => Err(ConnectorError::configuration(format!(
                    "{} mixes .sql and .hcl files; point at one kind",
                    path.display()
                ))),
                (true, true) => Err(ConnectorError::configuration(format!(
                    "{} contains no schema files",
                    path.display()
                ))),
            };
        }

        match path.extension().and_then(|e| e.to_str()) {
            Some("sql") => Ok(StateSource::SqlFiles(vec![path])),
            Some("hcl") => Ok(StateSource::HclFiles(vec![path])),
            _ => Err(ConnectorError::configuration(format!(
                "cannot read a desired state from {raw:?}"
            ))),
        }
    }

    /// Parses several URLs into one source; multiple URLs must all be
    /// schema files of the same kind.
    pub fn parse_many(raws: &[String]) -> ConnectorResult<StateSource> {
        let mut sources = raws.iter().map(|raw| StateSource::parse(raw));
        let Some(first) = sources.next() else {
            return Err(ConnectorError::configuration("no state URL given"));
        };
        let mut merged = first?;

        for source in sources {
            match (&mut merged, source?) {
                (StateSource::HclFiles(all), StateSource::HclFiles(more)) => all.extend(more),
                (StateSource::SqlFiles(all), StateSource::SqlFiles(more)) => all.extend(more),
                _ => {
                    return Err(ConnectorError::configuration(
                        "multiple state URLs must all point at schema files of the same kind",
                    ))
                }
            }
        }

        Ok(merged)
    }

    /// Whether resolving this source requires a dev database.
    pub fn needs_dev_database(&self) -> bool {
        !matches!(self, StateSource::Database(_))
    }
}

fn files_with_extension(dir: &Path, extension: &str) -> ConnectorResult<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).map_err(|err| ConnectorError::io(format!("reading {}", dir.display()), err))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| ConnectorError::io("reading directory entry", err))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Materializes the realm a source describes. File-based sources are
/// evaluated against `dev`, which must not be in an open session.
pub async fn read_realm(
    source: &StateSource,
    dev: Option<&mut dyn SchemaConnector>,
    lock_timeout: std::time::Duration,
) -> ConnectorResult<Realm> {
    match source {
        StateSource::Database(url) => {
            let mut connector = SqlSchemaConnector::connect(url)?;
            connector.inspect_realm(&Default::default()).await
        }
        other => {
            let dev = dev.ok_or_else(|| {
                ConnectorError::configuration("this desired state requires a dev database (--dev-url)")
            })?;
            let mut session = DevSession::acquire(dev, lock_timeout).await?;
            let result = read_realm_on_dev(other, &mut session).await;
            let closed = session.close().await;
            let realm = result?;
            closed?;
            Ok(realm)
        }
    }
}

/// Like [`read_realm`], but inside an already-open dev session. The session
/// is rolled back to clean before and after evaluation.
pub async fn read_realm_on_dev(source: &StateSource, session: &mut DevSession<'_>) -> ConnectorResult<Realm> {
    match source {
        StateSource::Database(url) => {
            let mut connector = SqlSchemaConnector::connect(url)?;
            connector.inspect_realm(&Default::default()).await
        }
        StateSource::HclFiles(paths) => {
            let mut contents = Vec::with_capacity(paths.len());
            for path in paths {
                let text = std::fs::read_to_string(path)
                    .map_err(|err| ConnectorError::io(format!("reading {}", path.display()), err))?;
                contents.push((path.display().to_string(), text));
            }
            let borrowed: Vec<(&str, &str)> = contents
                .iter()
                .map(|(name, text)| (name.as_str(), text.as_str()))
                .collect();
            let parsed = schema_hcl::parse_realm(&borrowed)?;

            // The dev database acts as the type system: round-tripping
            // resolves type aliases, defaults and expressions.
            match session.conn().as_normalizer() {
                Some(normalizer) => normalizer.normalize(parsed).await,
                None => Ok(parsed),
            }
        }
        StateSource::SqlFiles(paths) => {
            let result = replay_sql_files(paths, session).await;
            let rolled_back = session.rollback().await;
            let realm = result?;
            rolled_back?;
            Ok(realm)
        }
        StateSource::MigrationDir { path, to_version } => {
            let dir = LocalDir::open(path)?;
            let result = replay(session.conn(), &dir, to_version.as_deref(), ValidationMode::Require).await;
            let rolled_back = session.rollback().await;
            let realm = result?;
            rolled_back?;
            Ok(realm)
        }
    }
}

async fn replay_sql_files(paths: &[PathBuf], session: &mut DevSession<'_>) -> ConnectorResult<Realm> {
    // Loose SQL files are concatenated into one synthetic migration script.
    let mut script = String::new();
    for path in paths {
        let text = std::fs::read_to_string(path)
            .map_err(|err| ConnectorError::io(format!("reading {}", path.display()), err))?;
        script.push_str(&text);
        if !script.ends_with('\n') {
            script.push('\n');
        }
    }

    for statement in schema_connector::split_sql_statements(&script, None)? {
        session.conn().raw_cmd(&statement.text).await?;
    }
    session.conn().inspect_realm(&Default::default()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_database_urls() {
        let source = StateSource::parse("sqlite://dev.db").unwrap();
        assert_eq!(source, StateSource::Database("sqlite://dev.db".into()));
        assert!(!source.needs_dev_database());
    }

    #[test]
    fn classifies_schema_files_by_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let hcl = tmp.path().join("schema.hcl");
        std::fs::write(&hcl, "table \"t\" { column \"id\" { type = int } }").unwrap();

        let source = StateSource::parse(&format!("file://{}", hcl.display())).unwrap();
        assert_eq!(source, StateSource::HclFiles(vec![hcl]));
        assert!(source.needs_dev_database());
    }

    #[test]
    fn directories_with_a_sum_file_are_migration_directories() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(SUM_FILE_NAME), "h1:x\n").unwrap();

        let source = StateSource::parse(&format!("file://{}?version=20240101000000", tmp.path().display())).unwrap();
        match source {
            StateSource::MigrationDir { to_version, .. } => {
                assert_eq!(to_version.as_deref(), Some("20240101000000"));
            }
            other => panic!("expected migration dir, got {other:?}"),
        }
    }

    #[test]
    fn env_indirection_resolves() {
        std::env::set_var("STATE_SOURCE_TEST_URL", "sqlite://resolved.db");
        let source = StateSource::parse("env://STATE_SOURCE_TEST_URL").unwrap();
        assert_eq!(source, StateSource::Database("sqlite://resolved.db".into()));
    }
}
