//! `migrate set`: declare the revision state of the target database by
//! hand, e.g. after resolving a failed migration manually.

use super::ensure_sealed;
use schema_connector::{
    ConnectorError, ConnectorResult, LocalDir, Revision, RevisionKind, RevisionStore as _, SchemaConnector,
};

/// Rewrites the ledger so that everything up to and including `version`
/// counts as applied and resolved, and nothing after it does.
pub async fn migrate_set(
    connector: &mut dyn SchemaConnector,
    dir: &LocalDir,
    version: &str,
    operator_version: &str,
) -> ConnectorResult<()> {
    ensure_sealed(dir)?;
    let files = dir.files()?;

    if !files.iter().any(|f| f.version == version) {
        return Err(ConnectorError::configuration(format!(
            "version {version} has no migration file in the directory"
        )));
    }

    connector.ledger_up().await?;

    for revision in connector.read_revisions().await? {
        if revision.version.as_str() > version {
            connector.delete_revision(&revision.version).await?;
        }
    }

    for file in files.iter().filter(|f| f.version.as_str() <= version) {
        let statements = file.statements()?;
        let mut revision = Revision::new(file.version.clone(), file.description.clone(), operator_version);
        revision.kind = RevisionKind::Execute | RevisionKind::Resolved;
        revision.total = statements.len();
        revision.applied = statements.len();
        revision.hash = file.checksum();
        revision.partial_hashes = statements
            .iter()
            .map(|s| schema_connector::hash_bytes(s.text.as_bytes()))
            .collect();
        connector.write_revision(&revision).await?;
    }

    Ok(())
}
