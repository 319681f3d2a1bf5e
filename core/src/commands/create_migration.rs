//! `migrate diff`: plan the difference between the directory's state and a
//! desired state, and write it as a new versioned migration file.

use super::ensure_sealed;
use crate::dev::DevSession;
use crate::executor::{replay, ValidationMode};
use crate::state::{read_realm_on_dev, StateSource};
use chrono::Utc;
use schema_connector::{
    version_timestamp, ConnectorResult, DefaultFormatter, DiffOptions, Formatter as _, PlanApplier as _, PlanOptions,
    SchemaConnector,
};
use std::time::Duration;

pub struct CreateMigrationParams<'a> {
    pub name: &'a str,
    pub dir: &'a schema_connector::LocalDir,
    pub desired: StateSource,
    pub diff_options: DiffOptions,
    pub lock_timeout: Duration,
}

/// Returns the created file name, or `None` when the directory state
/// already matches the desired state (the "no plan" outcome).
#[tracing::instrument(skip_all, fields(name = params.name))]
pub async fn create_migration(
    dev: &mut dyn SchemaConnector,
    params: CreateMigrationParams<'_>,
) -> ConnectorResult<Option<String>> {
    ensure_sealed(params.dir)?;

    let mut session = DevSession::acquire(dev, params.lock_timeout).await?;
    let result = create_inner(&mut session, &params).await;
    let closed = session.close().await;
    let created = result?;
    closed?;
    Ok(created)
}

async fn create_inner(
    session: &mut DevSession<'_>,
    params: &CreateMigrationParams<'_>,
) -> ConnectorResult<Option<String>> {
    // The current state is the directory replayed on the dev database.
    let current = replay(session.conn(), params.dir, None, ValidationMode::Require).await?;
    session.rollback().await?;

    let desired = read_realm_on_dev(&params.desired, session).await?;

    let migration = session.conn().diff(current, desired, &params.diff_options)?;
    if migration.is_empty() {
        return Ok(None);
    }

    let plan = session
        .conn()
        .plan_changes(params.name, &migration, &PlanOptions::default())
        .await?;
    if plan.is_empty() {
        return Ok(None);
    }

    let version = version_timestamp(Utc::now());
    let mut created = None;
    for (file_name, contents) in DefaultFormatter.format(&version, params.name, &plan) {
        params.dir.write_file(&file_name, &contents)?;
        created.get_or_insert(file_name);
    }
    params.dir.sync_sum()?;

    Ok(created)
}
