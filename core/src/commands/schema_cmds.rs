//! The declarative `schema …` commands: inspect a live database, diff two
//! states, plan and apply the difference directly, or clean a database.

use crate::state::{read_realm, StateSource};
use schema_connector::{
    ConnectorError, ConnectorResult, DiffOptions, InspectOptions, Inspector as _, Locker as _, Plan,
    PlanApplier as _, PlanOptions, SchemaConnector, SqlExecutor as _,
};
use sql_realm::Realm;
use sql_schema_connector::SqlSchemaConnector;
use std::time::Duration;

pub async fn schema_inspect(url: &str, options: &InspectOptions) -> ConnectorResult<Realm> {
    let mut connector = SqlSchemaConnector::connect(url)?;
    connector.inspect_realm(options).await
}

pub struct SchemaPlanParams<'a> {
    /// The target database. `None` plans between two arbitrary states
    /// (`schema diff`): the `from` sources play the role of the target.
    pub url: Option<&'a str>,
    pub from: &'a [String],
    pub to: &'a [String],
    pub dev_url: Option<&'a str>,
    pub inspect: InspectOptions,
    pub diff_options: DiffOptions,
    pub lock_timeout: Duration,
}

/// Computes the plan turning the current state into the desired one.
/// Returns the target connector (when a target URL was given) so the caller
/// can execute the plan on it.
pub async fn schema_plan(params: SchemaPlanParams<'_>) -> ConnectorResult<(Option<SqlSchemaConnector>, Plan)> {
    let mut dev = match params.dev_url {
        Some(url) => Some(SqlSchemaConnector::connect(url)?),
        None => None,
    };

    let (mut target, current) = match params.url {
        Some(url) => {
            let mut target = SqlSchemaConnector::connect(url)?;
            let current = target.inspect_realm(&params.inspect).await?;
            (Some(target), current)
        }
        None => {
            let from_source = StateSource::parse_many(params.from)?;
            let current = read_realm(
                &from_source,
                dev.as_mut().map(|d| d as &mut dyn SchemaConnector),
                params.lock_timeout,
            )
            .await?;
            (None, current)
        }
    };

    let to_source = StateSource::parse_many(params.to)?;
    let desired = read_realm(
        &to_source,
        dev.as_mut().map(|d| d as &mut dyn SchemaConnector),
        params.lock_timeout,
    )
    .await?;

    // Diff and plan on whichever connector speaks the target dialect.
    let (planner, plan) = {
        let planner: &mut SqlSchemaConnector = match (&mut target, &mut dev) {
            (Some(target), _) => target,
            (None, Some(dev)) => dev,
            (None, None) => {
                return Err(ConnectorError::configuration(
                    "schema diff between file states requires a dev database (--dev-url)",
                ))
            }
        };
        let migration = planner.diff(current, desired, &params.diff_options)?;
        let plan = planner
            .plan_changes("schema apply", &migration, &PlanOptions::default())
            .await?;
        (target, plan)
    };

    Ok((planner, plan))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaApplyTxMode {
    None,
    #[default]
    File,
}

/// Executes an approved plan against the target, under the advisory lock.
pub async fn schema_apply_execute(
    target: &mut SqlSchemaConnector,
    plan: &Plan,
    tx_mode: SchemaApplyTxMode,
    lock_timeout: Duration,
) -> ConnectorResult<usize> {
    let _guard = target.lock(crate::LOCK_NAME, lock_timeout).await?;

    let wrap = tx_mode == SchemaApplyTxMode::File && plan.transactional;
    if wrap {
        target.raw_cmd("BEGIN").await?;
    }

    for change in &plan.changes {
        if let Err(err) = target.raw_cmd(&change.cmd).await {
            if wrap {
                let _ = target.raw_cmd("ROLLBACK").await;
            }
            return Err(err);
        }
    }

    if wrap {
        target.raw_cmd("COMMIT").await?;
    }

    Ok(plan.changes.len())
}

/// `schema clean`: drop every user object on the target.
pub async fn schema_clean(url: &str) -> ConnectorResult<()> {
    let mut connector = SqlSchemaConnector::connect(url)?;
    connector.reset().await
}
