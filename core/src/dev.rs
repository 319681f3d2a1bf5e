//! Dev-database sessions.
//!
//! The dev database is a disposable database used to normalize schemas,
//! replay migration directories and simulate changes for lint. Every use
//! follows the same protocol: take the advisory lock, prove the database
//! clean, snapshot, work, restore. Nothing is ever auto-cleaned on entry; a
//! dirty dev database is the user's to resolve.

use schema_connector::{
    CleanChecker as _, ConnectorResult, LockGuard, Locker as _, SchemaConnector, SchemaSnapshot, Snapshoter as _,
};
use std::time::Duration;

pub const DEV_LOCK_NAME: &str = "atlas_dev";

pub struct DevSession<'a> {
    connector: &'a mut dyn SchemaConnector,
    snapshot: Option<SchemaSnapshot>,
    _guard: LockGuard,
}

impl<'a> DevSession<'a> {
    pub async fn acquire(
        connector: &'a mut dyn SchemaConnector,
        lock_timeout: Duration,
    ) -> ConnectorResult<DevSession<'a>> {
        let guard = connector.lock(DEV_LOCK_NAME, lock_timeout).await?;

        let revision_table = connector.revision_table_name().to_owned();
        connector.check_clean(&revision_table).await?;

        let snapshot = match connector.as_snapshoter() {
            Some(snapshoter) => Some(snapshoter.snapshot().await?),
            None => None,
        };

        Ok(DevSession {
            connector,
            snapshot,
            _guard: guard,
        })
    }

    pub fn conn(&mut self) -> &mut dyn SchemaConnector {
        self.connector
    }

    /// Puts the dev database back into its session-start state without
    /// ending the session. Used between replays.
    pub async fn rollback(&mut self) -> ConnectorResult<()> {
        match (&self.snapshot, self.connector.as_snapshoter()) {
            (Some(snapshot), Some(snapshoter)) => {
                let snapshot = snapshot.clone();
                snapshoter.restore(snapshot).await
            }
            _ => self.connector.reset().await,
        }
    }

    /// Restores the dev database and releases the lock.
    pub async fn close(mut self) -> ConnectorResult<()> {
        self.rollback().await
    }
}
