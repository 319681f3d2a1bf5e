//! SQL flavours implement behaviour specific to a given SQL implementation,
//! in order to keep the differ and the connector free of dialect
//! conditionals. The differ asks the flavour every equivalence question
//! (type equality, default equality, generated index names); the connector
//! delegates every connection-backed operation.

pub(crate) mod sqlite;

pub(crate) use sqlite::SqliteFlavour;

use enumflags2::BitFlags;
use schema_connector::{
    Analyzer, ConnectorResult, InspectOptions, LockGuard, Migration, Plan, PlanOptions, Revision, SchemaSnapshot,
    TableChange,
};
use sql_realm::{
    walkers::{ColumnWalker, ForeignKeyWalker, IndexWalker, SchemaWalker, TableWalker},
    DefaultValue, Realm,
};
use std::time::Duration;

#[async_trait::async_trait]
pub(crate) trait SqlFlavour: Send {
    fn connector_name(&self) -> &'static str;

    fn default_schema_name(&self) -> &str;

    // Differ hooks. All pure.

    /// Identifier comparison, e.g. ASCII-case-insensitive on SQLite and
    /// MySQL.
    fn identifiers_match(&self, a: &str, b: &str) -> bool;

    fn column_types_match(&self, previous: ColumnWalker<'_>, next: ColumnWalker<'_>) -> bool;

    fn defaults_match(&self, previous: Option<&DefaultValue>, next: Option<&DefaultValue>) -> bool;

    /// True for index names generated by the engine rather than the user,
    /// which are matched structurally instead of by name.
    fn is_system_index_name(&self, name: &str) -> bool;

    /// Dialect-specific index attributes beyond uniqueness, parts and
    /// predicate.
    fn index_attrs_changed(&self, previous: IndexWalker<'_>, next: IndexWalker<'_>) -> bool;

    /// Dialect-specific foreign key attributes beyond the referenced side
    /// and the actions.
    fn foreign_key_changed(&self, previous: ForeignKeyWalker<'_>, next: ForeignKeyWalker<'_>) -> bool;

    /// Table attribute changes outside of columns and constraints.
    fn table_attrs_changed(&self, previous: TableWalker<'_>, next: TableWalker<'_>) -> BitFlags<TableChange>;

    fn schema_attrs_changed(&self, previous: SchemaWalker<'_>, next: SchemaWalker<'_>) -> bool;

    // Planning.

    /// Materializes the change list into ordered SQL statements with
    /// reverse statements where a safe inverse exists.
    fn render_plan(&self, name: &str, migration: &Migration, options: &PlanOptions) -> ConnectorResult<Plan>;

    // Connection-backed operations.

    async fn raw_cmd(&mut self, sql: &str) -> ConnectorResult<()>;

    async fn describe_realm(&mut self, options: &InspectOptions) -> ConnectorResult<Realm>;

    async fn acquire_lock(&mut self, name: &str, timeout: Duration) -> ConnectorResult<LockGuard>;

    async fn check_clean(&mut self, revision_table: &str) -> ConnectorResult<()>;

    async fn snapshot(&mut self) -> ConnectorResult<SchemaSnapshot>;

    async fn restore(&mut self, snapshot: SchemaSnapshot) -> ConnectorResult<()>;

    async fn reset(&mut self) -> ConnectorResult<()>;

    // Revision ledger.

    async fn ledger_up(&mut self, table: &str) -> ConnectorResult<()>;

    async fn read_revisions(&mut self, table: &str) -> ConnectorResult<Vec<Revision>>;

    async fn write_revision(&mut self, table: &str, revision: &Revision) -> ConnectorResult<()>;

    async fn delete_revision(&mut self, table: &str, version: &str) -> ConnectorResult<()>;

    // Lint.

    fn analyzers(&self) -> Vec<Box<dyn Analyzer>>;
}
