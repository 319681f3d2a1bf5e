//! The SQL implementation of the connector contract.
//!
//! The crate splits along one seam: the [`differ`] is dialect-agnostic and
//! pure, while everything dialect-specific — equivalence decisions, SQL
//! rendering, introspection, locking, the revision ledger — lives behind the
//! [`flavour::SqlFlavour`] trait. `SqlSchemaConnector` glues a flavour to
//! the `schema-connector` capability traits.

mod checker;
mod differ;
mod flavour;

use flavour::{SqlFlavour, SqliteFlavour};
use schema_connector::{
    Analyzer, CleanChecker, ConnectorError, ConnectorResult, DiffOptions, InspectOptions, Inspector, LockGuard,
    Locker, Migration, Normalizer, Plan, PlanApplier, PlanOptions, Revision, RevisionStore, SchemaConnector,
    SchemaSnapshot, Snapshoter, SqlExecutor, DEFAULT_REVISION_TABLE,
};
use sql_realm::Realm;
use std::path::Path;
use std::time::Duration;

pub struct SqlSchemaConnector {
    flavour: Box<dyn SqlFlavour>,
    revision_table: String,
}

impl SqlSchemaConnector {
    pub fn sqlite_file(path: impl AsRef<Path>) -> ConnectorResult<Self> {
        Ok(SqlSchemaConnector {
            flavour: Box::new(SqliteFlavour::new_file(path.as_ref())?),
            revision_table: DEFAULT_REVISION_TABLE.to_owned(),
        })
    }

    pub fn sqlite_in_memory() -> ConnectorResult<Self> {
        Ok(SqlSchemaConnector {
            flavour: Box::new(SqliteFlavour::new_in_memory()?),
            revision_table: DEFAULT_REVISION_TABLE.to_owned(),
        })
    }

    /// Connects from a database URL. `sqlite://<path>` opens a file,
    /// `sqlite://:memory:` (or `?mode=memory`) an in-memory database.
    pub fn connect(url: &str) -> ConnectorResult<Self> {
        let rest = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .ok_or_else(|| ConnectorError::configuration(format!("unsupported database URL {url:?}")))?;

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, query),
            None => (rest, ""),
        };

        let in_memory = path.is_empty()
            || path == ":memory:"
            || query.split('&').any(|pair| pair == "mode=memory");

        if in_memory {
            SqlSchemaConnector::sqlite_in_memory()
        } else {
            SqlSchemaConnector::sqlite_file(path)
        }
    }

    /// Overrides the revision ledger table name (`--revisions-schema`).
    pub fn set_revision_table(&mut self, name: impl Into<String>) {
        self.revision_table = name.into();
    }

    pub fn revision_table(&self) -> &str {
        &self.revision_table
    }

    /// Synchronous plan rendering; [`PlanApplier::plan_changes`] is this
    /// plus the async contract signature.
    pub fn render_plan(&self, name: &str, migration: &Migration, options: &PlanOptions) -> ConnectorResult<Plan> {
        self.flavour.render_plan(name, migration, options)
    }
}

#[async_trait::async_trait]
impl Inspector for SqlSchemaConnector {
    async fn inspect_realm(&mut self, options: &InspectOptions) -> ConnectorResult<Realm> {
        self.flavour.describe_realm(options).await
    }

    async fn inspect_schema(&mut self, name: &str, options: &InspectOptions) -> ConnectorResult<Realm> {
        if !self.flavour.identifiers_match(name, self.flavour.default_schema_name()) {
            return Err(ConnectorError::configuration(format!(
                "schema {name:?} does not exist on this {} database",
                self.flavour.connector_name()
            )));
        }
        let mut options = options.clone();
        options.schemas = vec![name.to_owned()];
        self.flavour.describe_realm(&options).await
    }
}

#[async_trait::async_trait]
impl PlanApplier for SqlSchemaConnector {
    async fn plan_changes(
        &mut self,
        name: &str,
        migration: &Migration,
        options: &PlanOptions,
    ) -> ConnectorResult<Plan> {
        self.flavour.render_plan(name, migration, options)
    }

    async fn apply_changes(&mut self, migration: &Migration, options: &PlanOptions) -> ConnectorResult<usize> {
        let plan = self.flavour.render_plan("apply", migration, options)?;
        for change in &plan.changes {
            self.flavour.raw_cmd(&change.cmd).await?;
        }
        Ok(plan.changes.len())
    }
}

#[async_trait::async_trait]
impl Locker for SqlSchemaConnector {
    async fn lock(&mut self, name: &str, timeout: Duration) -> ConnectorResult<LockGuard> {
        self.flavour.acquire_lock(name, timeout).await
    }
}

#[async_trait::async_trait]
impl CleanChecker for SqlSchemaConnector {
    async fn check_clean(&mut self, revision_table: &str) -> ConnectorResult<()> {
        self.flavour.check_clean(revision_table).await
    }
}

#[async_trait::async_trait]
impl SqlExecutor for SqlSchemaConnector {
    async fn raw_cmd(&mut self, sql: &str) -> ConnectorResult<()> {
        self.flavour.raw_cmd(sql).await
    }
}

#[async_trait::async_trait]
impl RevisionStore for SqlSchemaConnector {
    async fn ledger_up(&mut self) -> ConnectorResult<()> {
        let table = self.revision_table.clone();
        self.flavour.ledger_up(&table).await
    }

    async fn read_revisions(&mut self) -> ConnectorResult<Vec<Revision>> {
        let table = self.revision_table.clone();
        self.flavour.read_revisions(&table).await
    }

    async fn write_revision(&mut self, revision: &Revision) -> ConnectorResult<()> {
        let table = self.revision_table.clone();
        self.flavour.write_revision(&table, revision).await
    }

    async fn delete_revision(&mut self, version: &str) -> ConnectorResult<()> {
        let table = self.revision_table.clone();
        self.flavour.delete_revision(&table, version).await
    }
}

#[async_trait::async_trait]
impl Snapshoter for SqlSchemaConnector {
    async fn snapshot(&mut self) -> ConnectorResult<SchemaSnapshot> {
        self.flavour.snapshot().await
    }

    async fn restore(&mut self, snapshot: SchemaSnapshot) -> ConnectorResult<()> {
        self.flavour.restore(snapshot).await
    }
}

#[async_trait::async_trait]
impl Normalizer for SqlSchemaConnector {
    async fn normalize(&mut self, realm: Realm) -> ConnectorResult<Realm> {
        let migration = self.diff(self.empty_realm(), realm, &DiffOptions::default())?;
        let plan = self.flavour.render_plan("normalize", &migration, &PlanOptions::default())?;

        let mut executed = Ok(());
        for change in &plan.changes {
            executed = self.flavour.raw_cmd(&change.cmd).await;
            if executed.is_err() {
                break;
            }
        }

        let described = match executed {
            Ok(()) => self.flavour.describe_realm(&InspectOptions::default()).await,
            Err(err) => Err(err),
        };
        self.flavour.reset().await?;
        described
    }
}

#[async_trait::async_trait]
impl SchemaConnector for SqlSchemaConnector {
    fn connector_name(&self) -> &'static str {
        self.flavour.connector_name()
    }

    fn default_schema_name(&self) -> &str {
        self.flavour.default_schema_name()
    }

    fn revision_table_name(&self) -> &str {
        &self.revision_table
    }

    fn empty_realm(&self) -> Realm {
        let mut realm = Realm::new();
        realm.push_schema(self.flavour.default_schema_name());
        realm
    }

    fn diff(&self, from: Realm, to: Realm, options: &DiffOptions) -> ConnectorResult<Migration> {
        differ::diff(from, to, self.flavour.as_ref(), options)
    }

    async fn reset(&mut self) -> ConnectorResult<()> {
        self.flavour.reset().await
    }

    fn analyzers(&self) -> Vec<Box<dyn Analyzer>> {
        self.flavour.analyzers()
    }

    fn as_snapshoter(&mut self) -> Option<&mut dyn Snapshoter> {
        Some(self)
    }

    fn as_normalizer(&mut self) -> Option<&mut dyn Normalizer> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;
    use pretty_assertions::assert_eq;
    use schema_connector::{Change, ChangeCategory, ColumnChange};
    use sql_realm::{
        Column, ColumnType, ForeignKey, ForeignKeyColumn, Index, IndexPart, IndexPartValue, PrimaryKey,
        ReferentialAction, SortOrder, TableId,
    };

    fn connector() -> SqlSchemaConnector {
        SqlSchemaConnector::sqlite_in_memory().unwrap()
    }

    fn push_column(realm: &mut Realm, table: TableId, name: &str, tpe: ColumnType) -> sql_realm::ColumnId {
        realm.push_column(Column {
            table_id: table,
            name: name.into(),
            tpe,
            default: None,
            auto_increment: false,
            comment: None,
            charset: None,
            collation: None,
            generated: None,
        })
    }

    fn users_realm(with_name_column: bool) -> Realm {
        let mut realm = Realm::new();
        let main = realm.push_schema("main");
        let users = realm.push_table(main, "users");
        let id = push_column(&mut realm, users, "id", ColumnType::integer());
        if with_name_column {
            push_column(&mut realm, users, "name", ColumnType::varchar(100).nullable(true));
        }
        realm.set_primary_key(
            users,
            PrimaryKey {
                constraint_name: None,
                columns: vec![id],
            },
        );
        realm
    }

    #[test]
    fn create_table_rendering() {
        let connector = connector();
        let migration = connector
            .diff(connector.empty_realm(), users_realm(true), &DiffOptions::default())
            .unwrap();
        let plan = connector
            .render_plan("init", &migration, &PlanOptions::default())
            .unwrap();

        let script: String = plan.changes.iter().map(|c| format!("{};\n", c.cmd)).collect();
        expect![[r#"
            CREATE TABLE `users` (
              `id` int NOT NULL,
              `name` varchar(100) NULL,
              PRIMARY KEY (`id`)
            );
        "#]]
        .assert_eq(&script);
    }

    #[test]
    fn diffing_a_realm_against_itself_is_empty() {
        let connector = connector();
        let migration = connector
            .diff(users_realm(true), users_realm(true), &DiffOptions::default())
            .unwrap();
        assert!(migration.is_empty());
    }

    #[test]
    fn added_nullable_column_renders_a_reversible_alter_table() {
        let connector = connector();
        let migration = connector
            .diff(users_realm(false), users_realm(true), &DiffOptions::default())
            .unwrap();

        assert_eq!(migration.changes.len(), 1);
        assert!(matches!(migration.changes[0], Change::AddColumn(_)));

        let plan = connector
            .render_plan("add_name", &migration, &PlanOptions::default())
            .unwrap();
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(
            plan.changes[0].cmd,
            "ALTER TABLE `users` ADD COLUMN `name` varchar(100) NULL"
        );
        assert_eq!(
            plan.changes[0].reverse.as_deref(),
            Some("ALTER TABLE `users` DROP COLUMN `name`")
        );
        assert!(plan.reversible);
    }

    fn cyclic_realm() -> Realm {
        let mut realm = Realm::new();
        let main = realm.push_schema("main");
        let a = realm.push_table(main, "a");
        let b = realm.push_table(main, "b");
        let a_id = push_column(&mut realm, a, "id", ColumnType::integer());
        let a_b_id = push_column(&mut realm, a, "b_id", ColumnType::integer().nullable(true));
        let b_id = push_column(&mut realm, b, "id", ColumnType::integer());
        let b_a_id = push_column(&mut realm, b, "a_id", ColumnType::integer().nullable(true));
        realm.set_primary_key(a, PrimaryKey { constraint_name: None, columns: vec![a_id] });
        realm.set_primary_key(b, PrimaryKey { constraint_name: None, columns: vec![b_id] });

        let fk_a = realm.push_foreign_key(ForeignKey {
            table_id: a,
            referenced_table_id: b,
            constraint_name: Some("a_b_fk".into()),
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        });
        realm.push_foreign_key_column(ForeignKeyColumn {
            foreign_key_id: fk_a,
            constrained_column_id: a_b_id,
            referenced_column_id: b_id,
        });
        let fk_b = realm.push_foreign_key(ForeignKey {
            table_id: b,
            referenced_table_id: a,
            constraint_name: Some("b_a_fk".into()),
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        });
        realm.push_foreign_key_column(ForeignKeyColumn {
            foreign_key_id: fk_b,
            constrained_column_id: b_a_id,
            referenced_column_id: a_id,
        });
        realm
    }

    #[test]
    fn cyclic_foreign_keys_are_split_into_a_second_wave() {
        let connector = connector();
        let migration = connector
            .diff(connector.empty_realm(), cyclic_realm(), &DiffOptions::default())
            .unwrap();

        let categories: Vec<ChangeCategory> = migration.changes.iter().map(|c| c.category()).collect();
        assert_eq!(
            categories,
            &[
                ChangeCategory::AddTable,
                ChangeCategory::AddTable,
                ChangeCategory::AddForeignKey,
                ChangeCategory::AddForeignKey,
            ],
        );

        let plan = connector
            .render_plan("init", &migration, &PlanOptions::default())
            .unwrap();
        // The two CREATE TABLE statements carry no foreign keys; both
        // constraints arrive through the later redefinitions.
        let creates: Vec<&str> = plan
            .changes
            .iter()
            .map(|c| c.cmd.as_str())
            .filter(|cmd| cmd.starts_with("CREATE TABLE `a`") || cmd.starts_with("CREATE TABLE `b`"))
            .collect();
        assert_eq!(creates.len(), 2);
        assert!(creates.iter().all(|cmd| !cmd.contains("FOREIGN KEY")));
        assert!(plan.changes.iter().any(|c| c.cmd.contains("CREATE TABLE `new_a`") && c.cmd.contains("FOREIGN KEY")));
    }

    #[test]
    fn dropped_tables_follow_their_dependents() {
        let connector = connector();
        let migration = connector
            .diff(cyclic_realm(), connector.empty_realm(), &DiffOptions::default())
            .unwrap();

        // Both foreign keys disappear with their tables; no individual
        // constraint drops are emitted for dropped tables.
        let categories: Vec<ChangeCategory> = migration.changes.iter().map(|c| c.category()).collect();
        assert_eq!(categories, &[ChangeCategory::DropTable, ChangeCategory::DropTable]);
    }

    #[test]
    fn type_change_goes_through_table_redefinition() {
        let connector = connector();

        // Same table, but the name column flips from varchar(100) to text.
        let mut to_changed = users_realm(false);
        let users = to_changed.find_table("main", "users").unwrap().id;
        push_column(&mut to_changed, users, "name", ColumnType::text().nullable(true));

        let migration = connector
            .diff(users_realm(true), to_changed, &DiffOptions::default())
            .unwrap();
        assert!(matches!(
            migration.changes[0],
            Change::ModifyColumn { changes, .. } if changes.contains(ColumnChange::Type)
        ));

        let plan = connector
            .render_plan("modify", &migration, &PlanOptions::default())
            .unwrap();
        assert!(plan.changes.iter().any(|c| c.cmd.starts_with("CREATE TABLE `new_users`")));
        assert!(plan
            .changes
            .iter()
            .any(|c| c.cmd.contains("INSERT INTO `new_users` (`id`, `name`) SELECT `id`, `name` FROM `users`")));
        assert!(!plan.reversible);
    }

    #[test]
    fn system_generated_index_names_match_structurally() {
        let add_index = |realm: &mut Realm, name: &str| {
            let users = realm.find_table("main", "users").unwrap().id;
            let email = push_column(realm, users, "email", ColumnType::varchar(255));
            let index = realm.push_index(Index {
                table_id: users,
                name: name.into(),
                unique: true,
                predicate: None,
                comment: None,
            });
            realm.push_index_part(IndexPart {
                index_id: index,
                value: IndexPartValue::Column(email),
                sort: SortOrder::Asc,
            });
        };

        let connector = connector();
        let mut from = users_realm(false);
        add_index(&mut from, "sqlite_autoindex_users_1");
        let mut to = users_realm(false);
        add_index(&mut to, "users_email_key");

        let migration = connector.diff(from, to, &DiffOptions::default()).unwrap();
        assert!(migration.is_empty(), "unexpected changes: {:?}", migration.changes);
    }
}
