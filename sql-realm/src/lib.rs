//! A dialect-agnostic, in-memory representation of a database: the *realm*.
//!
//! A realm is the entire schema graph of one database — its schemas
//! (namespaces), tables, columns, indexes, foreign keys and check
//! constraints. The graph is cyclic (tables reference each other through
//! foreign keys, possibly across schemas), so it is stored as flat arenas of
//! data addressed by typed ids, and object-to-object references are logical:
//! a [`Walker`] couples an id with the realm that issued it and resolves
//! parents and children on demand.
//!
//! Realms are built by introspection, by evaluating a schema definition
//! file, or by replaying a migration directory on a scratch database. Once
//! built they are treated as immutable; normalization produces new realms.

mod ids;
pub mod walkers;

pub use ids::{CheckId, ColumnId, ForeignKeyColumnId, ForeignKeyId, IndexId, IndexPartId, SchemaId, TableId};
pub use walkers::{
    CheckWalker, ColumnWalker, ForeignKeyWalker, IndexPartWalker, IndexWalker, SchemaWalker, TableWalker, Walker,
};

/// The whole schema graph of one database.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Realm {
    pub(crate) schemas: Vec<Schema>,
    pub(crate) tables: Vec<Table>,
    pub(crate) columns: Vec<Column>,
    pub(crate) indexes: Vec<Index>,
    pub(crate) index_parts: Vec<IndexPart>,
    pub(crate) foreign_keys: Vec<ForeignKey>,
    pub(crate) foreign_key_columns: Vec<ForeignKeyColumn>,
    pub(crate) checks: Vec<Check>,
    /// Realm-level attributes (character set, collation, comment).
    pub attrs: RealmAttrs,
}

/// Database-wide attributes.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RealmAttrs {
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub comment: Option<String>,
}

/// A named container of tables. What SQL calls a schema, a database or a
/// namespace depending on the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub name: String,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub schema_id: SchemaId,
    pub name: String,
    pub primary_key: Option<PrimaryKey>,
    pub comment: Option<String>,
}

/// The primary key of a table. `columns` is never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKey {
    pub constraint_name: Option<String>,
    pub columns: Vec<ColumnId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub table_id: TableId,
    pub name: String,
    pub tpe: ColumnType,
    pub default: Option<DefaultValue>,
    pub auto_increment: bool,
    pub comment: Option<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub generated: Option<Generated>,
}

/// A generated (computed) column expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub expr: String,
    pub stored: bool,
}

/// The type of a column: a classified family, the raw spelling the database
/// reported (or the user wrote), and nullability.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnType {
    pub family: ColumnTypeFamily,
    pub raw: String,
    pub is_nullable: bool,
}

impl ColumnType {
    pub fn new(family: ColumnTypeFamily, raw: impl Into<String>, is_nullable: bool) -> Self {
        ColumnType {
            family,
            raw: raw.into(),
            is_nullable,
        }
    }

    pub fn integer() -> Self {
        ColumnType::new(
            ColumnTypeFamily::Integer {
                unsigned: false,
                size: None,
            },
            "int",
            false,
        )
    }

    pub fn varchar(size: u32) -> Self {
        ColumnType::new(ColumnTypeFamily::String { size: Some(size) }, format!("varchar({size})"), false)
    }

    pub fn text() -> Self {
        ColumnType::new(ColumnTypeFamily::String { size: None }, "text", false)
    }

    pub fn boolean() -> Self {
        ColumnType::new(ColumnTypeFamily::Boolean, "bool", false)
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.is_nullable = nullable;
        self
    }
}

/// Classified column types. Every variant carries the fields that are
/// meaningful for structural comparison; everything else lives in the raw
/// spelling.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnTypeFamily {
    Integer { unsigned: bool, size: Option<u8> },
    Float { precision: Option<u8> },
    Decimal { precision: Option<u16>, scale: Option<u16> },
    String { size: Option<u32> },
    Binary { size: Option<u32> },
    Boolean,
    Enum { values: Vec<String> },
    Time { kind: TimeKind },
    Json,
    Spatial { kind: String },
    /// A type the describer could not classify. Compared by raw spelling.
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeKind {
    Date,
    Time,
    DateTime,
    Timestamp,
}

/// A column default: either a literal value or a raw SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Literal(String),
    Expr(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub table_id: TableId,
    pub name: String,
    pub unique: bool,
    pub predicate: Option<String>,
    pub comment: Option<String>,
}

/// One ordered part of an index: a column or a raw expression, never both.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPart {
    pub index_id: IndexId,
    pub value: IndexPartValue,
    pub sort: SortOrder,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexPartValue {
    Column(ColumnId),
    Expr(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub table_id: TableId,
    pub referenced_table_id: TableId,
    pub constraint_name: Option<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

/// One column pairing of a foreign key. A foreign key owns one or more of
/// these, in order, and the constrained and referenced lists always have the
/// same length.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyColumn {
    pub foreign_key_id: ForeignKeyId,
    pub constrained_column_id: ColumnId,
    pub referenced_column_id: ColumnId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub fn as_sql(self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub table_id: TableId,
    pub name: Option<String>,
    pub expr: String,
    pub enforced: bool,
}

impl Realm {
    pub fn new() -> Self {
        Realm::default()
    }

    // Construction. The push methods return the id of the new object; parent
    // ids must have been issued by this realm.

    pub fn push_schema(&mut self, name: impl Into<String>) -> SchemaId {
        let id = SchemaId(self.schemas.len() as u32);
        self.schemas.push(Schema {
            name: name.into(),
            comment: None,
        });
        id
    }

    pub fn push_table(&mut self, schema_id: SchemaId, name: impl Into<String>) -> TableId {
        debug_assert!(schema_id.index() < self.schemas.len());
        let id = TableId(self.tables.len() as u32);
        self.tables.push(Table {
            schema_id,
            name: name.into(),
            primary_key: None,
            comment: None,
        });
        id
    }

    pub fn push_column(&mut self, column: Column) -> ColumnId {
        debug_assert!(column.table_id.index() < self.tables.len());
        let id = ColumnId(self.columns.len() as u32);
        self.columns.push(column);
        id
    }

    pub fn set_primary_key(&mut self, table_id: TableId, pk: PrimaryKey) {
        debug_assert!(!pk.columns.is_empty());
        debug_assert!(pk.columns.iter().all(|c| self.columns[c.index()].table_id == table_id));
        self.tables[table_id.index()].primary_key = Some(pk);
    }

    pub fn set_table_comment(&mut self, table_id: TableId, comment: impl Into<String>) {
        self.tables[table_id.index()].comment = Some(comment.into());
    }

    pub fn push_index(&mut self, index: Index) -> IndexId {
        debug_assert!(index.table_id.index() < self.tables.len());
        let id = IndexId(self.indexes.len() as u32);
        self.indexes.push(index);
        id
    }

    pub fn push_index_part(&mut self, part: IndexPart) -> IndexPartId {
        if let IndexPartValue::Column(col) = part.value {
            debug_assert!(
                self.columns[col.index()].table_id == self.indexes[part.index_id.index()].table_id,
                "index part must reference a column of the indexed table",
            );
        }
        let id = IndexPartId(self.index_parts.len() as u32);
        self.index_parts.push(part);
        id
    }

    pub fn push_foreign_key(&mut self, fk: ForeignKey) -> ForeignKeyId {
        debug_assert!(fk.table_id.index() < self.tables.len());
        debug_assert!(fk.referenced_table_id.index() < self.tables.len());
        let id = ForeignKeyId(self.foreign_keys.len() as u32);
        self.foreign_keys.push(fk);
        id
    }

    pub fn push_foreign_key_column(&mut self, fk_column: ForeignKeyColumn) -> ForeignKeyColumnId {
        let id = ForeignKeyColumnId(self.foreign_key_columns.len() as u32);
        self.foreign_key_columns.push(fk_column);
        id
    }

    pub fn push_check(&mut self, check: Check) -> CheckId {
        debug_assert!(check.table_id.index() < self.tables.len());
        let id = CheckId(self.checks.len() as u32);
        self.checks.push(check);
        id
    }

    // Lookup.

    pub fn walk<I>(&self, id: I) -> Walker<'_, I> {
        Walker { realm: self, id }
    }

    pub fn walk_schemas(&self) -> impl ExactSizeIterator<Item = SchemaWalker<'_>> {
        (0..self.schemas.len()).map(move |i| self.walk(SchemaId(i as u32)))
    }

    pub fn walk_tables(&self) -> impl ExactSizeIterator<Item = TableWalker<'_>> {
        (0..self.tables.len()).map(move |i| self.walk(TableId(i as u32)))
    }

    pub fn walk_foreign_keys(&self) -> impl ExactSizeIterator<Item = ForeignKeyWalker<'_>> {
        (0..self.foreign_keys.len()).map(move |i| self.walk(ForeignKeyId(i as u32)))
    }

    pub fn find_schema(&self, name: &str) -> Option<SchemaWalker<'_>> {
        self.walk_schemas().find(|s| s.name() == name)
    }

    pub fn find_table(&self, schema: &str, table: &str) -> Option<TableWalker<'_>> {
        self.walk_tables().find(|t| t.name() == table && t.schema().name() == schema)
    }

    pub fn schemas_count(&self) -> usize {
        self.schemas.len()
    }

    pub fn tables_count(&self) -> usize {
        self.tables.len()
    }

    /// True when the realm contains no schemas or only empty schemas.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_realm() -> Realm {
        let mut realm = Realm::new();
        let main = realm.push_schema("main");
        let users = realm.push_table(main, "users");
        let id = realm.push_column(Column {
            table_id: users,
            name: "id".into(),
            tpe: ColumnType::integer(),
            default: None,
            auto_increment: true,
            comment: None,
            charset: None,
            collation: None,
            generated: None,
        });
        realm.push_column(Column {
            table_id: users,
            name: "name".into(),
            tpe: ColumnType::varchar(100).nullable(true),
            default: None,
            auto_increment: false,
            comment: None,
            charset: None,
            collation: None,
            generated: None,
        });
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
    fn walkers_resolve_back_references() {
        let realm = sample_realm();
        let table = realm.find_table("main", "users").unwrap();

        assert_eq!(table.schema().name(), "main");
        assert_eq!(table.columns().count(), 2);

        let name = table.column("name").unwrap();
        assert_eq!(name.table().name(), "users");
        assert!(name.tpe().is_nullable);
        assert!(!table.primary_key_columns().any(|c| c.name() == "name"));
        assert!(table.primary_key_columns().any(|c| c.name() == "id"));
    }

    #[test]
    fn find_table_is_schema_scoped() {
        let realm = sample_realm();
        assert!(realm.find_table("main", "users").is_some());
        assert!(realm.find_table("other", "users").is_none());
    }
}
