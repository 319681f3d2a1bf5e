//! Read-only accessors over a realm.
//!
//! A walker is a `(realm, id)` pair. It is `Copy`, cheap to hand around, and
//! resolves parents and children lazily, which is what lets the realm stay a
//! set of flat arenas while the API reads like a tree with back-references.

use crate::{
    Check, CheckId, Column, ColumnId, ColumnType, DefaultValue, ForeignKey, ForeignKeyId, Generated, Index, IndexId,
    IndexPart, IndexPartId, IndexPartValue, PrimaryKey, Realm, ReferentialAction, Schema, SchemaId, SortOrder, Table,
    TableId,
};

#[derive(Debug)]
pub struct Walker<'a, I> {
    pub realm: &'a Realm,
    pub id: I,
}

impl<I: Copy> Clone for Walker<'_, I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I: Copy> Copy for Walker<'_, I> {}

impl<I: PartialEq> PartialEq for Walker<'_, I> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.realm, other.realm) && self.id == other.id
    }
}

pub type SchemaWalker<'a> = Walker<'a, SchemaId>;
pub type TableWalker<'a> = Walker<'a, TableId>;
pub type ColumnWalker<'a> = Walker<'a, ColumnId>;
pub type IndexWalker<'a> = Walker<'a, IndexId>;
pub type IndexPartWalker<'a> = Walker<'a, IndexPartId>;
pub type ForeignKeyWalker<'a> = Walker<'a, ForeignKeyId>;
pub type CheckWalker<'a> = Walker<'a, CheckId>;

impl<'a> SchemaWalker<'a> {
    fn get(self) -> &'a Schema {
        &self.realm.schemas[self.id.index()]
    }

    pub fn name(self) -> &'a str {
        &self.get().name
    }

    pub fn comment(self) -> Option<&'a str> {
        self.get().comment.as_deref()
    }

    pub fn tables(self) -> impl Iterator<Item = TableWalker<'a>> {
        let schema_id = self.id;
        self.realm
            .walk_tables()
            .filter(move |table| table.get().schema_id == schema_id)
    }
}

impl<'a> TableWalker<'a> {
    fn get(self) -> &'a Table {
        &self.realm.tables[self.id.index()]
    }

    pub fn name(self) -> &'a str {
        &self.get().name
    }

    pub fn schema(self) -> SchemaWalker<'a> {
        self.realm.walk(self.get().schema_id)
    }

    pub fn comment(self) -> Option<&'a str> {
        self.get().comment.as_deref()
    }

    pub fn columns(self) -> impl Iterator<Item = ColumnWalker<'a>> {
        let table_id = self.id;
        let realm = self.realm;
        (0..realm.columns.len())
            .map(move |i| realm.walk(ColumnId(i as u32)))
            .filter(move |col| col.get().table_id == table_id)
    }

    pub fn column(self, name: &str) -> Option<ColumnWalker<'a>> {
        self.columns().find(|col| col.name() == name)
    }

    pub fn primary_key(self) -> Option<&'a PrimaryKey> {
        self.get().primary_key.as_ref()
    }

    pub fn primary_key_columns(self) -> impl Iterator<Item = ColumnWalker<'a>> {
        let realm = self.realm;
        self.get()
            .primary_key
            .iter()
            .flat_map(|pk| pk.columns.iter())
            .map(move |id| realm.walk(*id))
    }

    pub fn is_part_of_primary_key(self, column_id: ColumnId) -> bool {
        self.get()
            .primary_key
            .as_ref()
            .map(|pk| pk.columns.contains(&column_id))
            .unwrap_or(false)
    }

    pub fn indexes(self) -> impl Iterator<Item = IndexWalker<'a>> {
        let table_id = self.id;
        let realm = self.realm;
        (0..realm.indexes.len())
            .map(move |i| realm.walk(IndexId(i as u32)))
            .filter(move |idx| idx.get().table_id == table_id)
    }

    pub fn index(self, name: &str) -> Option<IndexWalker<'a>> {
        self.indexes().find(|idx| idx.name() == name)
    }

    pub fn foreign_keys(self) -> impl Iterator<Item = ForeignKeyWalker<'a>> {
        let table_id = self.id;
        let realm = self.realm;
        (0..realm.foreign_keys.len())
            .map(move |i| realm.walk(ForeignKeyId(i as u32)))
            .filter(move |fk| fk.get().table_id == table_id)
    }

    /// Foreign keys on other tables pointing at this table.
    pub fn referencing_foreign_keys(self) -> impl Iterator<Item = ForeignKeyWalker<'a>> {
        let table_id = self.id;
        let realm = self.realm;
        (0..realm.foreign_keys.len())
            .map(move |i| realm.walk(ForeignKeyId(i as u32)))
            .filter(move |fk| fk.get().referenced_table_id == table_id && fk.get().table_id != table_id)
    }

    pub fn checks(self) -> impl Iterator<Item = CheckWalker<'a>> {
        let table_id = self.id;
        let realm = self.realm;
        (0..realm.checks.len())
            .map(move |i| realm.walk(CheckId(i as u32)))
            .filter(move |check| check.get().table_id == table_id)
    }
}

impl<'a> ColumnWalker<'a> {
    fn get(self) -> &'a Column {
        &self.realm.columns[self.id.index()]
    }

    pub fn name(self) -> &'a str {
        &self.get().name
    }

    pub fn table(self) -> TableWalker<'a> {
        self.realm.walk(self.get().table_id)
    }

    pub fn tpe(self) -> &'a ColumnType {
        &self.get().tpe
    }

    pub fn is_required(self) -> bool {
        !self.get().tpe.is_nullable
    }

    pub fn default(self) -> Option<&'a DefaultValue> {
        self.get().default.as_ref()
    }

    pub fn is_auto_increment(self) -> bool {
        self.get().auto_increment
    }

    pub fn comment(self) -> Option<&'a str> {
        self.get().comment.as_deref()
    }

    pub fn collation(self) -> Option<&'a str> {
        self.get().collation.as_deref()
    }

    pub fn charset(self) -> Option<&'a str> {
        self.get().charset.as_deref()
    }

    pub fn generated(self) -> Option<&'a Generated> {
        self.get().generated.as_ref()
    }

    pub fn is_part_of_primary_key(self) -> bool {
        self.table().is_part_of_primary_key(self.id)
    }

    /// True when some foreign key of the owning table constrains this column.
    pub fn is_part_of_foreign_key(self) -> bool {
        let id = self.id;
        self.table()
            .foreign_keys()
            .any(|fk| fk.constrained_columns().any(|col| col.id == id))
    }
}

impl<'a> IndexWalker<'a> {
    fn get(self) -> &'a Index {
        &self.realm.indexes[self.id.index()]
    }

    pub fn name(self) -> &'a str {
        &self.get().name
    }

    pub fn table(self) -> TableWalker<'a> {
        self.realm.walk(self.get().table_id)
    }

    pub fn is_unique(self) -> bool {
        self.get().unique
    }

    pub fn predicate(self) -> Option<&'a str> {
        self.get().predicate.as_deref()
    }

    pub fn comment(self) -> Option<&'a str> {
        self.get().comment.as_deref()
    }

    pub fn parts(self) -> impl Iterator<Item = IndexPartWalker<'a>> {
        let index_id = self.id;
        let realm = self.realm;
        (0..realm.index_parts.len())
            .map(move |i| realm.walk(IndexPartId(i as u32)))
            .filter(move |part| part.get().index_id == index_id)
    }
}

impl<'a> IndexPartWalker<'a> {
    fn get(self) -> &'a IndexPart {
        &self.realm.index_parts[self.id.index()]
    }

    pub fn index(self) -> IndexWalker<'a> {
        self.realm.walk(self.get().index_id)
    }

    pub fn value(self) -> &'a IndexPartValue {
        &self.get().value
    }

    pub fn column(self) -> Option<ColumnWalker<'a>> {
        match self.get().value {
            IndexPartValue::Column(id) => Some(self.realm.walk(id)),
            IndexPartValue::Expr(_) => None,
        }
    }

    pub fn expr(self) -> Option<&'a str> {
        match &self.get().value {
            IndexPartValue::Expr(expr) => Some(expr),
            IndexPartValue::Column(_) => None,
        }
    }

    pub fn sort(self) -> SortOrder {
        self.get().sort
    }
}

impl<'a> ForeignKeyWalker<'a> {
    fn get(self) -> &'a ForeignKey {
        &self.realm.foreign_keys[self.id.index()]
    }

    pub fn constraint_name(self) -> Option<&'a str> {
        self.get().constraint_name.as_deref()
    }

    pub fn table(self) -> TableWalker<'a> {
        self.realm.walk(self.get().table_id)
    }

    pub fn referenced_table(self) -> TableWalker<'a> {
        self.realm.walk(self.get().referenced_table_id)
    }

    pub fn is_self_referencing(self) -> bool {
        self.get().table_id == self.get().referenced_table_id
    }

    pub fn on_delete(self) -> ReferentialAction {
        self.get().on_delete
    }

    pub fn on_update(self) -> ReferentialAction {
        self.get().on_update
    }

    pub fn constrained_columns(self) -> impl Iterator<Item = ColumnWalker<'a>> {
        let fk_id = self.id;
        let realm = self.realm;
        realm
            .foreign_key_columns
            .iter()
            .filter(move |fkc| fkc.foreign_key_id == fk_id)
            .map(move |fkc| realm.walk(fkc.constrained_column_id))
    }

    pub fn referenced_columns(self) -> impl Iterator<Item = ColumnWalker<'a>> {
        let fk_id = self.id;
        let realm = self.realm;
        realm
            .foreign_key_columns
            .iter()
            .filter(move |fkc| fkc.foreign_key_id == fk_id)
            .map(move |fkc| realm.walk(fkc.referenced_column_id))
    }

    /// The constrained column names, in order. Used for matching unnamed
    /// foreign keys between realms.
    pub fn constrained_column_names(self) -> Vec<&'a str> {
        self.constrained_columns().map(|col| col.name()).collect()
    }
}

impl<'a> CheckWalker<'a> {
    fn get(self) -> &'a Check {
        &self.realm.checks[self.id.index()]
    }

    pub fn name(self) -> Option<&'a str> {
        self.get().name.as_deref()
    }

    pub fn expr(self) -> &'a str {
        &self.get().expr
    }

    pub fn is_enforced(self) -> bool {
        self.get().enforced
    }

    pub fn table(self) -> TableWalker<'a> {
        self.realm.walk(self.get().table_id)
    }
}
