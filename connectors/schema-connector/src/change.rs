//! The change vocabulary produced by differs and consumed by planners.

use enumflags2::{bitflags, BitFlags};
use sql_realm::{CheckId, ColumnId, ForeignKeyId, IndexId, Realm, SchemaId, TableId};

/// A `(from, to)` pair of ids or values, one for each side of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair<T> {
    pub from: T,
    pub to: T,
}

impl<T> Pair<T> {
    pub fn new(from: T, to: T) -> Self {
        Pair { from, to }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Pair<U> {
        Pair {
            from: f(self.from),
            to: f(self.to),
        }
    }
}

/// What changed about a column, accumulated while comparing the two sides.
#[bitflags]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnChange {
    Type,
    Nullability,
    Default,
    AutoIncrement,
    Charset,
    Collation,
    Comment,
    Generated,
}

/// Table-level attribute changes that do not touch columns.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableChange {
    Comment,
    Charset,
    Collation,
    PrimaryKey,
}

/// One schema modification. `Add*` variants carry ids into the `to` realm,
/// `Drop*` variants ids into the `from` realm, and `Modify*`/`Rename*`
/// variants one id into each.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    AddSchema(SchemaId),
    DropSchema(SchemaId),
    ModifySchema(Pair<SchemaId>),
    AddTable(TableId),
    DropTable(TableId),
    ModifyTable {
        table: Pair<TableId>,
        changes: BitFlags<TableChange>,
    },
    RenameTable(Pair<TableId>),
    AddColumn(ColumnId),
    DropColumn(ColumnId),
    ModifyColumn {
        column: Pair<ColumnId>,
        changes: BitFlags<ColumnChange>,
    },
    RenameColumn(Pair<ColumnId>),
    AddIndex(IndexId),
    DropIndex(IndexId),
    ModifyIndex(Pair<IndexId>),
    AddForeignKey(ForeignKeyId),
    DropForeignKey(ForeignKeyId),
    ModifyForeignKey(Pair<ForeignKeyId>),
    AddCheck(CheckId),
    DropCheck(CheckId),
    ModifyCheck(Pair<CheckId>),
}

/// The category of a [`Change`], used by skip policies.
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCategory {
    AddSchema,
    DropSchema,
    ModifySchema,
    AddTable,
    DropTable,
    ModifyTable,
    RenameTable,
    AddColumn,
    DropColumn,
    ModifyColumn,
    RenameColumn,
    AddIndex,
    DropIndex,
    ModifyIndex,
    AddForeignKey,
    DropForeignKey,
    ModifyForeignKey,
    AddCheck,
    DropCheck,
    ModifyCheck,
}

impl Change {
    pub fn category(&self) -> ChangeCategory {
        match self {
            Change::AddSchema(_) => ChangeCategory::AddSchema,
            Change::DropSchema(_) => ChangeCategory::DropSchema,
            Change::ModifySchema(_) => ChangeCategory::ModifySchema,
            Change::AddTable(_) => ChangeCategory::AddTable,
            Change::DropTable(_) => ChangeCategory::DropTable,
            Change::ModifyTable { .. } => ChangeCategory::ModifyTable,
            Change::RenameTable(_) => ChangeCategory::RenameTable,
            Change::AddColumn(_) => ChangeCategory::AddColumn,
            Change::DropColumn(_) => ChangeCategory::DropColumn,
            Change::ModifyColumn { .. } => ChangeCategory::ModifyColumn,
            Change::RenameColumn(_) => ChangeCategory::RenameColumn,
            Change::AddIndex(_) => ChangeCategory::AddIndex,
            Change::DropIndex(_) => ChangeCategory::DropIndex,
            Change::ModifyIndex(_) => ChangeCategory::ModifyIndex,
            Change::AddForeignKey(_) => ChangeCategory::AddForeignKey,
            Change::DropForeignKey(_) => ChangeCategory::DropForeignKey,
            Change::ModifyForeignKey(_) => ChangeCategory::ModifyForeignKey,
            Change::AddCheck(_) => ChangeCategory::AddCheck,
            Change::DropCheck(_) => ChangeCategory::DropCheck,
            Change::ModifyCheck(_) => ChangeCategory::ModifyCheck,
        }
    }
}

/// The result of diffing two realms: both sides plus the ordered change list.
/// The ids inside `changes` are only meaningful against these two realms.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub from: Realm,
    pub to: Realm,
    pub changes: Vec<Change>,
}

impl Migration {
    pub fn new(from: Realm, to: Realm, changes: Vec<Change>) -> Self {
        Migration { from, to, changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// An explicit rename hint. Without a hint the differ emits drop + add.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRename {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRename {
    pub table: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Default, Clone)]
pub struct DiffOptions {
    /// Change categories the caller wants suppressed. Filtering happens
    /// before the change list is returned.
    pub skip: BitFlags<ChangeCategory>,
    pub table_renames: Vec<TableRename>,
    pub column_renames: Vec<ColumnRename>,
}
