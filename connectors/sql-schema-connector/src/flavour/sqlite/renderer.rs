//! Turning a change list into SQLite statements.
//!
//! SQLite can alter very little in place: adding plain columns, dropping
//! unconstrained columns and renaming things. Everything else — column type
//! or nullability changes, primary key changes, any foreign key or check
//! constraint change — goes through the table redefinition recipe: create a
//! `new_<table>` with the target definition, copy the surviving rows, drop
//! the old table, rename, recreate the indexes. All changes of one table
//! that need the recipe are consolidated into a single redefinition.

use schema_connector::{
    Change, ColumnChange, ConnectorError, ConnectorResult, Migration, Pair, Plan, PlanChange, PlanOptions,
    TableChange,
};
use sql_ddl::sqlite as ddl;
use sql_realm::{
    walkers::{ColumnWalker, IndexWalker, TableWalker},
    ColumnId, ColumnTypeFamily, DefaultValue, ForeignKeyId, IndexPartValue, ReferentialAction, SortOrder, TableId,
    TimeKind,
};
use std::collections::{HashMap, HashSet};

/// Plan options are accepted for interface parity; SQLite plans are always
/// single-schema and unqualified.
pub(super) fn render_plan(name: &str, migration: &Migration, _options: &PlanOptions) -> ConnectorResult<Plan> {
    let mut plan = Plan::new(name);
    let mut ctx = RenderContext::new(migration)?;

    for change in &migration.changes {
        ctx.render_change(change, &mut plan)?;
    }

    Ok(plan)
}

struct RenderContext<'a> {
    migration: &'a Migration,
    /// from-realm table id → to-realm table id, for paired tables.
    pair_of_from: HashMap<TableId, TableId>,
    /// to-realm table id → from-realm table id.
    pair_of_to: HashMap<TableId, TableId>,
    /// Foreign keys added as separate changes; excluded from `CREATE TABLE`.
    fk_adds: HashSet<ForeignKeyId>,
    /// to-realm column id → from-realm column id, from modify/rename pairs.
    column_pairs: HashMap<ColumnId, ColumnId>,
    /// Tables (to-realm ids) that go through redefinition.
    redefined: HashSet<TableId>,
    /// Redefinitions already written to the plan.
    emitted: HashSet<TableId>,
}

impl<'a> RenderContext<'a> {
    fn new(migration: &'a Migration) -> ConnectorResult<Self> {
        let mut pair_of_from = HashMap::new();
        let mut pair_of_to = HashMap::new();

        for to_table in migration.to.walk_tables() {
            let matched = migration.from.walk_tables().find(|t| {
                t.name().eq_ignore_ascii_case(to_table.name())
                    && t.schema().name().eq_ignore_ascii_case(to_table.schema().name())
            });
            if let Some(from_table) = matched {
                pair_of_from.insert(from_table.id, to_table.id);
                pair_of_to.insert(to_table.id, from_table.id);
            }
        }

        let mut fk_adds = HashSet::new();
        let mut column_pairs = HashMap::new();
        for change in &migration.changes {
            match change {
                Change::AddForeignKey(fk_id) => {
                    fk_adds.insert(*fk_id);
                }
                Change::RenameTable(pair) => {
                    pair_of_from.insert(pair.from, pair.to);
                    pair_of_to.insert(pair.to, pair.from);
                }
                Change::ModifyColumn { column, .. } | Change::RenameColumn(column) => {
                    column_pairs.insert(column.to, column.from);
                }
                _ => (),
            }
        }

        let mut ctx = RenderContext {
            migration,
            pair_of_from,
            pair_of_to,
            fk_adds,
            column_pairs,
            redefined: HashSet::new(),
            emitted: HashSet::new(),
        };

        for change in &migration.changes {
            if let Some(table_id) = ctx.change_target(change) {
                if ctx.requires_redefinition(change) {
                    ctx.redefined.insert(table_id);
                }
            }
        }

        Ok(ctx)
    }

    /// The to-realm table a modification belongs to, if any.
    fn change_target(&self, change: &Change) -> Option<TableId> {
        let to = &self.migration.to;
        let from = &self.migration.from;
        match change {
            Change::AddColumn(col) | Change::ModifyColumn { column: Pair { to: col, .. }, .. } => {
                Some(to.walk(*col).table().id)
            }
            Change::RenameColumn(pair) => Some(to.walk(pair.to).table().id),
            Change::DropColumn(col) => self.pair_of_from.get(&from.walk(*col).table().id).copied(),
            Change::AddIndex(idx) => Some(to.walk(*idx).table().id),
            Change::ModifyIndex(pair) => Some(to.walk(pair.to).table().id),
            Change::DropIndex(idx) => self.pair_of_from.get(&from.walk(*idx).table().id).copied(),
            Change::AddForeignKey(fk) => Some(to.walk(*fk).table().id),
            Change::ModifyForeignKey(pair) => Some(to.walk(pair.to).table().id),
            Change::DropForeignKey(fk) => self.pair_of_from.get(&from.walk(*fk).table().id).copied(),
            Change::AddCheck(check) => Some(to.walk(*check).table().id),
            Change::ModifyCheck(pair) => Some(to.walk(pair.to).table().id),
            Change::DropCheck(check) => self.pair_of_from.get(&from.walk(*check).table().id).copied(),
            Change::ModifyTable { table, .. } => Some(table.to),
            _ => None,
        }
    }

    fn requires_redefinition(&self, change: &Change) -> bool {
        let to = &self.migration.to;
        let from = &self.migration.from;
        match change {
            Change::ModifyColumn { changes, .. } => !(*changes & !ColumnChange::Comment).is_empty(),
            Change::AddColumn(col) => !column_is_addable(to.walk(*col)),
            Change::DropColumn(col) => !column_is_droppable(from.walk(*col)),
            Change::AddForeignKey(_)
            | Change::DropForeignKey(_)
            | Change::ModifyForeignKey(_)
            | Change::AddCheck(_)
            | Change::DropCheck(_)
            | Change::ModifyCheck(_) => true,
            Change::ModifyTable { changes, .. } => !(*changes & !TableChange::Comment).is_empty(),
            _ => false,
        }
    }

    fn render_change(&mut self, change: &Change, plan: &mut Plan) -> ConnectorResult<()> {
        // Anything touching a redefined table folds into the redefinition,
        // emitted once at the position of the first folded change.
        if let Some(table_id) = self.change_target(change) {
            if self.redefined.contains(&table_id) {
                if self.emitted.insert(table_id) {
                    self.render_redefinition(table_id, plan);
                }
                return Ok(());
            }
        }

        let from = &self.migration.from;
        let to = &self.migration.to;

        match change {
            Change::AddSchema(id) => {
                return Err(ConnectorError::UnsupportedChange(format!(
                    "sqlite databases hold a single schema, cannot add schema {:?}",
                    to.walk(*id).name()
                )));
            }
            Change::DropSchema(id) => {
                return Err(ConnectorError::UnsupportedChange(format!(
                    "sqlite databases hold a single schema, cannot drop schema {:?}",
                    from.walk(*id).name()
                )));
            }
            // No schema-level attributes exist on sqlite.
            Change::ModifySchema(_) => (),

            Change::AddTable(id) => {
                let table = to.walk(*id);
                plan.push(PlanChange {
                    cmd: self.render_create_table(table, table.name()),
                    reverse: Some(
                        ddl::DropTable {
                            table_name: table.name().into(),
                        }
                        .to_string(),
                    ),
                    comment: Some(format!("Create {:?} table", table.name())),
                });
                for index in table.indexes() {
                    plan.push(PlanChange {
                        cmd: render_create_index(index).to_string(),
                        reverse: Some(
                            ddl::DropIndex {
                                index_name: index.name().into(),
                            }
                            .to_string(),
                        ),
                        comment: Some(format!("Create index {:?} on table {:?}", index.name(), table.name())),
                    });
                }
            }
            Change::DropTable(id) => {
                let table = from.walk(*id);
                plan.push(PlanChange {
                    cmd: ddl::DropTable {
                        table_name: table.name().into(),
                    }
                    .to_string(),
                    reverse: Some(self.render_create_table_full(table)),
                    comment: Some(format!("Drop {:?} table", table.name())),
                });
            }
            Change::RenameTable(pair) => {
                let from_table = from.walk(pair.from);
                let to_table = to.walk(pair.to);
                plan.push(PlanChange {
                    cmd: ddl::AlterTable::RenameTo {
                        table_name: from_table.name().into(),
                        to: to_table.name().into(),
                    }
                    .to_string(),
                    reverse: Some(
                        ddl::AlterTable::RenameTo {
                            table_name: to_table.name().into(),
                            to: from_table.name().into(),
                        }
                        .to_string(),
                    ),
                    comment: Some(format!("Rename table {:?} to {:?}", from_table.name(), to_table.name())),
                });
            }

            Change::AddColumn(col) => {
                let column = to.walk(*col);
                let table_name = column.table().name();
                plan.push(PlanChange {
                    cmd: ddl::AlterTable::AddColumn {
                        table_name: table_name.into(),
                        column: render_column_def(column, false),
                    }
                    .to_string(),
                    reverse: Some(
                        ddl::AlterTable::DropColumn {
                            table_name: table_name.into(),
                            column_name: column.name().into(),
                        }
                        .to_string(),
                    ),
                    comment: Some(format!("Add column {:?} to table {:?}", column.name(), table_name)),
                });
            }
            Change::DropColumn(col) => {
                let column = from.walk(*col);
                let table_name = column.table().name();
                let reverse = column_is_addable(column).then(|| {
                    ddl::AlterTable::AddColumn {
                        table_name: table_name.into(),
                        column: render_column_def(column, false),
                    }
                    .to_string()
                });
                plan.push(PlanChange {
                    cmd: ddl::AlterTable::DropColumn {
                        table_name: table_name.into(),
                        column_name: column.name().into(),
                    }
                    .to_string(),
                    reverse,
                    comment: Some(format!("Drop column {:?} from table {:?}", column.name(), table_name)),
                });
            }
            Change::RenameColumn(pair) => {
                let from_column = from.walk(pair.from);
                let to_column = to.walk(pair.to);
                let table_name = to_column.table().name();
                plan.push(PlanChange {
                    cmd: ddl::AlterTable::RenameColumn {
                        table_name: table_name.into(),
                        from: from_column.name().into(),
                        to: to_column.name().into(),
                    }
                    .to_string(),
                    reverse: Some(
                        ddl::AlterTable::RenameColumn {
                            table_name: table_name.into(),
                            from: to_column.name().into(),
                            to: from_column.name().into(),
                        }
                        .to_string(),
                    ),
                    comment: Some(format!(
                        "Rename column {:?} to {:?} in table {:?}",
                        from_column.name(),
                        to_column.name(),
                        table_name
                    )),
                });
            }
            // Comment-only modifications have no SQL representation here.
            Change::ModifyColumn { .. } | Change::ModifyTable { .. } => (),

            Change::AddIndex(idx) => {
                let index = to.walk(*idx);
                plan.push(PlanChange {
                    cmd: render_create_index(index).to_string(),
                    reverse: Some(
                        ddl::DropIndex {
                            index_name: index.name().into(),
                        }
                        .to_string(),
                    ),
                    comment: Some(format!(
                        "Create index {:?} on table {:?}",
                        index.name(),
                        index.table().name()
                    )),
                });
            }
            Change::DropIndex(idx) => {
                let index = from.walk(*idx);
                plan.push(PlanChange {
                    cmd: ddl::DropIndex {
                        index_name: index.name().into(),
                    }
                    .to_string(),
                    reverse: Some(render_create_index(index).to_string()),
                    comment: Some(format!(
                        "Drop index {:?} from table {:?}",
                        index.name(),
                        index.table().name()
                    )),
                });
            }
            Change::ModifyIndex(pair) => {
                let previous = from.walk(pair.from);
                let next = to.walk(pair.to);
                plan.push(PlanChange {
                    cmd: ddl::DropIndex {
                        index_name: previous.name().into(),
                    }
                    .to_string(),
                    reverse: Some(render_create_index(previous).to_string()),
                    comment: Some(format!("Drop index {:?}", previous.name())),
                });
                plan.push(PlanChange {
                    cmd: render_create_index(next).to_string(),
                    reverse: Some(
                        ddl::DropIndex {
                            index_name: next.name().into(),
                        }
                        .to_string(),
                    ),
                    comment: Some(format!(
                        "Create index {:?} on table {:?}",
                        next.name(),
                        next.table().name()
                    )),
                });
            }

            // Constraint changes on sqlite always redefine, so reaching one
            // of these outside a redefined table is a logic error upstream.
            Change::AddForeignKey(_)
            | Change::DropForeignKey(_)
            | Change::ModifyForeignKey(_)
            | Change::AddCheck(_)
            | Change::DropCheck(_)
            | Change::ModifyCheck(_) => {
                return Err(ConnectorError::UnsupportedChange(
                    "constraint change outside a table redefinition".into(),
                ));
            }
        }

        Ok(())
    }

    /// The redefinition recipe. Runs with foreign key enforcement disabled;
    /// `defer_foreign_keys` covers execution inside a transaction.
    fn render_redefinition(&self, table_id: TableId, plan: &mut Plan) {
        let to_table = self.migration.to.walk(table_id);
        let from_table = self.pair_of_to.get(&table_id).map(|id| self.migration.from.walk(*id));
        let table_name = to_table.name();
        let tmp_name = format!("new_{table_name}");

        plan.push(PlanChange {
            cmd: "PRAGMA defer_foreign_keys = ON".into(),
            reverse: None,
            comment: Some("Disable the enforcement of foreign-keys constraints".into()),
        });
        plan.push(PlanChange {
            cmd: "PRAGMA foreign_keys = OFF".into(),
            reverse: None,
            comment: None,
        });

        // The full target definition, including foreign keys arriving
        // through this very redefinition.
        plan.push(PlanChange {
            cmd: render_create_table_filtered(to_table, &tmp_name, &HashSet::new()),
            reverse: None,
            comment: Some(format!("Create {tmp_name:?} table with the new definition")),
        });

        // Copy the surviving rows. Columns are matched through explicit
        // rename/modify pairs first, then by name.
        let source_table = from_table.unwrap_or(to_table);
        let mut target_cols = Vec::new();
        let mut source_cols = Vec::new();
        for to_col in to_table.columns() {
            if to_col.generated().is_some() {
                continue;
            }
            let source = self
                .column_pairs
                .get(&to_col.id)
                .map(|id| self.migration.from.walk(*id))
                .filter(|_| from_table.is_some())
                .or_else(|| {
                    source_table
                        .columns()
                        .find(|c| c.name().eq_ignore_ascii_case(to_col.name()))
                });
            if let Some(source_col) = source {
                target_cols.push(ddl::Ident(to_col.name()).to_string());
                source_cols.push(ddl::Ident(source_col.name()).to_string());
            }
        }
        if !target_cols.is_empty() {
            plan.push(PlanChange {
                cmd: format!(
                    "INSERT INTO {} ({}) SELECT {} FROM {}",
                    ddl::Ident(&tmp_name),
                    target_cols.join(", "),
                    source_cols.join(", "),
                    ddl::Ident(table_name),
                ),
                reverse: None,
                comment: Some(format!("Copy rows from table {table_name:?}")),
            });
        }

        plan.push(PlanChange {
            cmd: ddl::DropTable {
                table_name: table_name.into(),
            }
            .to_string(),
            reverse: None,
            comment: Some(format!("Drop old {table_name:?} table")),
        });
        plan.push(PlanChange {
            cmd: ddl::AlterTable::RenameTo {
                table_name: tmp_name.clone(),
                to: table_name.into(),
            }
            .to_string(),
            reverse: None,
            comment: Some(format!("Rename {tmp_name:?} to {table_name:?}")),
        });

        for index in to_table.indexes() {
            plan.push(PlanChange {
                cmd: render_create_index(index).to_string(),
                reverse: None,
                comment: Some(format!("Create index {:?} on table {table_name:?}", index.name())),
            });
        }

        plan.push(PlanChange {
            cmd: "PRAGMA foreign_keys = ON".into(),
            reverse: None,
            comment: Some("Enable back the enforcement of foreign-keys constraints".into()),
        });
        plan.push(PlanChange {
            cmd: "PRAGMA defer_foreign_keys = OFF".into(),
            reverse: None,
            comment: None,
        });
    }

    /// `CREATE TABLE` from the to-side definition, leaving out foreign keys
    /// that are added by separate changes.
    fn render_create_table(&self, table: TableWalker<'_>, table_name: &str) -> String {
        render_create_table_filtered(table, table_name, &self.fk_adds)
    }

    fn render_create_table_full(&self, table: TableWalker<'_>) -> String {
        render_create_table_filtered(table, table.name(), &HashSet::new())
    }
}

fn render_create_table_filtered(table: TableWalker<'_>, table_name: &str, excluded_fks: &HashSet<ForeignKeyId>) -> String {
    // A lone integer primary key column with AUTOINCREMENT must carry the
    // key inline; otherwise the key renders as a table constraint.
    let inline_pk_column = table
        .primary_key()
        .filter(|pk| pk.columns.len() == 1)
        .map(|pk| pk.columns[0])
        .filter(|id| table.realm.walk(*id).is_auto_increment());

    let columns = table
        .columns()
        .map(|col| render_column_def(col, inline_pk_column == Some(col.id)))
        .collect();

    let primary_key = if inline_pk_column.is_some() {
        Vec::new()
    } else {
        table.primary_key_columns().map(|c| c.name().to_owned()).collect()
    };

    let foreign_keys = table
        .foreign_keys()
        .filter(|fk| !excluded_fks.contains(&fk.id))
        .map(|fk| ddl::ForeignKeyClause {
            constraint_name: fk.constraint_name().map(ToOwned::to_owned),
            columns: fk.constrained_columns().map(|c| c.name().to_owned()).collect(),
            referenced_table: fk.referenced_table().name().to_owned(),
            referenced_columns: fk.referenced_columns().map(|c| c.name().to_owned()).collect(),
            on_delete: (fk.on_delete() != ReferentialAction::NoAction).then(|| fk.on_delete().as_sql()),
            on_update: (fk.on_update() != ReferentialAction::NoAction).then(|| fk.on_update().as_sql()),
        })
        .collect();

    let checks = table
        .checks()
        .map(|check| ddl::CheckClause {
            constraint_name: check.name().map(ToOwned::to_owned),
            expr: check.expr().to_owned(),
        })
        .collect();

    ddl::CreateTable {
        table_name: table_name.to_owned(),
        columns,
        primary_key,
        foreign_keys,
        checks,
    }
    .to_string()
}

fn render_column_def(column: ColumnWalker<'_>, inline_pk_autoincrement: bool) -> ddl::ColumnDef {
    ddl::ColumnDef {
        name: column.name().to_owned(),
        r#type: render_type(column),
        not_null: column.is_required(),
        default: column.default().map(render_default),
        auto_increment: inline_pk_autoincrement,
        generated: column.generated().map(|generated| ddl::GeneratedClause {
            expr: generated.expr.clone(),
            stored: generated.stored,
        }),
    }
}

fn render_type(column: ColumnWalker<'_>) -> String {
    let tpe = column.tpe();
    if !tpe.raw.is_empty() {
        return tpe.raw.clone();
    }
    match &tpe.family {
        ColumnTypeFamily::Integer { .. } => "integer".into(),
        ColumnTypeFamily::Float { .. } => "real".into(),
        ColumnTypeFamily::Decimal { precision, scale } => match (precision, scale) {
            (Some(p), Some(s)) => format!("decimal({p},{s})"),
            _ => "decimal".into(),
        },
        ColumnTypeFamily::String { size: Some(size) } => format!("varchar({size})"),
        ColumnTypeFamily::String { size: None } => "text".into(),
        ColumnTypeFamily::Binary { .. } => "blob".into(),
        ColumnTypeFamily::Boolean => "boolean".into(),
        ColumnTypeFamily::Enum { .. } => "text".into(),
        ColumnTypeFamily::Time { kind } => match kind {
            TimeKind::Date => "date".into(),
            TimeKind::Time => "time".into(),
            TimeKind::DateTime => "datetime".into(),
            TimeKind::Timestamp => "timestamp".into(),
        },
        ColumnTypeFamily::Json => "json".into(),
        ColumnTypeFamily::Spatial { kind } => kind.clone(),
        ColumnTypeFamily::Unsupported => "blob".into(),
    }
}

fn render_default(default: &DefaultValue) -> String {
    match default {
        DefaultValue::Expr(expr) => format!("({expr})"),
        DefaultValue::Literal(literal) => {
            let numeric = !literal.is_empty()
                && literal.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+');
            let keyword = matches!(literal.to_ascii_uppercase().as_str(), "NULL" | "TRUE" | "FALSE");
            if numeric || keyword {
                literal.clone()
            } else {
                format!("'{}'", literal.replace('\'', "''"))
            }
        }
    }
}

fn render_create_index(index: IndexWalker<'_>) -> ddl::CreateIndex {
    let parts = index
        .parts()
        .map(|part| {
            let mut rendered = match part.value() {
                IndexPartValue::Column(_) => ddl::Ident(part.column().unwrap().name()).to_string(),
                IndexPartValue::Expr(expr) => format!("({expr})"),
            };
            if part.sort() == SortOrder::Desc {
                rendered.push_str(" DESC");
            }
            rendered
        })
        .collect();

    ddl::CreateIndex {
        unique: index.is_unique(),
        index_name: index.name().to_owned(),
        table_name: index.table().name().to_owned(),
        parts,
        predicate: index.predicate().map(ToOwned::to_owned),
    }
}

/// Whether `ALTER TABLE … ADD COLUMN` can add this column: not part of the
/// primary key, no expression default, nullable or defaulted, not STORED
/// generated.
fn column_is_addable(column: ColumnWalker<'_>) -> bool {
    if column.is_part_of_primary_key() {
        return false;
    }
    if matches!(column.default(), Some(DefaultValue::Expr(_))) {
        return false;
    }
    if column.generated().map(|g| g.stored).unwrap_or(false) {
        return false;
    }
    !(column.is_required() && column.default().is_none() && column.generated().is_none())
}

/// Whether `ALTER TABLE … DROP COLUMN` can drop this column: not part of the
/// primary key, of any index or foreign key, and not mentioned by a check.
fn column_is_droppable(column: ColumnWalker<'_>) -> bool {
    if column.is_part_of_primary_key() || column.is_part_of_foreign_key() {
        return false;
    }
    let table = column.table();
    let indexed = table
        .indexes()
        .any(|index| index.parts().any(|part| part.column().map(|c| c.id) == Some(column.id)));
    if indexed {
        return false;
    }
    !table.checks().any(|check| check.expr().contains(column.name()))
}
