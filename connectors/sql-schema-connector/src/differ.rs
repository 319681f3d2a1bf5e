//! The driver-agnostic schema differ.
//!
//! Compares two realms object by object and produces the ordered change
//! list. All dialect-specific equivalence decisions (type equality, default
//! equality, generated index names, identifier case) are delegated to the
//! flavour; everything else — matching, ordering, cycle breaking — lives
//! here and performs no I/O.
//!
//! Ordering of the result: schema additions, table additions in dependency
//! order, table renames, per-table changes (columns, then checks, then
//! indexes, then foreign key drops), deferred foreign key additions, table
//! drops in reverse dependency order, schema drops. Foreign keys between
//! tables created in the same run that form a reference cycle (including
//! self-references) are split out of the table creations and emitted as
//! `AddForeignKey` changes after all creations.

use crate::flavour::SqlFlavour;
use indexmap::IndexMap;
use schema_connector::{
    Change, ColumnChange, ConnectorResult, DiffOptions, Migration, Pair, TableChange,
};
use enumflags2::BitFlags;
use sql_realm::{
    walkers::{CheckWalker, ColumnWalker, ForeignKeyWalker, IndexWalker, TableWalker},
    ColumnId, ForeignKeyId, IndexId, IndexPartValue, Realm, SchemaId, TableId,
};
use std::collections::HashSet;

pub(crate) fn diff(
    from: Realm,
    to: Realm,
    flavour: &dyn SqlFlavour,
    options: &DiffOptions,
) -> ConnectorResult<Migration> {
    validate_realm(&from)?;
    validate_realm(&to)?;

    let changes = Differ {
        from: &from,
        to: &to,
        flavour,
        options,
    }
    .run();

    let changes = changes
        .into_iter()
        .filter(|change| !options.skip.contains(change.category()))
        .collect();

    Ok(Migration::new(from, to, changes))
}

struct Differ<'a> {
    from: &'a Realm,
    to: &'a Realm,
    flavour: &'a dyn SqlFlavour,
    options: &'a DiffOptions,
}

impl<'a> Differ<'a> {
    fn run(&self) -> Vec<Change> {
        let mut changes = Vec::new();

        let mut schema_pairs: Vec<Pair<SchemaId>> = Vec::new();
        let mut added_schemas: Vec<SchemaId> = Vec::new();
        let mut dropped_schemas: Vec<SchemaId> = Vec::new();

        for to_schema in self.to.walk_schemas() {
            let matched = self
                .from
                .walk_schemas()
                .find(|s| self.flavour.identifiers_match(s.name(), to_schema.name()));
            match matched {
                Some(from_schema) => schema_pairs.push(Pair::new(from_schema.id, to_schema.id)),
                None => added_schemas.push(to_schema.id),
            }
        }
        for from_schema in self.from.walk_schemas() {
            let survives = self
                .to
                .walk_schemas()
                .any(|s| self.flavour.identifiers_match(s.name(), from_schema.name()));
            if !survives {
                dropped_schemas.push(from_schema.id);
            }
        }

        changes.extend(added_schemas.iter().map(|id| Change::AddSchema(*id)));
        for pair in &schema_pairs {
            if self
                .flavour
                .schema_attrs_changed(self.from.walk(pair.from), self.to.walk(pair.to))
            {
                changes.push(Change::ModifySchema(*pair));
            }
        }

        // Table pairing across overlapping schemas.
        let mut table_pairs: Vec<Pair<TableId>> = Vec::new();
        let mut renamed_tables: Vec<Pair<TableId>> = Vec::new();
        let mut added_tables: Vec<TableId> = Vec::new();
        let mut dropped_tables: Vec<TableId> = Vec::new();

        for pair in &schema_pairs {
            let from_schema = self.from.walk(pair.from);
            let to_schema = self.to.walk(pair.to);

            for to_table in to_schema.tables() {
                let matched = from_schema
                    .tables()
                    .find(|t| self.flavour.identifiers_match(t.name(), to_table.name()));
                if let Some(from_table) = matched {
                    table_pairs.push(Pair::new(from_table.id, to_table.id));
                    continue;
                }

                let rename = self
                    .options
                    .table_renames
                    .iter()
                    .find(|hint| hint.to == to_table.name())
                    .and_then(|hint| {
                        from_schema
                            .tables()
                            .find(|t| self.flavour.identifiers_match(t.name(), &hint.from))
                    });
                match rename {
                    Some(from_table) => renamed_tables.push(Pair::new(from_table.id, to_table.id)),
                    None => added_tables.push(to_table.id),
                }
            }

            for from_table in from_schema.tables() {
                let survives = to_schema
                    .tables()
                    .any(|t| self.flavour.identifiers_match(t.name(), from_table.name()))
                    || renamed_tables.iter().any(|pair| pair.from == from_table.id);
                if !survives {
                    dropped_tables.push(from_table.id);
                }
            }
        }

        // Tables of added schemas are created with them; tables of dropped
        // schemas die with them and get no individual drop.
        for schema_id in &added_schemas {
            added_tables.extend(self.to.walk(*schema_id).tables().map(|t| t.id));
        }

        let (ordered_adds, mut deferred_fks) = self.order_added_tables(&added_tables);
        changes.extend(ordered_adds.iter().map(|id| Change::AddTable(*id)));

        changes.extend(renamed_tables.iter().map(|pair| Change::RenameTable(*pair)));

        for pair in table_pairs.iter().chain(renamed_tables.iter()) {
            self.diff_table(*pair, &mut changes, &mut deferred_fks);
        }

        changes.extend(deferred_fks.into_iter().map(Change::AddForeignKey));

        for table_id in self.order_dropped_tables(&dropped_tables) {
            changes.push(Change::DropTable(table_id));
        }
        changes.extend(dropped_schemas.iter().map(|id| Change::DropSchema(*id)));

        changes
    }

    /// Topologically orders table creations along their foreign key
    /// dependencies. Self-references and cycles are broken by deferring the
    /// offending foreign keys into a second wave.
    fn order_added_tables(&self, added: &[TableId]) -> (Vec<TableId>, Vec<ForeignKeyId>) {
        let added_set: HashSet<TableId> = added.iter().copied().collect();
        let mut deferred: Vec<ForeignKeyId> = Vec::new();
        let mut deps: IndexMap<TableId, HashSet<TableId>> = IndexMap::new();

        for &table_id in added {
            let mut table_deps = HashSet::new();
            for fk in self.to.walk(table_id).foreign_keys() {
                if fk.is_self_referencing() {
                    deferred.push(fk.id);
                    continue;
                }
                let referenced = fk.referenced_table().id;
                if added_set.contains(&referenced) {
                    table_deps.insert(referenced);
                }
            }
            deps.insert(table_id, table_deps);
        }

        let mut ordered = Vec::with_capacity(added.len());
        let mut emitted: HashSet<TableId> = HashSet::new();

        while ordered.len() < deps.len() {
            let next = deps
                .iter()
                .find(|(id, table_deps)| !emitted.contains(*id) && table_deps.iter().all(|d| emitted.contains(d)))
                .map(|(id, _)| *id);

            match next {
                Some(table_id) => {
                    emitted.insert(table_id);
                    ordered.push(table_id);
                }
                None => {
                    // Reference cycle: every foreign key among the remaining
                    // tables moves to the second wave, creations keep their
                    // original order.
                    let remaining: Vec<TableId> = deps.keys().filter(|id| !emitted.contains(*id)).copied().collect();
                    for &table_id in &remaining {
                        for fk in self.to.walk(table_id).foreign_keys() {
                            let referenced = fk.referenced_table().id;
                            if !fk.is_self_referencing()
                                && added_set.contains(&referenced)
                                && !emitted.contains(&referenced)
                            {
                                deferred.push(fk.id);
                            }
                        }
                    }
                    for table_id in remaining {
                        emitted.insert(table_id);
                        ordered.push(table_id);
                    }
                }
            }
        }

        (ordered, deferred)
    }

    /// Drops dependents before dependencies: a table referencing another is
    /// dropped first. Cycles fall back to the original order.
    fn order_dropped_tables(&self, dropped: &[TableId]) -> Vec<TableId> {
        let dropped_set: HashSet<TableId> = dropped.iter().copied().collect();
        let mut ordered = Vec::with_capacity(dropped.len());
        let mut emitted: HashSet<TableId> = HashSet::new();

        while ordered.len() < dropped.len() {
            let next = dropped.iter().copied().find(|id| {
                if emitted.contains(id) {
                    return false;
                }
                // All dropped tables referencing this one must go first.
                self.from
                    .walk(*id)
                    .referencing_foreign_keys()
                    .all(|fk| !dropped_set.contains(&fk.table().id) || emitted.contains(&fk.table().id))
            });

            match next {
                Some(id) => {
                    emitted.insert(id);
                    ordered.push(id);
                }
                None => {
                    let remaining: Vec<_> = dropped.iter().copied().filter(|id| !emitted.contains(id)).collect();
                    for id in remaining {
                        emitted.insert(id);
                        ordered.push(id);
                    }
                }
            }
        }

        ordered
    }

    fn diff_table(&self, pair: Pair<TableId>, changes: &mut Vec<Change>, deferred_fks: &mut Vec<ForeignKeyId>) {
        let from_table = self.from.walk(pair.from);
        let to_table = self.to.walk(pair.to);

        // Columns.
        let mut column_pairs: Vec<Pair<ColumnId>> = Vec::new();

        for to_col in to_table.columns() {
            let matched = from_table
                .columns()
                .find(|c| self.flavour.identifiers_match(c.name(), to_col.name()));
            if let Some(from_col) = matched {
                column_pairs.push(Pair::new(from_col.id, to_col.id));
                continue;
            }

            let rename = self
                .options
                .column_renames
                .iter()
                .find(|hint| {
                    self.flavour.identifiers_match(&hint.table, to_table.name()) && hint.to == to_col.name()
                })
                .and_then(|hint| {
                    from_table
                        .columns()
                        .find(|c| self.flavour.identifiers_match(c.name(), &hint.from))
                });
            match rename {
                Some(from_col) => {
                    let col_pair = Pair::new(from_col.id, to_col.id);
                    changes.push(Change::RenameColumn(col_pair));
                    column_pairs.push(col_pair);
                }
                None => changes.push(Change::AddColumn(to_col.id)),
            }
        }

        for col_pair in &column_pairs {
            let column_changes = self.column_changes(self.from.walk(col_pair.from), self.to.walk(col_pair.to));
            if !column_changes.is_empty() {
                changes.push(Change::ModifyColumn {
                    column: *col_pair,
                    changes: column_changes,
                });
            }
        }

        for from_col in from_table.columns() {
            if !column_pairs.iter().any(|pair| pair.from == from_col.id) {
                changes.push(Change::DropColumn(from_col.id));
            }
        }

        // Checks: matched by name when both sides have one, otherwise by
        // whitespace-normalized expression.
        let mut matched_from_checks = HashSet::new();
        for to_check in to_table.checks() {
            let matched = from_table.checks().find(|from_check| {
                if matched_from_checks.contains(&from_check.id) {
                    return false;
                }
                match (from_check.name(), to_check.name()) {
                    (Some(a), Some(b)) => self.flavour.identifiers_match(a, b),
                    _ => exprs_match(from_check.expr(), to_check.expr()),
                }
            });
            match matched {
                Some(from_check) => {
                    matched_from_checks.insert(from_check.id);
                    if check_changed(from_check, to_check) {
                        changes.push(Change::ModifyCheck(Pair::new(from_check.id, to_check.id)));
                    }
                }
                None => changes.push(Change::AddCheck(to_check.id)),
            }
        }
        for from_check in from_table.checks() {
            if !matched_from_checks.contains(&from_check.id) {
                changes.push(Change::DropCheck(from_check.id));
            }
        }

        // Indexes: matched by name, then structurally for system-generated
        // names.
        let mut index_pairs: Vec<Pair<IndexId>> = Vec::new();
        let mut matched_from: HashSet<IndexId> = HashSet::new();
        let mut matched_to: HashSet<IndexId> = HashSet::new();

        for to_index in to_table.indexes() {
            let matched = from_table
                .indexes()
                .find(|i| self.flavour.identifiers_match(i.name(), to_index.name()));
            if let Some(from_index) = matched {
                index_pairs.push(Pair::new(from_index.id, to_index.id));
                matched_from.insert(from_index.id);
                matched_to.insert(to_index.id);
            }
        }
        for from_index in from_table.indexes() {
            if matched_from.contains(&from_index.id) || !self.flavour.is_system_index_name(from_index.name()) {
                continue;
            }
            let structural = to_table
                .indexes()
                .find(|i| !matched_to.contains(&i.id) && self.indexes_structurally_equal(from_index, *i));
            if let Some(to_index) = structural {
                index_pairs.push(Pair::new(from_index.id, to_index.id));
                matched_from.insert(from_index.id);
                matched_to.insert(to_index.id);
            }
        }

        for to_index in to_table.indexes() {
            if !matched_to.contains(&to_index.id) {
                changes.push(Change::AddIndex(to_index.id));
            }
        }
        for pair in &index_pairs {
            if self.index_changed(self.from.walk(pair.from), self.to.walk(pair.to)) {
                changes.push(Change::ModifyIndex(*pair));
            }
        }
        for from_index in from_table.indexes() {
            if !matched_from.contains(&from_index.id) {
                changes.push(Change::DropIndex(from_index.id));
            }
        }

        // Foreign keys: matched by constraint symbol, falling back to the
        // constrained column tuple for unnamed constraints. Additions go to
        // the deferred wave so they always follow every table creation.
        let mut matched_from_fks = HashSet::new();
        for to_fk in to_table.foreign_keys() {
            let matched = from_table.foreign_keys().find(|from_fk| {
                if matched_from_fks.contains(&from_fk.id) {
                    return false;
                }
                match (from_fk.constraint_name(), to_fk.constraint_name()) {
                    (Some(a), Some(b)) => self.flavour.identifiers_match(a, b),
                    _ => self.column_tuples_match(*from_fk, to_fk),
                }
            });
            match matched {
                Some(from_fk) => {
                    matched_from_fks.insert(from_fk.id);
                    if self.foreign_key_changed(from_fk, to_fk) {
                        changes.push(Change::ModifyForeignKey(Pair::new(from_fk.id, to_fk.id)));
                    }
                }
                None => deferred_fks.push(to_fk.id),
            }
        }
        for from_fk in from_table.foreign_keys() {
            if !matched_from_fks.contains(&from_fk.id) {
                changes.push(Change::DropForeignKey(from_fk.id));
            }
        }

        // Table-level attributes and the primary key.
        let mut table_changes = self.flavour.table_attrs_changed(from_table, to_table);
        if self.primary_key_changed(from_table, to_table) {
            table_changes |= TableChange::PrimaryKey;
        }
        if !table_changes.is_empty() {
            changes.push(Change::ModifyTable {
                table: pair,
                changes: table_changes,
            });
        }
    }

    fn column_changes(&self, previous: ColumnWalker<'_>, next: ColumnWalker<'_>) -> BitFlags<ColumnChange> {
        let mut changes = BitFlags::empty();

        if !self.flavour.column_types_match(previous, next) {
            changes |= ColumnChange::Type;
        }
        if previous.tpe().is_nullable != next.tpe().is_nullable {
            changes |= ColumnChange::Nullability;
        }
        if !self.flavour.defaults_match(previous.default(), next.default()) {
            changes |= ColumnChange::Default;
        }
        if previous.is_auto_increment() != next.is_auto_increment() {
            changes |= ColumnChange::AutoIncrement;
        }
        if previous.charset() != next.charset() {
            changes |= ColumnChange::Charset;
        }
        if previous.collation() != next.collation() {
            changes |= ColumnChange::Collation;
        }
        if previous.comment() != next.comment() {
            changes |= ColumnChange::Comment;
        }
        if previous.generated() != next.generated() {
            changes |= ColumnChange::Generated;
        }

        changes
    }

    fn indexes_structurally_equal(&self, a: IndexWalker<'_>, b: IndexWalker<'_>) -> bool {
        a.is_unique() == b.is_unique()
            && predicates_match(a.predicate(), b.predicate())
            && self.index_parts_match(a, b)
    }

    fn index_changed(&self, previous: IndexWalker<'_>, next: IndexWalker<'_>) -> bool {
        previous.is_unique() != next.is_unique()
            || !predicates_match(previous.predicate(), next.predicate())
            || !self.index_parts_match(previous, next)
            || self.flavour.index_attrs_changed(previous, next)
    }

    fn index_parts_match(&self, a: IndexWalker<'_>, b: IndexWalker<'_>) -> bool {
        let a_parts: Vec<_> = a.parts().collect();
        let b_parts: Vec<_> = b.parts().collect();
        if a_parts.len() != b_parts.len() {
            return false;
        }
        a_parts.iter().zip(&b_parts).all(|(pa, pb)| {
            if pa.sort() != pb.sort() {
                return false;
            }
            match (pa.value(), pb.value()) {
                (IndexPartValue::Column(_), IndexPartValue::Column(_)) => self
                    .flavour
                    .identifiers_match(pa.column().unwrap().name(), pb.column().unwrap().name()),
                (IndexPartValue::Expr(ea), IndexPartValue::Expr(eb)) => exprs_match(ea, eb),
                _ => false,
            }
        })
    }

    fn column_tuples_match(&self, a: ForeignKeyWalker<'_>, b: ForeignKeyWalker<'_>) -> bool {
        let a_cols = a.constrained_column_names();
        let b_cols = b.constrained_column_names();
        a_cols.len() == b_cols.len()
            && a_cols
                .iter()
                .zip(&b_cols)
                .all(|(ca, cb)| self.flavour.identifiers_match(ca, cb))
    }

    fn foreign_key_changed(&self, previous: ForeignKeyWalker<'_>, next: ForeignKeyWalker<'_>) -> bool {
        if !self
            .flavour
            .identifiers_match(previous.referenced_table().name(), next.referenced_table().name())
        {
            return true;
        }
        if !self.column_tuples_match(previous, next) {
            return true;
        }

        let previous_refs: Vec<_> = previous.referenced_columns().map(|c| c.name().to_owned()).collect();
        let next_refs: Vec<_> = next.referenced_columns().map(|c| c.name().to_owned()).collect();
        if previous_refs.len() != next_refs.len()
            || !previous_refs
                .iter()
                .zip(&next_refs)
                .all(|(a, b)| self.flavour.identifiers_match(a, b))
        {
            return true;
        }

        previous.on_delete() != next.on_delete()
            || previous.on_update() != next.on_update()
            || self.flavour.foreign_key_changed(previous, next)
    }

    fn primary_key_changed(&self, previous: TableWalker<'_>, next: TableWalker<'_>) -> bool {
        let previous_cols: Vec<_> = previous.primary_key_columns().map(|c| c.name().to_owned()).collect();
        let next_cols: Vec<_> = next.primary_key_columns().map(|c| c.name().to_owned()).collect();
        previous_cols.len() != next_cols.len()
            || !previous_cols
                .iter()
                .zip(&next_cols)
                .all(|(a, b)| self.flavour.identifiers_match(a, b))
    }
}

fn check_changed(previous: CheckWalker<'_>, next: CheckWalker<'_>) -> bool {
    !exprs_match(previous.expr(), next.expr()) || previous.is_enforced() != next.is_enforced()
}

/// Whitespace-insensitive expression comparison; anything smarter is a
/// flavour concern.
fn exprs_match(a: &str, b: &str) -> bool {
    let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    normalize(a) == normalize(b)
}

fn predicates_match(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => exprs_match(a, b),
        _ => false,
    }
}

fn validate_realm(realm: &Realm) -> ConnectorResult<()> {
    use schema_connector::ConnectorError;

    for schema in realm.walk_schemas() {
        let mut names = HashSet::new();
        for table in schema.tables() {
            if !names.insert(table.name()) {
                return Err(ConnectorError::diff(format!(
                    "duplicate table {}.{}",
                    schema.name(),
                    table.name()
                )));
            }
        }
    }

    for table in realm.walk_tables() {
        let mut column_names = HashSet::new();
        for column in table.columns() {
            if !column_names.insert(column.name()) {
                return Err(ConnectorError::diff(format!(
                    "duplicate column {} in table {}",
                    column.name(),
                    table.name()
                )));
            }
        }

        let mut index_names = HashSet::new();
        for index in table.indexes() {
            if !index_names.insert(index.name()) {
                return Err(ConnectorError::diff(format!(
                    "duplicate index {} on table {}",
                    index.name(),
                    table.name()
                )));
            }
        }

        for fk in table.foreign_keys() {
            let constrained = fk.constrained_columns().count();
            let referenced = fk.referenced_columns().count();
            if constrained == 0 || constrained != referenced {
                return Err(ConnectorError::diff(format!(
                    "foreign key on table {} has mismatched column lists",
                    table.name()
                )));
            }
            if fk.constrained_columns().any(|c| c.table().id != table.id) {
                return Err(ConnectorError::diff(format!(
                    "foreign key on table {} constrains a column of another table",
                    table.name()
                )));
            }
            if fk.referenced_columns().any(|c| c.table().id != fk.referenced_table().id) {
                return Err(ConnectorError::diff(format!(
                    "foreign key on table {} references unresolved columns",
                    table.name()
                )));
            }
        }
    }

    Ok(())
}
