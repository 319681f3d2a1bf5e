//! Destructive and data-dependent change analyzers.
//!
//! These run over the per-statement change sets the lint loader computes on
//! the dev database. Codes are stable: `DS1xx` for destructive changes,
//! `MF1xx` for changes whose success depends on the data already in the
//! target database.

use schema_connector::{Analyzer, Change, CheckFile, ColumnChange, Diagnostic, Migration};
use sql_realm::TableId;

pub(crate) const CODE_DROP_SCHEMA: &str = "DS101";
pub(crate) const CODE_DROP_TABLE: &str = "DS102";
pub(crate) const CODE_DROP_COLUMN: &str = "DS103";

pub(crate) const CODE_ADD_UNIQUE_INDEX: &str = "MF101";
pub(crate) const CODE_MODIFY_UNIQUE_INDEX: &str = "MF102";
pub(crate) const CODE_ADD_NOT_NULL_COLUMN: &str = "MF103";
pub(crate) const CODE_MODIFY_NULLABILITY: &str = "MF104";

#[derive(Debug)]
pub(crate) struct DestructiveChangesAnalyzer;

impl Analyzer for DestructiveChangesAnalyzer {
    fn name(&self) -> &'static str {
        "destructive"
    }

    fn analyze(&self, file: &CheckFile, diagnostics: &mut Vec<Diagnostic>) {
        for stmt in &file.statements {
            for change in &stmt.changes.changes {
                match change {
                    Change::DropSchema(id) => diagnostics.push(Diagnostic {
                        pos: stmt.pos,
                        code: CODE_DROP_SCHEMA.into(),
                        text: format!("dropping schema {:?}", stmt.changes.from.walk(*id).name()),
                    }),
                    Change::DropTable(id) => diagnostics.push(Diagnostic {
                        pos: stmt.pos,
                        code: CODE_DROP_TABLE.into(),
                        text: format!("dropping table {:?}", stmt.changes.from.walk(*id).name()),
                    }),
                    Change::DropColumn(id) => {
                        let column = stmt.changes.from.walk(*id);
                        diagnostics.push(Diagnostic {
                            pos: stmt.pos,
                            code: CODE_DROP_COLUMN.into(),
                            text: format!(
                                "dropping column {:?} from table {:?}",
                                column.name(),
                                column.table().name()
                            ),
                        });
                    }
                    _ => (),
                }
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct DataDependentChangesAnalyzer;

impl Analyzer for DataDependentChangesAnalyzer {
    fn name(&self) -> &'static str {
        "data-dependent"
    }

    fn analyze(&self, file: &CheckFile, diagnostics: &mut Vec<Diagnostic>) {
        let before = diagnostics.len();

        for stmt in &file.statements {
            for change in &stmt.changes.changes {
                match change {
                    Change::AddColumn(id) => {
                        let column = stmt.changes.to.walk(*id);
                        if column.is_required() && column.default().is_none() && column.generated().is_none() {
                            diagnostics.push(Diagnostic {
                                pos: stmt.pos,
                                code: CODE_ADD_NOT_NULL_COLUMN.into(),
                                text: format!(
                                    "adding a non-nullable column {:?} to table {:?} without a default value will fail if the table is not empty",
                                    column.name(),
                                    column.table().name()
                                ),
                            });
                        }
                    }
                    Change::ModifyColumn { column, changes } => {
                        let next = stmt.changes.to.walk(column.to);
                        if changes.contains(ColumnChange::Nullability) && next.is_required() {
                            diagnostics.push(Diagnostic {
                                pos: stmt.pos,
                                code: CODE_MODIFY_NULLABILITY.into(),
                                text: format!(
                                    "modifying nullable column {:?} of table {:?} to non-nullable might fail if it holds NULL values",
                                    next.name(),
                                    next.table().name()
                                ),
                            });
                        }
                    }
                    Change::AddIndex(id) => {
                        let index = stmt.changes.to.walk(*id);
                        if index.is_unique() && table_existed(&stmt.changes, index.table().id) {
                            diagnostics.push(Diagnostic {
                                pos: stmt.pos,
                                code: CODE_ADD_UNIQUE_INDEX.into(),
                                text: format!(
                                    "adding a unique index {:?} on table {:?} might fail if duplicate entries exist",
                                    index.name(),
                                    index.table().name()
                                ),
                            });
                        }
                    }
                    Change::ModifyIndex(pair) => {
                        let previous = stmt.changes.from.walk(pair.from);
                        let next = stmt.changes.to.walk(pair.to);
                        if !previous.is_unique() && next.is_unique() {
                            diagnostics.push(Diagnostic {
                                pos: stmt.pos,
                                code: CODE_MODIFY_UNIQUE_INDEX.into(),
                                text: format!(
                                    "modifying index {:?} on table {:?} to be unique might fail if duplicate entries exist",
                                    next.name(),
                                    next.table().name()
                                ),
                            });
                        }
                    }
                    _ => (),
                }
            }
        }

        // Statement-level diffs miss risky column additions that arrive
        // through a table redefinition (create-copy-drop-rename), so the
        // aggregate effect of the file is checked as well.
        let file_pos = file.statements.first().map(|s| s.pos).unwrap_or(0);
        let mut sum_diagnostics = Vec::new();
        for change in &file.sum.changes {
            match change {
                Change::AddColumn(id) => {
                    let column = file.sum.to.walk(*id);
                    if column.is_required() && column.default().is_none() && column.generated().is_none() {
                        sum_diagnostics.push(Diagnostic {
                            pos: file_pos,
                            code: CODE_ADD_NOT_NULL_COLUMN.into(),
                            text: format!(
                                "adding a non-nullable column {:?} to table {:?} without a default value will fail if the table is not empty",
                                column.name(),
                                column.table().name()
                            ),
                        });
                    }
                }
                Change::ModifyColumn { column, changes } => {
                    let next = file.sum.to.walk(column.to);
                    if changes.contains(ColumnChange::Nullability) && next.is_required() {
                        sum_diagnostics.push(Diagnostic {
                            pos: file_pos,
                            code: CODE_MODIFY_NULLABILITY.into(),
                            text: format!(
                                "modifying nullable column {:?} of table {:?} to non-nullable might fail if it holds NULL values",
                                next.name(),
                                next.table().name()
                            ),
                        });
                    }
                }
                _ => (),
            }
        }
        for diagnostic in sum_diagnostics {
            let duplicate = diagnostics[before..]
                .iter()
                .any(|d| d.code == diagnostic.code && d.text == diagnostic.text);
            if !duplicate {
                diagnostics.push(diagnostic);
            }
        }
    }
}

/// True when the table was already present before the statement ran.
fn table_existed(changes: &Migration, to_table: TableId) -> bool {
    let table = changes.to.walk(to_table);
    changes
        .from
        .walk_tables()
        .any(|t| t.name().eq_ignore_ascii_case(table.name()) && t.schema().name().eq_ignore_ascii_case(table.schema().name()))
}
