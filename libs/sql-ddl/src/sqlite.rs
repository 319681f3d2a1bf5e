//! SQLite DDL statements.
//!
//! Identifiers are quoted with backticks, which SQLite accepts everywhere and
//! which keeps generated scripts readable alongside hand-written ones.

use std::fmt::{self, Display, Write as _};

/// A backtick-quoted identifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ident<'a>(pub &'a str);

impl Display for Ident<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('`')?;
        // Escape embedded backticks by doubling them.
        for c in self.0.chars() {
            if c == '`' {
                f.write_char('`')?;
            }
            f.write_char(c)?;
        }
        f.write_char('`')
    }
}

#[derive(Debug, Default)]
pub struct CreateTable {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    /// Rendered as a `PRIMARY KEY (...)` table constraint. Left empty when
    /// the key is carried inline by a rowid-alias column.
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyClause>,
    pub checks: Vec<CheckClause>,
}

#[derive(Debug, Default)]
pub struct ColumnDef {
    pub name: String,
    pub r#type: String,
    pub not_null: bool,
    pub default: Option<String>,
    /// Renders `PRIMARY KEY AUTOINCREMENT` inline. Only valid for a single
    /// `integer` primary-key column.
    pub auto_increment: bool,
    pub generated: Option<GeneratedClause>,
}

#[derive(Debug)]
pub struct GeneratedClause {
    pub expr: String,
    pub stored: bool,
}

#[derive(Debug)]
pub struct ForeignKeyClause {
    pub constraint_name: Option<String>,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: Option<&'static str>,
    pub on_update: Option<&'static str>,
}

#[derive(Debug)]
pub struct CheckClause {
    pub constraint_name: Option<String>,
    pub expr: String,
}

impl Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", Ident(&self.name), self.r#type)?;

        if self.not_null {
            f.write_str(" NOT NULL")?;
        } else {
            f.write_str(" NULL")?;
        }

        if self.auto_increment {
            f.write_str(" PRIMARY KEY AUTOINCREMENT")?;
        }

        if let Some(default) = &self.default {
            write!(f, " DEFAULT {default}")?;
        }

        if let Some(generated) = &self.generated {
            let kind = if generated.stored { "STORED" } else { "VIRTUAL" };
            write!(f, " AS ({}) {kind}", generated.expr)?;
        }

        Ok(())
    }
}

impl Display for ForeignKeyClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.constraint_name {
            write!(f, "CONSTRAINT {} ", Ident(name))?;
        }

        f.write_str("FOREIGN KEY (")?;
        write_ident_list(f, &self.columns)?;
        write!(f, ") REFERENCES {} (", Ident(&self.referenced_table))?;
        write_ident_list(f, &self.referenced_columns)?;
        f.write_str(")")?;

        if let Some(action) = self.on_update {
            write!(f, " ON UPDATE {action}")?;
        }
        if let Some(action) = self.on_delete {
            write!(f, " ON DELETE {action}")?;
        }

        Ok(())
    }
}

impl Display for CheckClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.constraint_name {
            write!(f, "CONSTRAINT {} ", Ident(name))?;
        }
        write!(f, "CHECK ({})", self.expr)
    }
}

impl Display for CreateTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CREATE TABLE {} (", Ident(&self.table_name))?;

        let mut clauses = self.columns.iter().map(|c| c.to_string()).collect::<Vec<_>>();

        if !self.primary_key.is_empty() {
            let mut clause = String::from("PRIMARY KEY (");
            push_ident_list(&mut clause, &self.primary_key);
            clause.push(')');
            clauses.push(clause);
        }

        clauses.extend(self.foreign_keys.iter().map(|fk| fk.to_string()));
        clauses.extend(self.checks.iter().map(|check| check.to_string()));

        for (i, clause) in clauses.iter().enumerate() {
            let comma = if i + 1 < clauses.len() { "," } else { "" };
            writeln!(f, "  {clause}{comma}")?;
        }

        f.write_str(")")
    }
}

#[derive(Debug)]
pub struct CreateIndex {
    pub unique: bool,
    pub index_name: String,
    pub table_name: String,
    /// Each part is pre-rendered: a quoted column or a raw expression,
    /// optionally followed by ` DESC`.
    pub parts: Vec<String>,
    pub predicate: Option<String>,
}

impl Display for CreateIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unique = if self.unique { "UNIQUE " } else { "" };
        write!(
            f,
            "CREATE {unique}INDEX {} ON {} ({})",
            Ident(&self.index_name),
            Ident(&self.table_name),
            self.parts.join(", "),
        )?;

        if let Some(predicate) = &self.predicate {
            write!(f, " WHERE {predicate}")?;
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct DropTable {
    pub table_name: String,
}

impl Display for DropTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DROP TABLE {}", Ident(&self.table_name))
    }
}

#[derive(Debug)]
pub struct DropIndex {
    pub index_name: String,
}

impl Display for DropIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DROP INDEX {}", Ident(&self.index_name))
    }
}

#[derive(Debug)]
pub enum AlterTable {
    AddColumn { table_name: String, column: ColumnDef },
    DropColumn { table_name: String, column_name: String },
    RenameColumn { table_name: String, from: String, to: String },
    RenameTo { table_name: String, to: String },
}

impl Display for AlterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlterTable::AddColumn { table_name, column } => {
                write!(f, "ALTER TABLE {} ADD COLUMN {column}", Ident(table_name))
            }
            AlterTable::DropColumn { table_name, column_name } => {
                write!(f, "ALTER TABLE {} DROP COLUMN {}", Ident(table_name), Ident(column_name))
            }
            AlterTable::RenameColumn { table_name, from, to } => write!(
                f,
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                Ident(table_name),
                Ident(from),
                Ident(to)
            ),
            AlterTable::RenameTo { table_name, to } => {
                write!(f, "ALTER TABLE {} RENAME TO {}", Ident(table_name), Ident(to))
            }
        }
    }
}

fn write_ident_list(f: &mut fmt::Formatter<'_>, idents: &[String]) -> fmt::Result {
    for (i, ident) in idents.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", Ident(ident))?;
    }
    Ok(())
}

fn push_ident_list(out: &mut String, idents: &[String]) {
    for (i, ident) in idents.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{}", Ident(ident));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn create_table_renders_constraints_last() {
        let create = CreateTable {
            table_name: "posts".into(),
            columns: vec![
                ColumnDef {
                    name: "id".into(),
                    r#type: "integer".into(),
                    not_null: true,
                    auto_increment: true,
                    ..Default::default()
                },
                ColumnDef {
                    name: "author_id".into(),
                    r#type: "integer".into(),
                    not_null: true,
                    ..Default::default()
                },
            ],
            primary_key: vec![],
            foreign_keys: vec![ForeignKeyClause {
                constraint_name: Some("posts_author_fk".into()),
                columns: vec!["author_id".into()],
                referenced_table: "users".into(),
                referenced_columns: vec!["id".into()],
                on_delete: Some("CASCADE"),
                on_update: None,
            }],
            checks: vec![CheckClause {
                constraint_name: None,
                expr: "id > 0".into(),
            }],
        };

        let expected = indoc! {r#"
            CREATE TABLE `posts` (
              `id` integer NOT NULL PRIMARY KEY AUTOINCREMENT,
              `author_id` integer NOT NULL,
              CONSTRAINT `posts_author_fk` FOREIGN KEY (`author_id`) REFERENCES `users` (`id`) ON DELETE CASCADE,
              CHECK (id > 0)
            )"#};

        assert_eq!(create.to_string(), expected);
    }

    #[test]
    fn create_index_with_predicate() {
        let create = CreateIndex {
            unique: true,
            index_name: "users_email_key".into(),
            table_name: "users".into(),
            parts: vec!["`email`".into(), "`tenant` DESC".into()],
            predicate: Some("`deleted_at` IS NULL".into()),
        };

        assert_eq!(
            create.to_string(),
            "CREATE UNIQUE INDEX `users_email_key` ON `users` (`email`, `tenant` DESC) WHERE `deleted_at` IS NULL",
        );
    }
}
