//! The HCL schema definition language.
//!
//! A thin, declarative way to describe a desired realm:
//!
//! ```hcl
//! schema "main" {}
//!
//! table "users" {
//!   schema = schema.main
//!   column "id" {
//!     type = int
//!   }
//!   column "name" {
//!     type = varchar(100)
//!     null = true
//!   }
//!   primary_key {
//!     columns = [column.id]
//!   }
//! }
//! ```
//!
//! Parsing yields a realm; resolution errors carry `file:line` positions.
//! Realms parsed from HCL are raw: defaults, type aliases and expressions
//! are later normalized by round-tripping through a dev database.

mod render;

pub use render::render_realm;

use pest::iterators::Pair;
use pest::Parser as _;
use schema_connector::{ConnectorError, ConnectorResult};
use sql_realm::{
    Check, Column, ColumnId, ColumnType, ColumnTypeFamily, DefaultValue, ForeignKey, ForeignKeyColumn, Index,
    IndexPart, IndexPartValue, PrimaryKey, Realm, ReferentialAction, SortOrder, TableId, TimeKind,
};
use std::collections::HashMap;

#[derive(pest_derive::Parser)]
#[grammar = "grammar.pest"]
struct HclParser;

#[derive(Debug, Clone)]
struct Block {
    file: String,
    line: usize,
    kind: String,
    label: Option<String>,
    attrs: Vec<(String, Expr)>,
    blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Ident(String),
    Call(String, Vec<Expr>),
    Ref(Vec<String>),
    Array(Vec<Expr>),
}

impl Block {
    fn attr(&self, name: &str) -> Option<&Expr> {
        self.attrs.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }

    fn err(&self, message: impl std::fmt::Display) -> ConnectorError {
        ConnectorError::configuration(format!("{}:{}: {message}", self.file, self.line))
    }
}

/// Parses and resolves a set of HCL files into one realm.
pub fn parse_realm(files: &[(&str, &str)]) -> ConnectorResult<Realm> {
    let mut blocks = Vec::new();
    for (file_name, contents) in files {
        blocks.extend(parse_file(file_name, contents)?);
    }
    eval(blocks)
}

fn parse_file(file_name: &str, contents: &str) -> ConnectorResult<Vec<Block>> {
    let mut pairs = HclParser::parse(Rule::file, contents)
        .map_err(|err| ConnectorError::configuration(format!("{file_name}: {err}")))?;

    let file = pairs.next().expect("grammar guarantees a file node");
    let mut blocks = Vec::new();
    for pair in file.into_inner() {
        if pair.as_rule() == Rule::block {
            blocks.push(parse_block(file_name, pair));
        }
    }
    Ok(blocks)
}

fn parse_block(file_name: &str, pair: Pair<'_, Rule>) -> Block {
    let line = pair.as_span().start_pos().line_col().0;
    let mut inner = pair.into_inner();
    let kind = inner.next().expect("block starts with its type").as_str().to_owned();

    let mut block = Block {
        file: file_name.to_owned(),
        line,
        kind,
        label: None,
        attrs: Vec::new(),
        blocks: Vec::new(),
    };

    for item in inner {
        match item.as_rule() {
            Rule::string => block.label = Some(unquote(item.as_str())),
            Rule::block => block.blocks.push(parse_block(file_name, item)),
            Rule::attribute => {
                let mut parts = item.into_inner();
                let name = parts.next().expect("attribute name").as_str().to_owned();
                let value = parse_expr(parts.next().expect("attribute value"));
                block.attrs.push((name, value));
            }
            _ => (),
        }
    }

    block
}

fn parse_expr(pair: Pair<'_, Rule>) -> Expr {
    let inner = pair.into_inner().next().expect("expr wraps one alternative");
    match inner.as_rule() {
        Rule::string => Expr::Str(unquote(inner.as_str())),
        Rule::boolean => Expr::Bool(inner.as_str() == "true"),
        Rule::number => {
            let text = inner.as_str();
            match text.parse::<i64>() {
                Ok(value) => Expr::Int(value),
                Err(_) => Expr::Float(text.parse().unwrap_or(0.0)),
            }
        }
        Rule::call => {
            let mut parts = inner.into_inner();
            let name = parts.next().expect("call name").as_str().to_owned();
            Expr::Call(name, parts.map(parse_expr).collect())
        }
        Rule::reference => Expr::Ref(inner.into_inner().map(|p| p.as_str().to_owned()).collect()),
        Rule::array => Expr::Array(inner.into_inner().map(parse_expr).collect()),
        Rule::ident => Expr::Ident(inner.as_str().to_owned()),
        other => unreachable!("unexpected expression rule {other:?}"),
    }
}

fn unquote(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

struct TableContext {
    block: Block,
    table_id: TableId,
    columns: HashMap<String, ColumnId>,
}

fn eval(blocks: Vec<Block>) -> ConnectorResult<Realm> {
    let mut realm = Realm::new();
    let mut schema_ids = HashMap::new();

    for block in blocks.iter().filter(|b| b.kind == "schema") {
        let name = block
            .label
            .clone()
            .ok_or_else(|| block.err("schema blocks require a name label"))?;
        if schema_ids.contains_key(&name) {
            return Err(block.err(format!("duplicate schema {name:?}")));
        }
        let id = realm.push_schema(&name);
        schema_ids.insert(name, id);
    }
    // A file set with no schema block describes the default schema.
    if schema_ids.is_empty() {
        schema_ids.insert("main".to_owned(), realm.push_schema("main"));
    }

    let mut tables: Vec<TableContext> = Vec::new();

    for block in blocks.into_iter().filter(|b| b.kind == "table") {
        let name = block
            .label
            .clone()
            .ok_or_else(|| block.err("table blocks require a name label"))?;

        let schema_id = match block.attr("schema") {
            Some(Expr::Ref(path)) if path.len() == 2 && path[0] == "schema" => *schema_ids
                .get(&path[1])
                .ok_or_else(|| block.err(format!("unknown schema {:?}", path[1])))?,
            Some(_) => return Err(block.err("the schema attribute must reference a schema block")),
            None if schema_ids.len() == 1 => *schema_ids.values().next().expect("exactly one schema"),
            None => return Err(block.err(format!("table {name:?} must name its schema"))),
        };

        let table_id = realm.push_table(schema_id, &name);
        let mut columns = HashMap::new();

        for column_block in block.blocks.iter().filter(|b| b.kind == "column") {
            let column_name = column_block
                .label
                .clone()
                .ok_or_else(|| column_block.err("column blocks require a name label"))?;
            let type_expr = column_block
                .attr("type")
                .ok_or_else(|| column_block.err(format!("column {column_name:?} is missing its type")))?;
            let (family, raw) =
                eval_type(type_expr).ok_or_else(|| column_block.err(format!("invalid type for column {column_name:?}")))?;

            let is_nullable = match column_block.attr("null") {
                Some(Expr::Bool(value)) => *value,
                Some(_) => return Err(column_block.err("null must be a boolean")),
                None => false,
            };
            let auto_increment = matches!(column_block.attr("auto_increment"), Some(Expr::Bool(true)));
            let default = column_block.attr("default").map(eval_default).transpose().map_err(|message| column_block.err(message))?;

            let column_id = realm.push_column(Column {
                table_id,
                name: column_name.clone(),
                tpe: ColumnType {
                    family,
                    raw,
                    is_nullable,
                },
                default,
                auto_increment,
                comment: match column_block.attr("comment") {
                    Some(Expr::Str(comment)) => Some(comment.clone()),
                    _ => None,
                },
                charset: None,
                collation: None,
                generated: None,
            });
            if columns.insert(column_name.clone(), column_id).is_some() {
                return Err(column_block.err(format!("duplicate column {column_name:?}")));
            }
        }

        for pk_block in block.blocks.iter().filter(|b| b.kind == "primary_key") {
            let column_ids = column_ref_list(pk_block, "columns", &columns)?;
            if column_ids.is_empty() {
                return Err(pk_block.err("primary_key requires at least one column"));
            }
            realm.set_primary_key(
                table_id,
                PrimaryKey {
                    constraint_name: None,
                    columns: column_ids,
                },
            );
        }

        for index_block in block.blocks.iter().filter(|b| b.kind == "index") {
            let index_name = index_block
                .label
                .clone()
                .ok_or_else(|| index_block.err("index blocks require a name label"))?;
            let unique = matches!(index_block.attr("unique"), Some(Expr::Bool(true)));
            let predicate = match index_block.attr("where") {
                Some(Expr::Str(predicate)) => Some(predicate.clone()),
                _ => None,
            };

            let index_id = realm.push_index(Index {
                table_id,
                name: index_name,
                unique,
                predicate,
                comment: None,
            });
            for column_id in column_ref_list(index_block, "columns", &columns)? {
                realm.push_index_part(IndexPart {
                    index_id,
                    value: IndexPartValue::Column(column_id),
                    sort: SortOrder::Asc,
                });
            }
        }

        for check_block in block.blocks.iter().filter(|b| b.kind == "check") {
            let expr = match check_block.attr("expr") {
                Some(Expr::Str(expr)) => expr.clone(),
                _ => return Err(check_block.err("check blocks require an expr attribute")),
            };
            realm.push_check(Check {
                table_id,
                name: check_block.label.clone(),
                expr,
                enforced: true,
            });
        }

        tables.push(TableContext {
            block,
            table_id,
            columns,
        });
    }

    // Second pass: foreign keys, now that every table exists.
    for context in &tables {
        for fk_block in context.block.blocks.iter().filter(|b| b.kind == "foreign_key") {
            let symbol = fk_block
                .label
                .clone()
                .ok_or_else(|| fk_block.err("foreign_key blocks require a symbol label"))?;

            let constrained = column_ref_list(fk_block, "columns", &context.columns)?;

            let refs = match fk_block.attr("ref_columns") {
                Some(Expr::Array(items)) => items,
                _ => return Err(fk_block.err("foreign_key blocks require a ref_columns list")),
            };
            let mut referenced_table: Option<TableId> = None;
            let mut referenced_columns = Vec::with_capacity(refs.len());
            for item in refs {
                let Expr::Ref(path) = item else {
                    return Err(fk_block.err("ref_columns entries must look like table.<t>.column.<c>"));
                };
                let (table_name, column_name) = match path.as_slice() {
                    [t, table_name, c, column_name] if t == "table" && c == "column" => (table_name, column_name),
                    _ => return Err(fk_block.err("ref_columns entries must look like table.<t>.column.<c>")),
                };
                let target = tables
                    .iter()
                    .find(|t| realm.walk(t.table_id).name() == table_name.as_str())
                    .ok_or_else(|| fk_block.err(format!("unknown table {table_name:?} in ref_columns")))?;
                if let Some(existing) = referenced_table {
                    if existing != target.table_id {
                        return Err(fk_block.err("ref_columns must all reference one table"));
                    }
                }
                referenced_table = Some(target.table_id);
                referenced_columns.push(*target.columns.get(column_name).ok_or_else(|| {
                    fk_block.err(format!("unknown column {column_name:?} on table {table_name:?}"))
                })?);
            }

            let referenced_table =
                referenced_table.ok_or_else(|| fk_block.err("foreign_key requires at least one ref column"))?;
            if constrained.len() != referenced_columns.len() || constrained.is_empty() {
                return Err(fk_block.err("columns and ref_columns must have the same non-zero length"));
            }

            let fk_id = realm.push_foreign_key(ForeignKey {
                table_id: context.table_id,
                referenced_table_id: referenced_table,
                constraint_name: Some(symbol),
                on_delete: eval_action(fk_block, "on_delete")?,
                on_update: eval_action(fk_block, "on_update")?,
            });
            for (constrained_column_id, referenced_column_id) in constrained.into_iter().zip(referenced_columns) {
                realm.push_foreign_key_column(ForeignKeyColumn {
                    foreign_key_id: fk_id,
                    constrained_column_id,
                    referenced_column_id,
                });
            }
        }
    }

    Ok(realm)
}

fn column_ref_list(block: &Block, attr: &str, columns: &HashMap<String, ColumnId>) -> ConnectorResult<Vec<ColumnId>> {
    let Some(expr) = block.attr(attr) else { return Ok(Vec::new()) };
    let Expr::Array(items) = expr else {
        return Err(block.err(format!("{attr} must be a list of column references")));
    };

    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Expr::Ref(path) if path.len() == 2 && path[0] == "column" => {
                let id = columns
                    .get(&path[1])
                    .ok_or_else(|| block.err(format!("unknown column {:?}", path[1])))?;
                ids.push(*id);
            }
            _ => return Err(block.err(format!("{attr} entries must look like column.<name>"))),
        }
    }
    Ok(ids)
}

fn eval_type(expr: &Expr) -> Option<(ColumnTypeFamily, String)> {
    match expr {
        Expr::Ident(name) => {
            let family = match name.as_str() {
                "int" | "integer" | "bigint" | "smallint" | "tinyint" => ColumnTypeFamily::Integer {
                    unsigned: false,
                    size: None,
                },
                "text" => ColumnTypeFamily::String { size: None },
                "bool" | "boolean" => ColumnTypeFamily::Boolean,
                "float" | "real" | "double" => ColumnTypeFamily::Float { precision: None },
                "decimal" | "numeric" => ColumnTypeFamily::Decimal {
                    precision: None,
                    scale: None,
                },
                "blob" | "binary" => ColumnTypeFamily::Binary { size: None },
                "date" => ColumnTypeFamily::Time { kind: TimeKind::Date },
                "time" => ColumnTypeFamily::Time { kind: TimeKind::Time },
                "datetime" => ColumnTypeFamily::Time {
                    kind: TimeKind::DateTime,
                },
                "timestamp" => ColumnTypeFamily::Time {
                    kind: TimeKind::Timestamp,
                },
                "json" => ColumnTypeFamily::Json,
                _ => ColumnTypeFamily::Unsupported,
            };
            Some((family, name.clone()))
        }
        Expr::Str(raw) => Some((ColumnTypeFamily::Unsupported, raw.clone())),
        Expr::Call(name, args) => {
            let int_arg = |index: usize| match args.get(index) {
                Some(Expr::Int(value)) => Some(*value as u32),
                _ => None,
            };
            match name.as_str() {
                "varchar" | "char" => {
                    let size = int_arg(0)?;
                    Some((
                        ColumnTypeFamily::String { size: Some(size) },
                        format!("{name}({size})"),
                    ))
                }
                "decimal" | "numeric" => {
                    let precision = int_arg(0)?;
                    let scale = int_arg(1).unwrap_or(0);
                    Some((
                        ColumnTypeFamily::Decimal {
                            precision: Some(precision as u16),
                            scale: Some(scale as u16),
                        },
                        format!("{name}({precision},{scale})"),
                    ))
                }
                "binary" | "varbinary" => {
                    let size = int_arg(0)?;
                    Some((ColumnTypeFamily::Binary { size: Some(size) }, format!("{name}({size})")))
                }
                "enum" => {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        match arg {
                            Expr::Str(value) => values.push(value.clone()),
                            _ => return None,
                        }
                    }
                    Some((ColumnTypeFamily::Enum { values }, "text".to_owned()))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn eval_default(expr: &Expr) -> Result<DefaultValue, String> {
    match expr {
        Expr::Str(value) => Ok(DefaultValue::Literal(value.clone())),
        Expr::Int(value) => Ok(DefaultValue::Literal(value.to_string())),
        Expr::Float(value) => Ok(DefaultValue::Literal(value.to_string())),
        Expr::Bool(value) => Ok(DefaultValue::Literal(value.to_string())),
        Expr::Call(name, args) if name == "sql" => match args.as_slice() {
            [Expr::Str(sql)] => Ok(DefaultValue::Expr(sql.clone())),
            _ => Err("sql() takes exactly one string argument".to_owned()),
        },
        _ => Err("unsupported default value".to_owned()),
    }
}

fn eval_action(block: &Block, attr: &str) -> ConnectorResult<ReferentialAction> {
    let raw = match block.attr(attr) {
        None => return Ok(ReferentialAction::NoAction),
        Some(Expr::Ident(value)) => value.clone(),
        Some(Expr::Str(value)) => value.clone(),
        Some(_) => return Err(block.err(format!("{attr} must be a referential action"))),
    };

    match raw.replace(' ', "_").to_ascii_uppercase().as_str() {
        "NO_ACTION" => Ok(ReferentialAction::NoAction),
        "RESTRICT" => Ok(ReferentialAction::Restrict),
        "CASCADE" => Ok(ReferentialAction::Cascade),
        "SET_NULL" => Ok(ReferentialAction::SetNull),
        "SET_DEFAULT" => Ok(ReferentialAction::SetDefault),
        other => Err(block.err(format!("unknown referential action {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_a_users_table() {
        let hcl = indoc! {r#"
            schema "main" {}

            table "users" {
              schema = schema.main
              column "id" {
                type = int
              }
              column "name" {
                type = varchar(100)
                null = true
              }
              primary_key {
                columns = [column.id]
              }
              index "users_name_idx" {
                unique = true
                columns = [column.name]
              }
            }
        "#};

        let realm = parse_realm(&[("schema.hcl", hcl)]).unwrap();
        let users = realm.find_table("main", "users").unwrap();

        assert_eq!(users.columns().count(), 2);
        let name = users.column("name").unwrap();
        assert!(name.tpe().is_nullable);
        assert_eq!(name.tpe().raw, "varchar(100)");
        assert!(users.primary_key_columns().any(|c| c.name() == "id"));

        let index = users.index("users_name_idx").unwrap();
        assert!(index.is_unique());
        assert_eq!(index.parts().count(), 1);
    }

    #[test]
    fn foreign_keys_resolve_across_tables() {
        let hcl = indoc! {r#"
            table "users" {
              column "id" { type = int }
              primary_key { columns = [column.id] }
            }

            table "posts" {
              column "id" { type = int }
              column "author_id" { type = int }
              primary_key { columns = [column.id] }
              foreign_key "posts_author_fk" {
                columns = [column.author_id]
                ref_columns = [table.users.column.id]
                on_delete = CASCADE
              }
            }
        "#};

        let realm = parse_realm(&[("schema.hcl", hcl)]).unwrap();
        let posts = realm.find_table("main", "posts").unwrap();
        let fk = posts.foreign_keys().next().unwrap();

        assert_eq!(fk.constraint_name(), Some("posts_author_fk"));
        assert_eq!(fk.referenced_table().name(), "users");
        assert_eq!(fk.on_delete(), ReferentialAction::Cascade);
        assert_eq!(fk.constrained_column_names(), &["author_id"]);
    }

    #[test]
    fn unknown_column_references_are_positioned_errors() {
        let hcl = indoc! {r#"
            table "users" {
              column "id" { type = int }
              primary_key { columns = [column.missing] }
            }
        "#};

        let err = parse_realm(&[("broken.hcl", hcl)]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("broken.hcl:3"), "unexpected message: {message}");
        assert!(message.contains("missing"));
    }

    #[test]
    fn defaults_and_enum_types() {
        let hcl = indoc! {r#"
            table "events" {
              column "kind" {
                type = enum("created", "deleted")
              }
              column "at" {
                type = datetime
                default = sql("CURRENT_TIMESTAMP")
              }
              column "severity" {
                type = int
                default = 3
              }
            }
        "#};

        let realm = parse_realm(&[("schema.hcl", hcl)]).unwrap();
        let events = realm.find_table("main", "events").unwrap();

        match &events.column("kind").unwrap().tpe().family {
            ColumnTypeFamily::Enum { values } => assert_eq!(values, &["created", "deleted"]),
            other => panic!("expected enum, got {other:?}"),
        }
        assert_eq!(
            events.column("at").unwrap().default(),
            Some(&DefaultValue::Expr("CURRENT_TIMESTAMP".into()))
        );
        assert_eq!(
            events.column("severity").unwrap().default(),
            Some(&DefaultValue::Literal("3".into()))
        );
    }
}
