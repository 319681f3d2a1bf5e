//! SQLite introspection: `sqlite_master` plus the table pragmas, assembled
//! into a realm.

use rusqlite::Connection;
use schema_connector::{ConnectorError, ConnectorResult, InspectOptions};
use sql_realm::{
    Check, Column, ColumnType, ColumnTypeFamily, DefaultValue, ForeignKey, ForeignKeyColumn, Index, IndexPart,
    IndexPartValue, PrimaryKey, Realm, ReferentialAction, SortOrder, TableId, TimeKind,
};
use std::collections::BTreeMap;

pub(super) fn describe(conn: &Connection, options: &InspectOptions) -> ConnectorResult<Realm> {
    let mut realm = Realm::new();
    if !options.includes_schema("main") {
        return Ok(realm);
    }
    let main = realm.push_schema("main");

    let table_rows: Vec<(String, String)> = {
        let mut stmt = conn
            .prepare("SELECT name, COALESCE(sql, '') FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .map_err(ConnectorError::database)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(ConnectorError::database)?;
        rows.collect::<Result<_, _>>().map_err(ConnectorError::database)?
    };

    // Foreign keys resolve against tables by name, so they are collected
    // first and pushed once every table exists.
    let mut pending_fks: Vec<(TableId, Vec<RawForeignKeyRow>)> = Vec::new();

    for (table_name, table_sql) in table_rows {
        if !options.includes_table("main", &table_name) {
            continue;
        }

        let table_id = realm.push_table(main, &table_name);
        let has_autoincrement = table_sql.to_ascii_uppercase().contains("AUTOINCREMENT");

        describe_columns(conn, &mut realm, table_id, &table_name, has_autoincrement)?;

        for (check_name, expr) in parse_checks(&table_sql) {
            realm.push_check(Check {
                table_id,
                name: check_name,
                expr,
                enforced: true,
            });
        }

        describe_indexes(conn, &mut realm, table_id, &table_name)?;

        pending_fks.push((table_id, raw_foreign_keys(conn, &table_name)?));
    }

    push_foreign_keys(&mut realm, pending_fks)?;

    Ok(realm)
}

struct RawForeignKeyRow {
    id: i64,
    seq: i64,
    referenced_table: String,
    constrained_column: String,
    referenced_column: Option<String>,
    on_update: String,
    on_delete: String,
}

fn describe_columns(
    conn: &Connection,
    realm: &mut Realm,
    table_id: TableId,
    table_name: &str,
    has_autoincrement: bool,
) -> ConnectorResult<()> {
    struct RawColumn {
        name: String,
        tpe: String,
        notnull: bool,
        default: Option<String>,
        pk: i64,
    }

    let rows: Vec<RawColumn> = {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", quoted(table_name)))
            .map_err(ConnectorError::database)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RawColumn {
                    name: row.get("name")?,
                    tpe: row.get("type")?,
                    notnull: row.get("notnull")?,
                    default: row.get("dflt_value")?,
                    pk: row.get("pk")?,
                })
            })
            .map_err(ConnectorError::database)?;
        rows.collect::<Result<_, _>>().map_err(ConnectorError::database)?
    };

    let single_integer_pk = rows.iter().filter(|c| c.pk > 0).count() == 1
        && rows
            .iter()
            .find(|c| c.pk > 0)
            .map(|c| matches!(parse_type(&c.tpe), ColumnTypeFamily::Integer { .. }))
            .unwrap_or(false);

    let mut pk_columns: Vec<(i64, sql_realm::ColumnId)> = Vec::new();

    for raw in rows {
        let family = parse_type(&raw.tpe);
        let auto_increment = has_autoincrement && single_integer_pk && raw.pk > 0;
        let column_id = realm.push_column(Column {
            table_id,
            name: raw.name,
            tpe: ColumnType {
                family,
                raw: raw.tpe,
                is_nullable: !raw.notnull,
            },
            default: raw.default.and_then(parse_default),
            auto_increment,
            comment: None,
            charset: None,
            collation: None,
            generated: None,
        });
        if raw.pk > 0 {
            pk_columns.push((raw.pk, column_id));
        }
    }

    if !pk_columns.is_empty() {
        pk_columns.sort_by_key(|(ordinal, _)| *ordinal);
        realm.set_primary_key(
            table_id,
            PrimaryKey {
                constraint_name: None,
                columns: pk_columns.into_iter().map(|(_, id)| id).collect(),
            },
        );
    }

    Ok(())
}

fn describe_indexes(conn: &Connection, realm: &mut Realm, table_id: TableId, table_name: &str) -> ConnectorResult<()> {
    struct RawIndex {
        name: String,
        unique: bool,
        origin: String,
        partial: bool,
    }

    let indexes: Vec<RawIndex> = {
        let mut stmt = conn
            .prepare(&format!("PRAGMA index_list({})", quoted(table_name)))
            .map_err(ConnectorError::database)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RawIndex {
                    name: row.get("name")?,
                    unique: row.get("unique")?,
                    origin: row.get("origin")?,
                    partial: row.get("partial")?,
                })
            })
            .map_err(ConnectorError::database)?;
        rows.collect::<Result<_, _>>().map_err(ConnectorError::database)?
    };

    for raw in indexes {
        // The primary key index is modeled on the table itself.
        if raw.origin == "pk" {
            continue;
        }

        let index_sql: Option<String> = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'index' AND name = ?",
                [&raw.name],
                |row| row.get(0),
            )
            .unwrap_or(None);

        let predicate = if raw.partial {
            index_sql.as_deref().and_then(parse_index_predicate)
        } else {
            None
        };
        let expr_parts = index_sql.as_deref().map(parse_index_parts).unwrap_or_default();

        let index_id = realm.push_index(Index {
            table_id,
            name: raw.name.clone(),
            unique: raw.unique,
            predicate,
            comment: None,
        });

        struct RawPart {
            seqno: i64,
            cid: i64,
            column: Option<String>,
            desc: bool,
            key: bool,
        }

        let mut parts: Vec<RawPart> = {
            let mut stmt = conn
                .prepare(&format!("PRAGMA index_xinfo({})", quoted(&raw.name)))
                .map_err(ConnectorError::database)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(RawPart {
                        seqno: row.get("seqno")?,
                        cid: row.get("cid")?,
                        column: row.get("name")?,
                        desc: row.get("desc")?,
                        key: row.get("key")?,
                    })
                })
                .map_err(ConnectorError::database)?;
            rows.collect::<Result<_, _>>().map_err(ConnectorError::database)?
        };
        parts.sort_by_key(|p| p.seqno);

        let mut key_ordinal = 0usize;
        for part in parts.into_iter().filter(|p| p.key) {
            let value = match part.column {
                Some(column_name) => {
                    let column = realm
                        .walk(table_id)
                        .column(&column_name)
                        .ok_or_else(|| ConnectorError::database(format!("index column {column_name} not found")))?;
                    IndexPartValue::Column(column.id)
                }
                None if part.cid == -2 => {
                    let expr = expr_parts.get(key_ordinal).cloned().unwrap_or_default();
                    IndexPartValue::Expr(expr)
                }
                // cid -1 is the rowid.
                None => continue,
            };
            realm.push_index_part(IndexPart {
                index_id,
                value,
                sort: if part.desc { SortOrder::Desc } else { SortOrder::Asc },
            });
            key_ordinal += 1;
        }
    }

    Ok(())
}

fn raw_foreign_keys(conn: &Connection, table_name: &str) -> ConnectorResult<Vec<RawForeignKeyRow>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA foreign_key_list({})", quoted(table_name)))
        .map_err(ConnectorError::database)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(RawForeignKeyRow {
                id: row.get("id")?,
                seq: row.get("seq")?,
                referenced_table: row.get("table")?,
                constrained_column: row.get("from")?,
                referenced_column: row.get("to")?,
                on_update: row.get("on_update")?,
                on_delete: row.get("on_delete")?,
            })
        })
        .map_err(ConnectorError::database)?;
    rows.collect::<Result<_, _>>().map_err(ConnectorError::database)
}

fn push_foreign_keys(realm: &mut Realm, pending: Vec<(TableId, Vec<RawForeignKeyRow>)>) -> ConnectorResult<()> {
    for (table_id, rows) in pending {
        let mut grouped: BTreeMap<i64, Vec<RawForeignKeyRow>> = BTreeMap::new();
        for row in rows {
            grouped.entry(row.id).or_default().push(row);
        }

        for (_, mut group) in grouped {
            group.sort_by_key(|row| row.seq);
            let first = &group[0];

            let Some(referenced_table) = realm
                .walk_tables()
                .find(|t| t.name().eq_ignore_ascii_case(&first.referenced_table))
                .map(|t| t.id)
            else {
                // Referenced table filtered out or missing; the constraint
                // cannot be represented.
                continue;
            };

            let on_delete = parse_action(&first.on_delete);
            let on_update = parse_action(&first.on_update);

            let mut pairs = Vec::with_capacity(group.len());
            let mut resolved = true;
            for (position, row) in group.iter().enumerate() {
                let constrained = realm.walk(table_id).column(&row.constrained_column).map(|c| c.id);
                let referenced = match &row.referenced_column {
                    Some(name) => realm.walk(referenced_table).column(name).map(|c| c.id),
                    // A missing referenced column means the primary key.
                    None => realm
                        .walk(referenced_table)
                        .primary_key_columns()
                        .nth(position)
                        .map(|c| c.id),
                };
                match (constrained, referenced) {
                    (Some(constrained), Some(referenced)) => pairs.push((constrained, referenced)),
                    _ => {
                        resolved = false;
                        break;
                    }
                }
            }
            if !resolved || pairs.is_empty() {
                continue;
            }

            let fk_id = realm.push_foreign_key(ForeignKey {
                table_id,
                referenced_table_id: referenced_table,
                constraint_name: None,
                on_delete,
                on_update,
            });
            for (constrained_column_id, referenced_column_id) in pairs {
                realm.push_foreign_key_column(ForeignKeyColumn {
                    foreign_key_id: fk_id,
                    constrained_column_id,
                    referenced_column_id,
                });
            }
        }
    }

    Ok(())
}

fn parse_action(action: &str) -> ReferentialAction {
    match action.to_ascii_uppercase().as_str() {
        "CASCADE" => ReferentialAction::Cascade,
        "RESTRICT" => ReferentialAction::Restrict,
        "SET NULL" => ReferentialAction::SetNull,
        "SET DEFAULT" => ReferentialAction::SetDefault,
        _ => ReferentialAction::NoAction,
    }
}

/// Classifies a declared type. SQLite stores the spelling verbatim, so this
/// is a keyword scan in the spirit of the engine's own type affinity rules.
fn parse_type(raw: &str) -> ColumnTypeFamily {
    let lower = raw.to_ascii_lowercase();
    let base = lower.split('(').next().unwrap_or("").trim().to_owned();
    let args = parse_type_args(&lower);

    match base.as_str() {
        "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint" | "int2" | "int8" => {
            ColumnTypeFamily::Integer {
                unsigned: lower.contains("unsigned"),
                size: None,
            }
        }
        "real" | "double" | "double precision" | "float" => ColumnTypeFamily::Float {
            precision: args.first().map(|v| *v as u8),
        },
        "decimal" | "numeric" => ColumnTypeFamily::Decimal {
            precision: args.first().map(|v| *v as u16),
            scale: args.get(1).map(|v| *v as u16),
        },
        "character" | "varchar" | "varying character" | "nchar" | "native character" | "nvarchar" => {
            ColumnTypeFamily::String {
                size: args.first().copied(),
            }
        }
        "text" | "clob" => ColumnTypeFamily::String { size: None },
        "blob" | "binary" | "varbinary" => ColumnTypeFamily::Binary {
            size: args.first().copied(),
        },
        "boolean" | "bool" => ColumnTypeFamily::Boolean,
        "date" => ColumnTypeFamily::Time { kind: TimeKind::Date },
        "time" => ColumnTypeFamily::Time { kind: TimeKind::Time },
        "datetime" => ColumnTypeFamily::Time {
            kind: TimeKind::DateTime,
        },
        "timestamp" => ColumnTypeFamily::Time {
            kind: TimeKind::Timestamp,
        },
        "json" | "jsonb" => ColumnTypeFamily::Json,
        "" => ColumnTypeFamily::Unsupported,
        _ => ColumnTypeFamily::Unsupported,
    }
}

fn parse_type_args(lower: &str) -> Vec<u32> {
    let Some(open) = lower.find('(') else { return Vec::new() };
    let Some(close) = lower.rfind(')') else { return Vec::new() };
    if close <= open {
        return Vec::new();
    }
    lower[open + 1..close]
        .split(',')
        .filter_map(|arg| arg.trim().parse().ok())
        .collect()
}

fn parse_default(raw: String) -> Option<DefaultValue> {
    if raw.eq_ignore_ascii_case("null") {
        return None;
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Some(DefaultValue::Literal(raw[1..raw.len() - 1].replace("''", "'")));
    }
    let numeric = !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+');
    if numeric || raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("false") {
        return Some(DefaultValue::Literal(raw));
    }
    let trimmed = raw.strip_prefix('(').and_then(|r| r.strip_suffix(')')).unwrap_or(&raw);
    Some(DefaultValue::Expr(trimmed.to_owned()))
}

/// Extracts `CHECK` constraints from a `CREATE TABLE` statement, since no
/// pragma exposes them.
fn parse_checks(sql: &str) -> Vec<(Option<String>, String)> {
    let bytes = sql.as_bytes();
    let mut checks = Vec::new();
    let mut recent_words: Vec<String> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;

        if c == '\'' || c == '"' || c == '`' {
            i += skip_quoted(&sql[i..], c);
            continue;
        }
        if c == '[' {
            i += sql[i..].find(']').map(|n| n + 1).unwrap_or(sql.len() - i);
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let word = &sql[start..i];

            if word.eq_ignore_ascii_case("check") {
                let name = match recent_words.as_slice() {
                    [.., kw, name] if kw.eq_ignore_ascii_case("constraint") => Some(unquote(name)),
                    _ => None,
                };
                if let Some((expr, consumed)) = scan_parenthesized(&sql[i..]) {
                    checks.push((name, expr));
                    i += consumed;
                }
                recent_words.clear();
                continue;
            }

            recent_words.push(word.to_owned());
            if recent_words.len() > 4 {
                recent_words.remove(0);
            }
            continue;
        }

        i += 1;
    }

    checks
}

/// The top-level column/expression list of a `CREATE INDEX` statement, for
/// expression index parts.
fn parse_index_parts(sql: &str) -> Vec<String> {
    let Some(open) = sql.find('(') else { return Vec::new() };
    let Some((inner, _)) = scan_parenthesized(&sql[open..]) else {
        return Vec::new();
    };

    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let bytes = inner.as_bytes();
    for (idx, b) in bytes.iter().enumerate() {
        match *b as char {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(normalize_index_part(&inner[start..idx]));
                start = idx + 1;
            }
            _ => (),
        }
    }
    parts.push(normalize_index_part(&inner[start..]));
    parts
}

fn normalize_index_part(part: &str) -> String {
    let trimmed = part.trim();
    let without_order = trimmed
        .strip_suffix(" DESC")
        .or_else(|| trimmed.strip_suffix(" desc"))
        .or_else(|| trimmed.strip_suffix(" ASC"))
        .or_else(|| trimmed.strip_suffix(" asc"))
        .unwrap_or(trimmed);
    let stripped = without_order
        .trim()
        .strip_prefix('(')
        .and_then(|p| p.strip_suffix(')'))
        .unwrap_or(without_order.trim());
    stripped.trim().to_owned()
}

fn parse_index_predicate(sql: &str) -> Option<String> {
    let upper = sql.to_ascii_uppercase();
    let pos = upper.rfind(" WHERE ")?;
    Some(sql[pos + " WHERE ".len()..].trim().to_owned())
}

/// Returns the contents of the next balanced parenthesized group and the
/// bytes consumed (group included).
fn scan_parenthesized(rest: &str) -> Option<(String, usize)> {
    let open = rest.find('(')?;
    // Only whitespace may precede the group.
    if !rest[..open].chars().all(char::is_whitespace) {
        return None;
    }

    let mut depth = 0usize;
    let bytes = rest.as_bytes();
    let mut i = open;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == '\'' || c == '"' || c == '`' {
            i += skip_quoted(&rest[i..], c);
            continue;
        }
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((rest[open + 1..i].trim().to_owned(), i + 1));
                }
            }
            _ => (),
        }
        i += 1;
    }
    None
}

fn skip_quoted(rest: &str, quote: char) -> usize {
    let mut chars = rest.char_indices().skip(1).peekable();
    while let Some((idx, c)) = chars.next() {
        if c == quote {
            if chars.peek().map(|(_, next)| *next == quote).unwrap_or(false) {
                chars.next();
            } else {
                return idx + c.len_utf8();
            }
        }
    }
    rest.len()
}

fn unquote(word: &str) -> String {
    word.trim_matches(|c| c == '"' || c == '`' || c == '\'' || c == '[' || c == ']')
        .to_owned()
}

fn quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_parsing_classifies_common_spellings() {
        assert!(matches!(parse_type("INTEGER"), ColumnTypeFamily::Integer { .. }));
        assert!(matches!(
            parse_type("varchar(100)"),
            ColumnTypeFamily::String { size: Some(100) }
        ));
        assert!(matches!(parse_type("TEXT"), ColumnTypeFamily::String { size: None }));
        assert!(matches!(
            parse_type("decimal(10,2)"),
            ColumnTypeFamily::Decimal {
                precision: Some(10),
                scale: Some(2)
            }
        ));
        assert!(matches!(parse_type("BOOLEAN"), ColumnTypeFamily::Boolean));
        assert!(matches!(parse_type("sometype"), ColumnTypeFamily::Unsupported));
    }

    #[test]
    fn checks_are_parsed_out_of_table_sql() {
        let sql = r#"CREATE TABLE t (
            price int CHECK (price > 0),
            name text,
            CONSTRAINT name_not_empty CHECK (length(name) > 0)
        )"#;

        let checks = parse_checks(sql);
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0], (None, "price > 0".to_owned()));
        assert_eq!(checks[1], (Some("name_not_empty".to_owned()), "length(name) > 0".to_owned()));
    }

    #[test]
    fn defaults_are_classified() {
        assert_eq!(parse_default("'abc'".into()), Some(DefaultValue::Literal("abc".into())));
        assert_eq!(parse_default("42".into()), Some(DefaultValue::Literal("42".into())));
        assert_eq!(parse_default("NULL".into()), None);
        assert_eq!(
            parse_default("(datetime('now'))".into()),
            Some(DefaultValue::Expr("datetime('now')".into()))
        );
    }

    #[test]
    fn index_parts_split_at_top_level_commas() {
        let parts = parse_index_parts("CREATE INDEX i ON t (a, (b + c), d DESC)");
        assert_eq!(parts, &["a", "b + c", "d"]);
    }
}
