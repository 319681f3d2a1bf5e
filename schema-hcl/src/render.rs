//! Rendering a realm back to HCL, for `schema inspect`.

use sql_realm::{ColumnTypeFamily, DefaultValue, Realm, ReferentialAction, TimeKind};
use std::fmt::Write as _;

pub fn render_realm(realm: &Realm) -> String {
    let mut out = String::new();

    for schema in realm.walk_schemas() {
        let _ = writeln!(out, "schema {:?} {{}}", schema.name());
        out.push('\n');

        for table in schema.tables() {
            let _ = writeln!(out, "table {:?} {{", table.name());
            let _ = writeln!(out, "  schema = schema.{}", schema.name());

            for column in table.columns() {
                let _ = writeln!(out, "  column {:?} {{", column.name());
                let _ = writeln!(out, "    type = {}", render_type_expr(&column.tpe().family, &column.tpe().raw));
                if column.tpe().is_nullable {
                    out.push_str("    null = true\n");
                }
                if column.is_auto_increment() {
                    out.push_str("    auto_increment = true\n");
                }
                match column.default() {
                    Some(DefaultValue::Literal(literal)) => {
                        let numeric_or_bool = literal.parse::<f64>().is_ok() || literal == "true" || literal == "false";
                        if numeric_or_bool {
                            let _ = writeln!(out, "    default = {literal}");
                        } else {
                            let _ = writeln!(out, "    default = {literal:?}");
                        }
                    }
                    Some(DefaultValue::Expr(expr)) => {
                        let _ = writeln!(out, "    default = sql({expr:?})");
                    }
                    None => (),
                }
                out.push_str("  }\n");
            }

            if table.primary_key().is_some() {
                out.push_str("  primary_key {\n    columns = [");
                let columns: Vec<String> = table
                    .primary_key_columns()
                    .map(|c| format!("column.{}", c.name()))
                    .collect();
                out.push_str(&columns.join(", "));
                out.push_str("]\n  }\n");
            }

            for index in table.indexes() {
                let _ = writeln!(out, "  index {:?} {{", index.name());
                if index.is_unique() {
                    out.push_str("    unique = true\n");
                }
                let parts: Vec<String> = index
                    .parts()
                    .filter_map(|part| part.column().map(|c| format!("column.{}", c.name())))
                    .collect();
                let _ = writeln!(out, "    columns = [{}]", parts.join(", "));
                if let Some(predicate) = index.predicate() {
                    let _ = writeln!(out, "    where = {predicate:?}");
                }
                out.push_str("  }\n");
            }

            for fk in table.foreign_keys() {
                let symbol = fk
                    .constraint_name()
                    .map(ToOwned::to_owned)
                    .unwrap_or_else(|| format!("{}_fk", fk.constrained_column_names().join("_")));
                let _ = writeln!(out, "  foreign_key {symbol:?} {{");
                let columns: Vec<String> = fk
                    .constrained_columns()
                    .map(|c| format!("column.{}", c.name()))
                    .collect();
                let _ = writeln!(out, "    columns = [{}]", columns.join(", "));
                let ref_table = fk.referenced_table().name().to_owned();
                let refs: Vec<String> = fk
                    .referenced_columns()
                    .map(|c| format!("table.{ref_table}.column.{}", c.name()))
                    .collect();
                let _ = writeln!(out, "    ref_columns = [{}]", refs.join(", "));
                if fk.on_delete() != ReferentialAction::NoAction {
                    let _ = writeln!(out, "    on_delete = {}", render_action(fk.on_delete()));
                }
                if fk.on_update() != ReferentialAction::NoAction {
                    let _ = writeln!(out, "    on_update = {}", render_action(fk.on_update()));
                }
                out.push_str("  }\n");
            }

            for check in table.checks() {
                match check.name() {
                    Some(name) => {
                        let _ = writeln!(out, "  check {name:?} {{");
                    }
                    None => out.push_str("  check {\n"),
                }
                let _ = writeln!(out, "    expr = {:?}", check.expr());
                out.push_str("  }\n");
            }

            out.push_str("}\n\n");
        }
    }

    out.trim_end().to_owned() + "\n"
}

fn render_action(action: ReferentialAction) -> &'static str {
    match action {
        ReferentialAction::NoAction => "NO_ACTION",
        ReferentialAction::Restrict => "RESTRICT",
        ReferentialAction::Cascade => "CASCADE",
        ReferentialAction::SetNull => "SET_NULL",
        ReferentialAction::SetDefault => "SET_DEFAULT",
    }
}

fn render_type_expr(family: &ColumnTypeFamily, raw: &str) -> String {
    match family {
        ColumnTypeFamily::Integer { .. } => "int".to_owned(),
        ColumnTypeFamily::Float { .. } => "float".to_owned(),
        ColumnTypeFamily::Decimal {
            precision: Some(precision),
            scale: Some(scale),
        } => format!("decimal({precision},{scale})"),
        ColumnTypeFamily::Decimal { .. } => "decimal".to_owned(),
        ColumnTypeFamily::String { size: Some(size) } => format!("varchar({size})"),
        ColumnTypeFamily::String { size: None } => "text".to_owned(),
        ColumnTypeFamily::Binary { size: Some(size) } => format!("binary({size})"),
        ColumnTypeFamily::Binary { size: None } => "blob".to_owned(),
        ColumnTypeFamily::Boolean => "bool".to_owned(),
        ColumnTypeFamily::Enum { values } => {
            let rendered: Vec<String> = values.iter().map(|v| format!("{v:?}")).collect();
            format!("enum({})", rendered.join(", "))
        }
        ColumnTypeFamily::Time { kind } => match kind {
            TimeKind::Date => "date".to_owned(),
            TimeKind::Time => "time".to_owned(),
            TimeKind::DateTime => "datetime".to_owned(),
            TimeKind::Timestamp => "timestamp".to_owned(),
        },
        ColumnTypeFamily::Json => "json".to_owned(),
        ColumnTypeFamily::Spatial { kind } => kind.clone(),
        ColumnTypeFamily::Unsupported => format!("{raw:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_realm;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn rendered_realms_parse_back() {
        let hcl = indoc! {r#"
            schema "main" {}

            table "users" {
              schema = schema.main
              column "id" { type = int }
              column "email" {
                type = varchar(255)
              }
              primary_key { columns = [column.id] }
              index "users_email_key" {
                unique = true
                columns = [column.email]
              }
            }
        "#};

        let realm = parse_realm(&[("schema.hcl", hcl)]).unwrap();
        let rendered = render_realm(&realm);
        let reparsed = parse_realm(&[("rendered.hcl", rendered.as_str())]).unwrap();

        assert_eq!(realm, reparsed);
    }
}
