//! Splitting migration scripts into individual statements.
//!
//! The executor applies files statement by statement, so the split has to be
//! faithful: quoting, comments, trigger bodies and custom delimiters all
//! change where a statement ends.

use crate::{ConnectorError, ConnectorResult};

/// One statement of a migration script, with its byte offset in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub text: String,
    pub pos: usize,
}

/// Splits `input` into statements.
///
/// With the default `;` separator, `BEGIN … END` blocks of trigger bodies
/// are kept intact. A custom delimiter (from an `atlas:delimiter` directive)
/// replaces the separator entirely and is not included in the statement
/// text. Leading comments attach to the statement that follows them;
/// trailing comment-only content is dropped.
pub fn split_sql_statements(input: &str, delimiter: Option<&str>) -> ConnectorResult<Vec<Stmt>> {
    let custom = delimiter.filter(|d| *d != ";");
    let mut stmts = Vec::new();

    let mut i = 0;
    let mut stmt_start: Option<usize> = None;
    let mut has_content = false;
    let mut in_trigger = false;
    let mut depth: u32 = 0;
    let mut word_start: Option<usize> = None;
    let mut at_line_start = true;

    let mut flush_word = |word_start: &mut Option<usize>, i: usize, in_trigger: &mut bool, depth: &mut u32| {
        if let Some(start) = word_start.take() {
            let word = &input[start..i];
            if word.eq_ignore_ascii_case("trigger") {
                *in_trigger = true;
            } else if *in_trigger {
                if word.eq_ignore_ascii_case("begin") {
                    *depth += 1;
                } else if word.eq_ignore_ascii_case("case") && *depth > 0 {
                    *depth += 1;
                } else if word.eq_ignore_ascii_case("end") {
                    *depth = depth.saturating_sub(1);
                }
            }
        }
    };

    while i < input.len() {
        let rest = &input[i..];
        let c = rest.chars().next().unwrap();

        // Custom delimiters take precedence over everything but strings and
        // comments, which are handled below before this check can trigger.
        if let Some(delim) = custom {
            if rest.starts_with(delim) {
                flush_word(&mut word_start, i, &mut in_trigger, &mut depth);
                if depth == 0 {
                    finish_statement(input, &mut stmt_start, i, &mut has_content, &mut stmts);
                    in_trigger = false;
                    i += delim.len();
                    at_line_start = true;
                    continue;
                }
            }
        }

        if rest.starts_with("--") || (c == '#' && at_line_start) {
            flush_word(&mut word_start, i, &mut in_trigger, &mut depth);
            if stmt_start.is_none() {
                stmt_start = Some(i);
            }
            let end = rest.find('\n').map(|n| i + n).unwrap_or(input.len());
            i = end;
            continue;
        }

        if rest.starts_with("/*") {
            flush_word(&mut word_start, i, &mut in_trigger, &mut depth);
            if stmt_start.is_none() {
                stmt_start = Some(i);
            }
            match rest.find("*/") {
                Some(n) => i += n + 2,
                None => {
                    return Err(ConnectorError::configuration(
                        "unterminated block comment in migration script",
                    ))
                }
            }
            at_line_start = false;
            continue;
        }

        if c == '\'' || c == '"' || c == '`' {
            flush_word(&mut word_start, i, &mut in_trigger, &mut depth);
            if stmt_start.is_none() {
                stmt_start = Some(i);
            }
            has_content = true;
            i += scan_quoted(rest, c)?;
            at_line_start = false;
            continue;
        }

        if c == '[' {
            flush_word(&mut word_start, i, &mut in_trigger, &mut depth);
            if stmt_start.is_none() {
                stmt_start = Some(i);
            }
            has_content = true;
            match rest.find(']') {
                Some(n) => i += n + 1,
                None => {
                    return Err(ConnectorError::configuration(
                        "unterminated bracketed identifier in migration script",
                    ))
                }
            }
            at_line_start = false;
            continue;
        }

        if c == ';' && custom.is_none() {
            flush_word(&mut word_start, i, &mut in_trigger, &mut depth);
            if depth == 0 {
                // The terminator belongs to the statement text.
                finish_statement(input, &mut stmt_start, i + 1, &mut has_content, &mut stmts);
                in_trigger = false;
            } else if stmt_start.is_none() {
                stmt_start = Some(i);
            }
            i += 1;
            at_line_start = false;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' || (word_start.is_some() && c.is_ascii_digit()) {
            if word_start.is_none() {
                word_start = Some(i);
            }
            if stmt_start.is_none() {
                stmt_start = Some(i);
            }
            has_content = true;
        } else {
            flush_word(&mut word_start, i, &mut in_trigger, &mut depth);
            if !c.is_whitespace() {
                if stmt_start.is_none() {
                    stmt_start = Some(i);
                }
                has_content = true;
            }
        }

        at_line_start = c == '\n';
        i += c.len_utf8();
    }

    flush_word(&mut word_start, input.len(), &mut in_trigger, &mut depth);
    finish_statement(input, &mut stmt_start, input.len(), &mut has_content, &mut stmts);

    Ok(stmts)
}

fn finish_statement(input: &str, stmt_start: &mut Option<usize>, end: usize, has_content: &mut bool, out: &mut Vec<Stmt>) {
    if let Some(start) = stmt_start.take() {
        if *has_content {
            let text = input[start..end].trim().to_owned();
            if !text.is_empty() {
                out.push(Stmt { text, pos: start });
            }
        }
    }
    *has_content = false;
}

/// Returns the byte length of the quoted token at the start of `rest`,
/// including both quotes. A doubled quote escapes itself.
fn scan_quoted(rest: &str, quote: char) -> ConnectorResult<usize> {
    let mut chars = rest.char_indices().skip(1).peekable();

    while let Some((idx, c)) = chars.next() {
        if c != quote {
            continue;
        }
        match chars.peek() {
            Some((_, next)) if *next == quote => {
                chars.next();
            }
            _ => return Ok(idx + c.len_utf8()),
        }
    }

    Err(ConnectorError::configuration(format!(
        "unterminated {quote} quoted token in migration script"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(input: &str) -> Vec<String> {
        split_sql_statements(input, None)
            .unwrap()
            .into_iter()
            .map(|s| s.text)
            .collect()
    }

    #[test]
    fn splits_on_semicolons() {
        let stmts = texts("CREATE TABLE a (id int);\nCREATE TABLE b (id int);\n");
        assert_eq!(stmts, &["CREATE TABLE a (id int);", "CREATE TABLE b (id int);"]);
    }

    #[test]
    fn semicolons_in_strings_do_not_split() {
        let stmts = texts("INSERT INTO t VALUES ('a;b', \"c;d\");");
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn doubled_quotes_are_escapes() {
        let stmts = texts("INSERT INTO t VALUES ('it''s; fine');\nSELECT 1;");
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "INSERT INTO t VALUES ('it''s; fine');");
    }

    #[test]
    fn trigger_bodies_stay_whole() {
        let sql = "CREATE TRIGGER trg AFTER INSERT ON t BEGIN\n  UPDATE t SET n = n + 1;\n  DELETE FROM log;\nEND;\nSELECT 1;";
        let stmts = texts(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with("CREATE TRIGGER"));
        assert!(stmts[0].ends_with("END;"));
    }

    #[test]
    fn leading_comments_attach_to_the_statement() {
        let stmts = split_sql_statements("-- create a\nCREATE TABLE a (id int);", None).unwrap();
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0].pos, 0);
        assert!(stmts[0].text.starts_with("-- create a"));
    }

    #[test]
    fn trailing_comments_are_dropped() {
        let stmts = texts("SELECT 1;\n-- done\n");
        assert_eq!(stmts, &["SELECT 1;"]);
    }

    #[test]
    fn custom_delimiter_splits_and_is_excluded() {
        let sql = "CREATE TRIGGER trg BEGIN SELECT 1; END\n---\nSELECT 2;";
        let stmts = split_sql_statements(sql, Some("\n---\n")).unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].text.ends_with("END"));
        assert_eq!(stmts[1].text, "SELECT 2;");
    }

    #[test]
    fn unterminated_string_errors() {
        assert!(split_sql_statements("SELECT 'oops", None).is_err());
    }
}
