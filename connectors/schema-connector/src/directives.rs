//! Machine-readable instructions embedded in SQL comments.
//!
//! Directives are scanned from the leading comment block of a migration
//! file, in any of the three comment forms:
//!
//! ```sql
//! -- atlas:txmode none
//! # atlas:delimiter \n---\n
//! /* atlas:nolint destructive */
//! ```

use crate::{ConnectorError, ConnectorResult};
use std::fmt;

pub const DIRECTIVE_PREFIX: &str = "atlas:";

pub const DIRECTIVE_TXMODE: &str = "txmode";
pub const DIRECTIVE_DELIMITER: &str = "delimiter";
pub const DIRECTIVE_NOLINT: &str = "nolint";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub key: String,
    pub value: String,
}

/// How statements of one run relate to transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxMode {
    /// No wrapping; every statement is auto-committed.
    None,
    /// One transaction per migration file.
    #[default]
    File,
    /// A single transaction across all pending files. On engines where DDL
    /// commits implicitly this degrades to per-statement atomicity; the
    /// executor does not rewrite or split statements to compensate.
    All,
}

impl fmt::Display for TxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxMode::None => "none",
            TxMode::File => "file",
            TxMode::All => "all",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TxMode {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(TxMode::None),
            "file" => Ok(TxMode::File),
            "all" => Ok(TxMode::All),
            other => Err(ConnectorError::configuration(format!(
                "invalid transaction mode {other:?} (expected none, file or all)"
            ))),
        }
    }
}

/// Extracts the directives from the leading comment block of `text`. The
/// scan stops at the first line that is neither blank nor a comment.
pub fn scan_directives(text: &str) -> Vec<Directive> {
    let mut directives = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let comment = if let Some(rest) = line.strip_prefix("--") {
            rest
        } else if let Some(rest) = line.strip_prefix('#') {
            rest
        } else if let Some(rest) = line.strip_prefix("/*") {
            rest.strip_suffix("*/").unwrap_or(rest)
        } else {
            break;
        };

        let comment = comment.trim();
        if let Some(directive) = comment.strip_prefix(DIRECTIVE_PREFIX) {
            let (key, value) = match directive.split_once(char::is_whitespace) {
                Some((key, value)) => (key, value.trim()),
                None => (directive, ""),
            };
            directives.push(Directive {
                key: key.to_owned(),
                value: value.to_owned(),
            });
        }
    }

    directives
}

/// The file-level transaction mode, if one was declared.
pub fn tx_mode_directive(directives: &[Directive]) -> ConnectorResult<Option<TxMode>> {
    directives
        .iter()
        .find(|d| d.key == DIRECTIVE_TXMODE)
        .map(|d| d.value.parse())
        .transpose()
}

/// The custom statement delimiter, if one was declared. Escaped whitespace
/// (`\n`, `\r`, `\t`) in the directive value is unescaped.
pub fn delimiter_directive(directives: &[Directive]) -> Option<String> {
    let raw = &directives.iter().find(|d| d.key == DIRECTIVE_DELIMITER)?.value;

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_all_three_comment_forms() {
        let text = "-- atlas:txmode none\n# atlas:nolint destructive\n/* atlas:delimiter \\n---\\n */\nCREATE TABLE t (id int);\n-- atlas:txmode all\n";
        let directives = scan_directives(text);

        assert_eq!(
            directives,
            &[
                Directive {
                    key: "txmode".into(),
                    value: "none".into()
                },
                Directive {
                    key: "nolint".into(),
                    value: "destructive".into()
                },
                Directive {
                    key: "delimiter".into(),
                    value: "\\n---\\n".into()
                },
            ],
        );

        assert_eq!(tx_mode_directive(&directives).unwrap(), Some(TxMode::None));
        assert_eq!(delimiter_directive(&directives).as_deref(), Some("\n---\n"));
    }

    #[test]
    fn non_directive_comments_are_ignored() {
        let directives = scan_directives("-- create the users table\nCREATE TABLE users (id int);");
        assert!(directives.is_empty());
    }

    #[test]
    fn invalid_txmode_is_a_configuration_error() {
        let directives = scan_directives("-- atlas:txmode sometimes\n");
        assert!(tx_mode_directive(&directives).is_err());
    }
}
