//! Rendering plans into migration files.

use crate::Plan;

/// Maps a plan onto one or more named migration files. The default format
/// writes a single `.sql` file; alternative layouts (up/down splits,
/// prefixed names) plug in here.
pub trait Formatter: Send + Sync {
    fn format(&self, version: &str, name: &str, plan: &Plan) -> Vec<(String, String)>;
}

/// One `.sql` file per plan, with a comment line per change.
#[derive(Debug, Default)]
pub struct DefaultFormatter;

impl Formatter for DefaultFormatter {
    fn format(&self, version: &str, name: &str, plan: &Plan) -> Vec<(String, String)> {
        let mut contents = String::new();

        for change in &plan.changes {
            if let Some(comment) = &change.comment {
                contents.push_str("-- ");
                contents.push_str(comment);
                contents.push('\n');
            }
            contents.push_str(&change.cmd);
            contents.push_str(";\n");
        }

        let file_name = if name.is_empty() {
            format!("{version}.sql")
        } else {
            format!("{version}_{name}.sql")
        };

        vec![(file_name, contents)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlanChange;

    #[test]
    fn default_format_is_one_commented_sql_file() {
        let mut plan = Plan::new("add_users");
        plan.push(PlanChange {
            cmd: "CREATE TABLE `users` (\n  `id` integer NOT NULL\n)".into(),
            reverse: Some("DROP TABLE `users`".into()),
            comment: Some("Create \"users\" table".into()),
        });

        let files = DefaultFormatter.format("20220318104614", "add_users", &plan);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "20220318104614_add_users.sql");
        assert_eq!(
            files[0].1,
            "-- Create \"users\" table\nCREATE TABLE `users` (\n  `id` integer NOT NULL\n);\n",
        );
    }
}
