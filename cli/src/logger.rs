//! Console rendering of the structured execution events.

use schema_connector::{ExecutionLog, ExecutionLogger};

#[derive(Debug, Default)]
pub(crate) struct ConsoleLogger;

impl ExecutionLogger for ConsoleLogger {
    fn log(&self, event: ExecutionLog) {
        match event {
            ExecutionLog::ExecutionStart { pending, target_version } => match target_version {
                Some(version) if pending > 0 => {
                    println!("Migrating to version {version} ({pending} migration file(s) pending):");
                }
                _ => println!("No migration files to execute."),
            },
            ExecutionLog::FileStart {
                file_name,
                skipped_statements,
                ..
            } => {
                println!();
                println!("  -- migrating {file_name}");
                if skipped_statements > 0 {
                    println!("    -- resuming after {skipped_statements} previously applied statement(s)");
                }
            }
            ExecutionLog::Statement { sql } => {
                for (i, line) in sql.lines().enumerate() {
                    if i == 0 {
                        println!("    -> {line}");
                    } else {
                        println!("       {line}");
                    }
                }
            }
            ExecutionLog::FileDone { .. } => println!("  -- ok"),
            ExecutionLog::Done {
                files_applied,
                statements_applied,
            } => {
                println!();
                println!("  {files_applied} migration file(s) executed, {statements_applied} statement(s) applied.");
            }
            ExecutionLog::Error { message, .. } => eprintln!("  -- error: {message}"),
            ExecutionLog::ChecksStart { file_name } => println!("Analyzing {file_name}:"),
            ExecutionLog::ChecksDone { file_name, diagnostics } => {
                println!("  {file_name}: {diagnostics} diagnostic(s)");
            }
        }
    }
}
