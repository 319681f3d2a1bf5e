//! Structured execution events.
//!
//! The core never formats user-facing text. It emits these values through an
//! [`ExecutionLogger`] and the command layer renders them; a dry run and a
//! real run of the same inputs produce the same event stream.

use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionLog {
    /// A run starts: how many files are pending and where it will end.
    ExecutionStart {
        pending: usize,
        target_version: Option<String>,
    },
    /// Execution of one file begins. `skipped_statements` is the resume
    /// offset for a previously interrupted file.
    FileStart {
        file_name: String,
        version: String,
        skipped_statements: usize,
    },
    /// A statement is about to run.
    Statement { sql: String },
    /// One file finished cleanly.
    FileDone { file_name: String },
    /// The whole run finished cleanly.
    Done {
        files_applied: usize,
        statements_applied: usize,
    },
    Error {
        message: String,
        statement: Option<String>,
    },
    /// Lint checks on one file begin / end.
    ChecksStart { file_name: String },
    ChecksDone { file_name: String, diagnostics: usize },
}

pub trait ExecutionLogger: Send + Sync {
    fn log(&self, event: ExecutionLog);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NopLogger;

impl ExecutionLogger for NopLogger {
    fn log(&self, _event: ExecutionLog) {}
}

/// Collects events in memory; used by tests and by dry-run comparisons.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    events: Mutex<Vec<ExecutionLog>>,
}

impl MemoryLogger {
    pub fn events(&self) -> Vec<ExecutionLog> {
        self.events.lock().unwrap().clone()
    }
}

impl ExecutionLogger for MemoryLogger {
    fn log(&self, event: ExecutionLog) {
        self.events.lock().unwrap().push(event);
    }
}
