//! Value types for DDL statements, rendered through `Display`.
//!
//! The SQL planners build these instead of pushing strings around: the
//! statement shape is checked by the compiler, and quoting lives in exactly
//! one place.

pub mod sqlite;
