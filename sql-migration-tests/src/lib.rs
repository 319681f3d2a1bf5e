//! Test support for the migration engine. The actual test suites live in
//! `tests/`.

pub mod test_api;
