use pretty_assertions::assert_eq;
use sql_migration_tests::test_api::*;
use std::time::Duration;

#[test]
fn apply_with_an_empty_migrations_directory_works() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.apply_migrations(&dir).send().assert_applied_migrations(&[]);
}

#[test]
fn applying_a_first_migration_records_a_revision() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(
        &dir,
        "20220318104614_initial.sql",
        "CREATE TABLE tbl (`col` int NOT NULL);",
    );

    api.apply_migrations(&dir)
        .send()
        .assert_applied_migrations(&["initial"])
        .assert_statement_logged("CREATE TABLE tbl (`col` int NOT NULL);");

    let revisions = api.revisions();
    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0].version, "20220318104614");
    assert_eq!(revisions[0].applied, 1);
    assert_eq!(revisions[0].total, 1);
    assert!(revisions[0].error.is_none());

    let report = api.migrate_status(&dir);
    assert_eq!(report.status, MigrationStatus::Ok);
    assert_eq!(report.current.as_deref(), Some("20220318104614"));

    api.assert_schema().assert_has_table("tbl");

    // A second run has nothing to do.
    api.apply_migrations(&dir).send().assert_applied_migrations(&[]);
}

#[test]
fn execution_start_event_names_the_target_version() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(&dir, "20220318104614_initial.sql", "CREATE TABLE tbl (id int);");

    let assertions = api.apply_migrations(&dir).send();
    assert!(assertions.events.iter().any(|event| matches!(
        event,
        ExecutionLog::ExecutionStart { target_version: Some(v), .. } if v == "20220318104614"
    )));
}

#[test]
fn applying_two_migrations_works() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(&dir, "20220318104614_initial.sql", "CREATE TABLE cats (id int);");
    api.write_migration(
        &dir,
        "20220318104615_second_migration.sql",
        "ALTER TABLE cats ADD COLUMN name text NULL;",
    );

    api.apply_migrations(&dir)
        .send()
        .assert_applied_migrations(&["initial", "second_migration"]);

    api.apply_migrations(&dir).send().assert_applied_migrations(&[]);

    api.assert_schema().assert_column("cats", "name");
}

#[test]
fn a_failing_statement_records_partial_progress() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(&dir, "20220318104614_initial.sql", "CREATE TABLE a (id int);");
    api.write_migration(
        &dir,
        "20220318104615_second.sql",
        "CREATE TABLE b (id int);\nCREATE TABLE c (id int);\nasdasd;\n",
    );

    let (err, _) = api.apply_migrations(&dir).send_unwrap_err();
    assert!(
        matches!(&err, ConnectorError::Statement { version, .. } if version == "20220318104615"),
        "unexpected error: {err:?}"
    );

    let revisions = api.revisions();
    assert_eq!(revisions.len(), 2);
    assert_eq!(revisions[0].applied, 1);
    assert_eq!(revisions[0].total, 1);

    let failed = &revisions[1];
    assert_eq!(failed.applied, 2);
    assert_eq!(failed.total, 3);
    assert!(failed.error.is_some());
    assert_eq!(failed.error_stmt.as_deref(), Some("asdasd;"));
    assert_eq!(failed.partial_hashes.len(), 2);
}

#[test]
fn resume_retries_only_the_failing_statement() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(&dir, "20220318104614_initial.sql", "CREATE TABLE a (id int);");
    api.write_migration(
        &dir,
        "20220318104615_second.sql",
        "CREATE TABLE b (id int);\nCREATE TABLE c (id int);\nasdasd;\n",
    );

    let _ = api.apply_migrations(&dir).send_unwrap_err();

    // No edits: the retry replays the failing statement only.
    let (err, events) = api.apply_migrations(&dir).send_unwrap_err();
    assert!(matches!(err, ConnectorError::Statement { .. }));

    let statements: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            ExecutionLog::Statement { sql } => Some(sql.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(statements, &["asdasd;"]);

    // Remove the broken statement, re-seal the directory, and the third run
    // completes the file.
    dir.write_file(
        "20220318104615_second.sql",
        "CREATE TABLE b (id int);\nCREATE TABLE c (id int);\n",
    )
    .unwrap();
    dir.sync_sum().unwrap();

    api.apply_migrations(&dir).send().assert_applied_migrations(&["second"]);

    let revisions = api.revisions();
    assert_eq!(revisions[1].applied, 2);
    assert_eq!(revisions[1].total, 2);
    assert!(revisions[1].error.is_none());

    let report = api.migrate_status(&dir);
    assert_eq!(report.status, MigrationStatus::Ok);
}

#[test]
fn editing_the_applied_prefix_of_a_partial_file_is_detected() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(
        &dir,
        "20220318104614_initial.sql",
        "CREATE TABLE a (id int);\nasdasd;\n",
    );

    let _ = api.apply_migrations(&dir).send_unwrap_err();

    // Rewrite the already-applied first statement.
    api.write_migration(
        &dir,
        "20220318104614_initial.sql",
        "CREATE TABLE changed (id int);\nSELECT 1;\n",
    );

    let (err, _) = api.apply_migrations(&dir).send_unwrap_err();
    assert!(
        matches!(err, ConnectorError::HistoryChanged { .. }),
        "unexpected error: {err:?}"
    );
}

#[test]
fn tampering_with_an_unapplied_file_fails_the_checksum() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(&dir, "20220318104614_initial.sql", "CREATE TABLE a (id int);");

    // Append a byte without re-hashing.
    dir.write_file("20220318104614_initial.sql", "CREATE TABLE a (id int); ")
        .unwrap();

    let (err, _) = api.apply_migrations(&dir).send_unwrap_err();
    assert!(matches!(err, ConnectorError::ChecksumMismatch { .. }));

    // `migrate hash` re-seals the directory and the apply goes through.
    dir.sync_sum().unwrap();
    api.apply_migrations(&dir).send().assert_applied_migrations(&["initial"]);
}

#[test]
fn modifying_an_applied_migration_is_detected() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(&dir, "20220318104614_initial.sql", "CREATE TABLE a (id int);");
    api.apply_migrations(&dir).send().assert_applied_migrations(&["initial"]);

    api.write_migration(
        &dir,
        "20220318104614_initial.sql",
        "CREATE TABLE a (id int);\n-- edited after the fact\nSELECT 1;",
    );

    let (err, _) = api.apply_migrations(&dir).send_unwrap_err();
    assert!(
        matches!(err, ConnectorError::HistoryChanged { .. }),
        "unexpected error: {err:?}"
    );
}

#[test]
fn an_uninitialized_non_empty_database_is_dirty() {
    let mut api = TestApi::new();
    api.raw_cmd("CREATE TABLE existing (id int)");

    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);
    api.write_migration(&dir, "20220318104614_initial.sql", "CREATE TABLE a (id int);");

    let (err, _) = api.apply_migrations(&dir).send_unwrap_err();
    assert!(matches!(err, ConnectorError::DirtyDatabase { .. }));

    // --allow-dirty proceeds.
    api.apply_migrations(&dir)
        .allow_dirty()
        .send()
        .assert_applied_migrations(&["initial"]);
}

#[test]
fn baseline_skips_up_to_the_baseline_version() {
    let mut api = TestApi::new();
    // The database already has the schema of the first migration.
    api.raw_cmd("CREATE TABLE a (id int)");

    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);
    api.write_migration(&dir, "20220318104614_initial.sql", "CREATE TABLE a (id int);");
    api.write_migration(&dir, "20220318104615_second.sql", "CREATE TABLE b (id int);");

    api.apply_migrations(&dir)
        .baseline("20220318104614")
        .send()
        .assert_applied_migrations(&["second"]);

    let revisions = api.revisions();
    assert_eq!(revisions.len(), 2);
    assert!(revisions[0].is_resolved());
    assert_eq!(revisions[0].version, "20220318104614");
}

#[test]
fn out_of_order_files_are_a_non_linear_history() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(&dir, "20220318104615_second.sql", "CREATE TABLE b (id int);");
    api.apply_migrations(&dir).send().assert_applied_migrations(&["second"]);

    // A file older than the applied head appears.
    api.write_migration(&dir, "20220318104614_initial.sql", "CREATE TABLE a (id int);");

    let (err, _) = api.apply_migrations(&dir).send_unwrap_err();
    match err {
        ConnectorError::HistoryNonLinear { out_of_order, .. } => {
            assert_eq!(out_of_order, &["20220318104614_initial.sql"]);
        }
        other => panic!("expected HistoryNonLinear, got {other:?}"),
    }
}

#[test]
fn a_revision_without_its_file_is_a_missing_migration() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(&dir, "20220318104614_initial.sql", "CREATE TABLE a (id int);");
    api.write_migration(&dir, "20220318104615_second.sql", "CREATE TABLE b (id int);");
    api.apply_migrations(&dir)
        .send()
        .assert_applied_migrations(&["initial", "second"]);

    std::fs::remove_file(tmp.path().join("20220318104614_initial.sql")).unwrap();
    dir.sync_sum().unwrap();

    let (err, _) = api.apply_migrations(&dir).send_unwrap_err();
    assert!(
        matches!(&err, ConnectorError::MissingMigration { version } if version == "20220318104614"),
        "unexpected error: {err:?}"
    );
}

#[test]
fn migrate_set_declares_resolution() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(&dir, "20220318104614_initial.sql", "CREATE TABLE a (id int);");
    api.write_migration(&dir, "20220318104615_second.sql", "CREATE TABLE b (id int);");

    // Declare both applied without executing anything.
    api.migrate_set(&dir, "20220318104615");

    let report = api.migrate_status(&dir);
    assert_eq!(report.status, MigrationStatus::Ok);

    api.apply_migrations(&dir).send().assert_applied_migrations(&[]);
    api.assert_schema().assert_has_no_table("a");
}

#[test]
fn file_tx_mode_rolls_back_the_failing_file() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(
        &dir,
        "20220318104614_initial.sql",
        "CREATE TABLE a (id int);\nasdasd;\n",
    );

    let (err, _) = api.apply_migrations(&dir).tx_mode(TxMode::File).send_unwrap_err();
    assert!(matches!(err, ConnectorError::Statement { .. }));

    // The successful first statement rolled back with the file.
    api.assert_schema().assert_has_no_table("a");

    let revisions = api.revisions();
    assert_eq!(revisions[0].applied, 0);
    assert!(revisions[0].error.is_some());
}

#[test]
fn txmode_none_directive_conflicts_with_tx_mode_all() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(
        &dir,
        "20220318104614_initial.sql",
        "-- atlas:txmode none\nCREATE TABLE a (id int);",
    );

    let (err, _) = api.apply_migrations(&dir).tx_mode(TxMode::All).send_unwrap_err();
    assert!(
        matches!(err, ConnectorError::TxModeConflict { .. }),
        "unexpected error: {err:?}"
    );
}

#[test]
fn dry_run_logs_the_same_events_and_touches_nothing() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(&dir, "20220318104614_initial.sql", "CREATE TABLE a (id int);");

    let dry = api.apply_migrations(&dir).dry_run().send();
    assert_eq!(api.migrate_status(&dir).executed, 0);
    api.assert_schema().assert_has_no_table("a");

    let real = api.apply_migrations(&dir).send();
    assert_eq!(dry.events, real.events);

    api.assert_schema().assert_has_table("a");
}

#[test]
fn concurrent_appliers_are_mutually_excluded() {
    let mut api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);
    api.write_migration(&dir, "20220318104614_initial.sql", "CREATE TABLE a (id int);");

    // First connection holds the execution lock.
    use schema_connector::Locker as _;
    let guard = tok(api.connector().lock(schema_core::LOCK_NAME, Duration::from_secs(1))).unwrap();

    let mut second = api.second_connection();
    let second_dir = api.dir(&tmp);
    let result = tok(schema_core::apply_migrations(
        &mut second,
        &second_dir,
        &schema_core::ExecutorOptions {
            lock_timeout: Duration::ZERO,
            ..Default::default()
        },
    ));
    assert!(
        matches!(result, Err(ConnectorError::Locked { .. })),
        "unexpected result: {result:?}"
    );

    drop(guard);
    api.apply_migrations(&dir).send().assert_applied_migrations(&["initial"]);
}
