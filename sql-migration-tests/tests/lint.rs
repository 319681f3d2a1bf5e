use sql_migration_tests::test_api::*;
use std::time::Duration;

fn lint(api: &TestApi, dir: &LocalDir, latest: usize) -> Vec<schema_connector::Report> {
    let mut dev = api.dev_connector();
    tok(schema_core::commands::migrate_lint(
        &mut dev,
        schema_core::commands::LintParams {
            lock_timeout: Duration::from_secs(5),
            ..schema_core::commands::LintParams::new(dir, schema_core::commands::ChangeDetector::Latest(latest))
        },
    ))
    .unwrap()
}

#[test]
fn adding_a_non_nullable_column_is_data_dependent() {
    let api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(&dir, "20220318104614_base.sql", "CREATE TABLE t (a int);");
    // On SQLite a required column without a default arrives through the
    // redefinition recipe.
    api.write_migration(
        &dir,
        "20220318104615_add_column.sql",
        "CREATE TABLE `new_t` (`a` int NULL, `b` int NOT NULL);\n\
         INSERT INTO `new_t` (`a`) SELECT `a` FROM `t`;\n\
         DROP TABLE `t`;\n\
         ALTER TABLE `new_t` RENAME TO `t`;\n",
    );

    let reports = lint(&api, &dir, 1);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].file_name, "20220318104615_add_column.sql");

    let mf103 = reports[0]
        .diagnostics
        .iter()
        .find(|d| d.code == "MF103")
        .expect("expected an MF103 diagnostic");
    assert!(mf103.text.contains("\"b\""), "text: {}", mf103.text);
    assert!(mf103.text.contains("\"t\""), "text: {}", mf103.text);
}

#[test]
fn dropping_a_table_is_destructive() {
    let api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(&dir, "20220318104614_base.sql", "CREATE TABLE t (a int);");
    api.write_migration(&dir, "20220318104615_drop.sql", "DROP TABLE t;");

    let reports = lint(&api, &dir, 1);
    let codes: Vec<&str> = reports[0].diagnostics.iter().map(|d| d.code.as_str()).collect();
    assert_eq!(codes, &["DS102"]);
}

#[test]
fn unique_index_on_an_existing_table_is_data_dependent() {
    let api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(&dir, "20220318104614_base.sql", "CREATE TABLE t (a int);");
    api.write_migration(
        &dir,
        "20220318104615_unique.sql",
        "CREATE UNIQUE INDEX t_a_key ON t (a);",
    );

    let reports = lint(&api, &dir, 1);
    let codes: Vec<&str> = reports[0].diagnostics.iter().map(|d| d.code.as_str()).collect();
    assert_eq!(codes, &["MF101"]);
}

#[test]
fn base_files_are_not_analyzed() {
    let api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    // The destructive change sits in the base; only the new file is linted.
    api.write_migration(
        &dir,
        "20220318104614_base.sql",
        "CREATE TABLE t (a int);\nDROP TABLE t;\nCREATE TABLE u (a int);",
    );
    api.write_migration(&dir, "20220318104615_new.sql", "CREATE TABLE v (a int);");

    let reports = lint(&api, &dir, 1);
    assert_eq!(reports.len(), 1);
    assert!(reports[0].diagnostics.is_empty(), "diagnostics: {:?}", reports[0].diagnostics);
}

#[test]
fn nolint_directive_mutes_analyzers() {
    let api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(&dir, "20220318104614_base.sql", "CREATE TABLE t (a int);");
    api.write_migration(
        &dir,
        "20220318104615_drop.sql",
        "-- atlas:nolint\nDROP TABLE t;",
    );

    let reports = lint(&api, &dir, 1);
    assert!(reports[0].diagnostics.is_empty());
}

#[test]
fn diagnostics_point_at_the_offending_statement() {
    let api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(
        &dir,
        "20220318104614_base.sql",
        "CREATE TABLE t (a int);\nCREATE TABLE u (a int);",
    );
    let new_contents = "CREATE TABLE v (id int);\nDROP TABLE u;";
    api.write_migration(&dir, "20220318104615_new.sql", new_contents);

    let reports = lint(&api, &dir, 1);
    let diagnostic = &reports[0].diagnostics[0];
    assert_eq!(diagnostic.code, "DS102");
    // The position points at the offending statement, not the file start.
    assert_eq!(diagnostic.pos, new_contents.find("DROP TABLE").unwrap());
}
