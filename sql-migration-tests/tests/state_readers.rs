use indoc::indoc;
use sql_migration_tests::test_api::*;
use std::time::Duration;

use schema_connector::{DiffOptions, SchemaConnector as _};
use schema_core::StateSource;

fn read(source: &StateSource, api: &TestApi) -> sql_realm::Realm {
    let mut dev = api.dev_connector();
    tok(schema_core::read_realm(
        source,
        Some(&mut dev),
        Duration::from_secs(5),
    ))
    .unwrap()
}

#[test]
fn hcl_and_sql_states_describing_the_same_schema_diff_to_nothing() {
    let api = TestApi::new();
    let files = TempDir::new().unwrap();

    let hcl_path = files.path().join("schema.hcl");
    std::fs::write(
        &hcl_path,
        indoc! {r#"
            table "users" {
              column "id" { type = int }
              column "name" {
                type = varchar(100)
                null = true
              }
              primary_key { columns = [column.id] }
            }
        "#},
    )
    .unwrap();

    let sql_path = files.path().join("schema.sql");
    std::fs::write(
        &sql_path,
        "CREATE TABLE `users` (\n  `id` int NOT NULL,\n  `name` varchar(100) NULL,\n  PRIMARY KEY (`id`)\n);\n",
    )
    .unwrap();

    let from_hcl = read(&StateSource::HclFiles(vec![hcl_path]), &api);
    let from_sql = read(&StateSource::SqlFiles(vec![sql_path]), &api);

    let connector = api.dev_connector();
    let migration = connector.diff(from_hcl, from_sql, &DiffOptions::default()).unwrap();
    assert!(migration.is_empty(), "unexpected changes: {:?}", migration.changes);
}

#[test]
fn a_migration_directory_source_replays_up_to_the_requested_version() {
    let api = TestApi::new();
    let tmp = api.create_migrations_directory();
    let dir = api.dir(&tmp);

    api.write_migration(&dir, "20220318104614_initial.sql", "CREATE TABLE a (id int);");
    api.write_migration(&dir, "20220318104615_second.sql", "CREATE TABLE b (id int);");

    let full = read(
        &StateSource::MigrationDir {
            path: tmp.path().to_owned(),
            to_version: None,
        },
        &api,
    );
    assert!(full.find_table("main", "a").is_some());
    assert!(full.find_table("main", "b").is_some());

    let bounded = read(
        &StateSource::MigrationDir {
            path: tmp.path().to_owned(),
            to_version: Some("20220318104614".into()),
        },
        &api,
    );
    assert!(bounded.find_table("main", "a").is_some());
    assert!(bounded.find_table("main", "b").is_none());
}
