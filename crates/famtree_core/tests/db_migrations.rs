use famtree_core::db::migrations::latest_version;
use famtree_core::db::{open_db, open_db_in_memory, share, DbError};
use famtree_core::{SqliteActivityRecorder, SqliteFamilyStore, StoreError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), 2);
    assert_eq!(schema_version(&conn), latest_version());
    for table in ["families", "family_members", "relationships", "activity_logs"] {
        assert_table_exists(&conn, table);
    }
    let foreign_keys: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(foreign_keys, 1);
}

#[test]
fn reopening_file_database_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("famtree.db");

    let first = open_db(&path).unwrap();
    assert_eq!(schema_version(&first), latest_version());
    drop(first);

    let second = open_db(&path).unwrap();
    assert_eq!(schema_version(&second), latest_version());
    assert_table_exists(&second, "relationships");
}

#[test]
fn newer_schema_version_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn adapters_refuse_unmigrated_connections() {
    let conn = share(Connection::open_in_memory().unwrap());

    assert!(matches!(
        SqliteFamilyStore::try_new(conn.clone()).unwrap_err(),
        StoreError::Db(DbError::UninitializedConnection {
            actual_version: 0,
            ..
        })
    ));
    assert!(SqliteActivityRecorder::try_new(conn).is_err());
}

#[test]
fn schema_rejects_child_rows_and_self_loops() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO families (id, owner_id, name, created_at, updated_at)
         VALUES ('f', 'o', 'F', 0, 0);
         INSERT INTO family_members
            (id, family_id, full_name, gender, date_of_birth, is_alive, created_at, updated_at)
         VALUES ('a', 'f', 'A', 'other', 0, 1, 0, 0),
                ('b', 'f', 'B', 'other', 0, 1, 0, 0);",
    )
    .unwrap();

    let insert = |from: &str, to: &str, kind: &str| {
        conn.execute(
            "INSERT INTO relationships
                (id, family_id, from_member_id, to_member_id, type, created_at, updated_at)
             VALUES (?1, 'f', ?2, ?3, ?4, 0, 0);",
            [format!("{from}-{to}-{kind}").as_str(), from, to, kind],
        )
    };
    assert!(insert("a", "b", "child").is_err());
    assert!(insert("a", "a", "parent").is_err());
    assert!(insert("a", "b", "parent").is_ok());
    assert!(insert("a", "b", "parent").is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
