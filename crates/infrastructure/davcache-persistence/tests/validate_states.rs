use camino::Utf8PathBuf;
use davcache_persistence::{DbState, RedbCatalog, StorageError, CURRENT_SCHEMA};
use redb::TableDefinition;

const META: TableDefinition<&str, &str> = TableDefinition::new("meta");

#[test]
fn validate_reports_missing_without_creating() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

    assert_eq!(RedbCatalog::validate(&root).unwrap(), DbState::Missing);
    assert!(!root.join("catalog.redb").exists());
}

#[test]
fn validate_reports_busy_when_database_is_locked() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let db_path = root.join("catalog.redb");

    let _lock = redb::Database::create(db_path.as_std_path()).unwrap();

    assert_eq!(RedbCatalog::validate(&root).unwrap(), DbState::Busy);
}

#[test]
fn newer_schema_is_reported_and_never_quarantined() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let db_path = root.join("catalog.redb");

    let db = redb::Database::create(db_path.as_std_path()).unwrap();
    let write_tx = db.begin_write().unwrap();
    {
        let mut meta = write_tx.open_table(META).unwrap();
        let schema_version = (CURRENT_SCHEMA + 1).to_string();
        meta.insert("format", "davcache-catalog").unwrap();
        meta.insert("schema_version", schema_version.as_str()).unwrap();
        meta.insert("created_at", "2020-01-01T00:00:00Z").unwrap();
    }
    write_tx.commit().unwrap();
    drop(db);

    assert_eq!(
        RedbCatalog::validate(&root).unwrap(),
        DbState::NewerSchema {
            found: CURRENT_SCHEMA + 1,
            supported: CURRENT_SCHEMA
        }
    );
    assert!(db_path.exists(), "newer schema should not be quarantined");

    match RedbCatalog::open(&root) {
        Err(StorageError::NewerSchema { found, .. }) => assert_eq!(found, CURRENT_SCHEMA + 1),
        other => panic!("expected NewerSchema, got {other:?}"),
    }
    assert!(db_path.exists());
}
