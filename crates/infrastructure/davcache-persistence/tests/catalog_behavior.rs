use camino::Utf8PathBuf;
use davcache_core::CacheEntry;
use davcache_persistence::{CacheCatalog, RedbCatalog, StorageErrorKind};

fn open_temp() -> (tempfile::TempDir, Utf8PathBuf, RedbCatalog) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let catalog = RedbCatalog::open(&root).unwrap();
    (dir, root, catalog)
}

fn entry(root: &Utf8PathBuf, collection: &str, remote: &str, size: u64) -> CacheEntry {
    let local = root.join(collection).join(remote.trim_start_matches('/'));
    CacheEntry::new(collection, remote, local, size, "video/mp4")
}

#[test]
fn insert_then_lookup_by_path_and_id() {
    let (_dir, root, catalog) = open_temp();
    let e = entry(&root, "col1", "/movies/a.mp4", 10);
    catalog.insert(&e).unwrap();

    assert_eq!(
        catalog.get_by_path("col1", "/movies/a.mp4").unwrap().as_ref(),
        Some(&e)
    );
    // Lookups canonicalize the same way inserts do.
    assert_eq!(
        catalog.get_by_path("col1", "movies//a.mp4").unwrap().map(|x| x.id),
        Some(e.id)
    );
    assert_eq!(catalog.get_by_id(&e.id).unwrap(), Some(e));
    assert_eq!(catalog.get_by_path("col2", "/movies/a.mp4").unwrap(), None);
}

#[test]
fn insert_for_same_path_replaces_and_drops_old_id() {
    let (_dir, root, catalog) = open_temp();
    let first = entry(&root, "col1", "/a.mp4", 10);
    let second = entry(&root, "col1", "/a.mp4", 20);
    catalog.insert(&first).unwrap();
    catalog.insert(&second).unwrap();

    let all = catalog.list_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, second.id);
    assert_eq!(catalog.get_by_id(&first.id).unwrap(), None);
    assert!(!catalog.delete_by_id(&first.id).unwrap());
}

#[test]
fn delete_by_id_removes_row() {
    let (_dir, root, catalog) = open_temp();
    let e = entry(&root, "col1", "/a.mp4", 10);
    catalog.insert(&e).unwrap();

    assert!(catalog.delete_by_id(&e.id).unwrap());
    assert!(!catalog.delete_by_id(&e.id).unwrap());
    assert_eq!(catalog.get_by_path("col1", "/a.mp4").unwrap(), None);
    assert!(catalog.is_empty().unwrap());
}

#[test]
fn delete_collection_only_removes_that_collections_entries() {
    let (_dir, root, catalog) = open_temp();
    catalog.insert(&entry(&root, "col", "/a1.jpg", 1)).unwrap();
    catalog.insert(&entry(&root, "col", "/sub/a2.jpg", 2)).unwrap();
    let keep = entry(&root, "col2", "/b.jpg", 3);
    catalog.insert(&keep).unwrap();

    assert_eq!(catalog.delete_by_collection("col").unwrap(), 2);

    assert!(catalog.list_by_collection("col").unwrap().is_empty());
    assert_eq!(catalog.list_by_collection("col2").unwrap(), vec![keep.clone()]);
    assert_eq!(catalog.get_by_id(&keep.id).unwrap(), Some(keep));
}

#[test]
fn delete_all_clears_every_collection() {
    let (_dir, root, catalog) = open_temp();
    catalog.insert(&entry(&root, "a", "/1", 1)).unwrap();
    catalog.insert(&entry(&root, "b", "/2", 2)).unwrap();

    assert_eq!(catalog.delete_all().unwrap(), 2);
    assert_eq!(catalog.len().unwrap(), 0);
}

#[test]
fn rows_survive_reopen() {
    let (_dir, root, catalog) = open_temp();
    let e = entry(&root, "col1", "/persist.bin", 42);
    catalog.insert(&e).unwrap();
    drop(catalog);

    let reopened = RedbCatalog::open(&root).unwrap();
    assert_eq!(reopened.list_all().unwrap(), vec![e]);
}

#[test]
fn invalid_paths_are_rejected() {
    let (_dir, root, catalog) = open_temp();
    let bad = entry(&root, "col1", "/../escape", 1);
    let err = catalog.insert(&bad).unwrap_err();
    assert_eq!(err.kind(), StorageErrorKind::InvalidPath);

    let err = catalog.list_by_collection("a/b").unwrap_err();
    assert_eq!(err.kind(), StorageErrorKind::InvalidPath);

    let err = catalog.get_by_path("catalog.redb", "/x.bin").unwrap_err();
    assert_eq!(err.kind(), StorageErrorKind::InvalidPath);
}

#[test]
fn concurrent_inserts_from_many_threads_all_land() {
    let (_dir, root, catalog) = open_temp();
    let threads = 8;
    let barrier = std::sync::Barrier::new(threads);

    std::thread::scope(|s| {
        for i in 0..threads {
            let barrier = &barrier;
            let root = &root;
            s.spawn(move || {
                let catalog = RedbCatalog::open(root).unwrap();
                barrier.wait();
                catalog
                    .insert(&entry(root, &format!("c{i}"), "/file.bin", 1))
                    .unwrap();
            });
        }
    });

    assert_eq!(catalog.list_all().unwrap().len(), threads);
}
