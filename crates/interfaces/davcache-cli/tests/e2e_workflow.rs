use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{routing::get, Router};
use camino::Utf8PathBuf;
use davcache_cli::{commands, RemoteArgs};
use davcache_config::CacheSettings;
use davcache_offline::OfflineCache;
use tempfile::tempdir;

async fn start_mock_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let app = Router::new().route(
        "/dav/*path",
        get(|Path(path): Path<String>| async move {
            match path.trim_start_matches('/') {
                "VR/intro.mp4" => (
                    StatusCode::OK,
                    [("content-type", "video/mp4")],
                    b"0123456789".to_vec(),
                )
                    .into_response(),
                "VR/Photos/pano.jpg" => (StatusCode::OK, b"jpg!".to_vec()).into_response(),
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

fn remote(addr: SocketAddr) -> RemoteArgs {
    RemoteArgs {
        url: format!("http://{addr}/dav"),
        user: None,
        password: None,
        limit_mb: None,
        throttle: false,
    }
}

#[tokio::test]
async fn full_offline_lifecycle() {
    let (addr, server_handle) = start_mock_server().await;
    let work_dir = tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(work_dir.path().join("offline")).unwrap();
    let cache = Arc::new(OfflineCache::open(&root).unwrap());
    let store = Arc::new(remote(addr).build_store(&CacheSettings::default()).unwrap());

    // Phase 1: fetch two files into one collection
    let paths = commands::cmd_get(
        cache.clone(),
        store.clone(),
        "nas".into(),
        vec!["/VR/intro.mp4".into(), "/VR/Photos/pano.jpg".into()],
    )
    .await
    .expect("Phase 1 get failed");
    assert_eq!(paths.len(), 2);
    assert!(root.join("nas/VR/intro.mp4").exists());
    assert_eq!(commands::cmd_size(&cache).unwrap(), 14);

    // Phase 2: status reflects the cache
    let status = commands::cmd_status(
        &cache,
        "nas",
        vec!["/VR/intro.mp4".into(), "/VR/other.mp4".into()],
    );
    assert!(status[0].offline);
    assert!(!status[1].offline);

    // Phase 3: a missing remote file fails the command but keeps the rest
    let err = commands::cmd_get(
        cache.clone(),
        store.clone(),
        "nas".into(),
        vec!["/VR/missing.mp4".into()],
    )
    .await;
    assert!(err.is_err());
    assert_eq!(commands::cmd_list(&cache, Some("nas"), false).unwrap().len(), 2);

    // Phase 4: sabotage, then reconcile
    std::fs::remove_file(root.join("nas/VR/intro.mp4")).unwrap();
    assert_eq!(commands::cmd_reconcile(&cache).unwrap(), 1);

    // Phase 5: stray file gets swept
    std::fs::write(root.join("nas/VR/stray.tmp"), b"??").unwrap();
    assert_eq!(commands::cmd_sweep(&cache).unwrap(), 1);

    // Phase 6: rm by id, then purge
    let entries = commands::cmd_list(&cache, None, true).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(commands::cmd_rm(&cache, &entries[0].id.to_string()).unwrap());
    assert!(commands::cmd_rm(&cache, "not-a-uuid").is_err());

    commands::cmd_get(cache.clone(), store, "nas".into(), vec!["/VR/intro.mp4".into()])
        .await
        .unwrap();
    assert_eq!(commands::cmd_purge(&cache, None).unwrap(), 1);
    assert_eq!(commands::cmd_size(&cache).unwrap(), 0);
    assert!(root.join("catalog.redb").exists());

    server_handle.abort();
}

#[test]
fn build_store_takes_overrides_and_rejects_bad_urls() {
    let settings = CacheSettings {
        rate_limit_bytes: Some(1),
        ..Default::default()
    };
    let args = RemoteArgs {
        url: "https://nas.local/dav".into(),
        user: Some("me".into()),
        password: Some("secret".into()),
        limit_mb: Some(2),
        throttle: false,
    };
    let store = args.build_store(&settings).unwrap();
    assert_eq!(store.base_url().as_str(), "https://nas.local/dav/");

    let bad = RemoteArgs {
        url: "not a url".into(),
        ..args
    };
    assert!(bad.build_store(&settings).is_err());
}

#[tokio::test]
async fn interrupt_between_files_skips_the_rest() {
    let (addr, server_handle) = start_mock_server().await;
    let work_dir = tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(work_dir.path().join("offline")).unwrap();
    let cache = OfflineCache::open(&root).unwrap();
    let store = remote(addr).build_store(&CacheSettings::default()).unwrap();
    let interrupt = commands::Interrupt::default();

    let first = commands::get_files(&cache, &store, "nas", vec!["/VR/intro.mp4".into()], &interrupt)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);

    // Nothing is in flight, so only the flag carries the interrupt forward.
    interrupt.raise(&cache);
    let rest = commands::get_files(
        &cache,
        &store,
        "nas",
        vec!["/VR/Photos/pano.jpg".into()],
        &interrupt,
    )
    .await;
    assert!(rest.is_err());
    assert!(!root.join("nas/VR/Photos/pano.jpg").exists());
    assert!(interrupt.is_raised());
    assert_eq!(commands::cmd_size(&cache).unwrap(), 10);

    server_handle.abort();
}

#[test]
fn rate_limit_precedence_and_huge_values() {
    let settings = CacheSettings {
        rate_limit_bytes: Some(4096),
        ..Default::default()
    };
    let mut args = RemoteArgs {
        url: "https://nas.local/dav".into(),
        user: None,
        password: None,
        limit_mb: None,
        throttle: false,
    };
    assert_eq!(args.rate_limit(&settings), Some(4096));

    args.limit_mb = Some(3);
    assert_eq!(args.rate_limit(&settings), Some(3 * 1024 * 1024));

    args.limit_mb = Some(u64::MAX);
    assert_eq!(args.rate_limit(&settings), Some(u64::MAX));
    assert!(args.build_store(&settings).is_ok());

    args.limit_mb = None;
    args.throttle = true;
    assert_eq!(
        args.rate_limit(&settings),
        Some(davcache_config::DEFAULT_SPEED_LIMIT_BYTES)
    );
}
