mod common;

use axum::routing::get;
use axum::Router;
use camino::Utf8PathBuf;
use common::{change_list_xml, resource_list_xml, start_server, test_context, test_context_with_state};
use resmir_core::timeutil::parse_w3c_datetime;
use resmir_core::Capability;
use resmir_pipeline::{ProcStatus, Processor, Settings, SourceWalk, StateStore};
use std::sync::{Arc, Mutex};

const T1: &str = "2013-01-03T09:00:00Z";
const T2: &str = "2013-01-05T12:00:00Z";

fn apply_settings() -> Settings {
    Settings {
        audit_only: false,
        ..Settings::default()
    }
}

/// A source whose res1 body can be swapped between phases of a test.
async fn start_mutable_source(
    res1: Arc<Mutex<String>>,
) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let list_body = resource_list_xml(
        &base,
        T1,
        &[("/rs/files/res1.txt", "version one"), ("/rs/files/res2.txt", "stable")],
    );
    let change_body = change_list_xml(&base, &[("/rs/files/res1.txt", "updated", T2)]);

    let res1_route = res1.clone();
    let app = Router::new()
        .route(
            "/rs/resourcelist.xml",
            get(move || {
                let body = list_body.clone();
                common::serve_static(body)
            }),
        )
        .route(
            "/rs/changelist.xml",
            get(move || {
                let body = change_body.clone();
                common::serve_static(body)
            }),
        )
        .route(
            "/rs/files/res1.txt",
            get(move || {
                let body = res1_route.lock().unwrap().clone();
                common::serve_static(body)
            }),
        )
        .route(
            "/rs/files/res2.txt",
            get(|| common::serve_static("stable".to_string())),
        );

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (base, handle)
}

#[tokio::test]
async fn incremental_update_replaces_only_the_named_file() {
    let res1 = Arc::new(Mutex::new("version one".to_string()));
    let (base, handle) = start_mutable_source(res1.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let mirror = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let map = format!("{base}/rs={mirror}\n");
    let state = Arc::new(StateStore::in_memory());

    // Baseline first, then the source publishes an update.
    let ctx = test_context_with_state(&map, apply_settings(), state.clone());
    SourceWalk::new(&ctx)
        .run(Processor::new(
            format!("{base}/rs/resourcelist.xml"),
            Capability::ResourceList,
        ))
        .await;
    assert_eq!(
        std::fs::read_to_string(mirror.join("files/res1.txt")).unwrap(),
        "version one"
    );
    let res2_mtime = std::fs::metadata(mirror.join("files/res2.txt"))
        .unwrap()
        .modified()
        .unwrap();

    *res1.lock().unwrap() = "version two".to_string();

    let change_uri = format!("{base}/rs/changelist.xml");
    let ctx = test_context_with_state(&map, apply_settings(), state.clone());
    let outcome = SourceWalk::new(&ctx)
        .run(Processor::new(change_uri.clone(), Capability::ChangeList))
        .await;
    assert_eq!(outcome.status, ProcStatus::Processed);

    assert_eq!(
        std::fs::read_to_string(mirror.join("files/res1.txt")).unwrap(),
        "version two"
    );
    // The untouched neighbor keeps its bytes and mtime.
    assert_eq!(
        std::fs::read_to_string(mirror.join("files/res2.txt")).unwrap(),
        "stable"
    );
    assert_eq!(
        std::fs::metadata(mirror.join("files/res2.txt"))
            .unwrap()
            .modified()
            .unwrap(),
        res2_mtime
    );

    // State for the change list advanced to at least the entry instant.
    let advanced = state.get(&change_uri).unwrap();
    assert!(advanced >= parse_w3c_datetime(T2).unwrap());

    let rows = ctx.reporter.snapshot();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].incremental);
    assert_eq!(rows[0].updated, 1);
    assert_eq!(rows[0].in_sync, Some(false));

    handle.abort();
}

#[tokio::test]
async fn incremental_skips_changes_at_or_before_last_synced() {
    let res1 = Arc::new(Mutex::new("version one".to_string()));
    let (base, handle) = start_mutable_source(res1).await;
    let dir = tempfile::tempdir().unwrap();
    let mirror = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let change_uri = format!("{base}/rs/changelist.xml");

    let state = Arc::new(StateStore::in_memory());
    state.advance(&change_uri, parse_w3c_datetime(T2).unwrap());

    let ctx = test_context_with_state(
        &format!("{base}/rs={mirror}\n"),
        apply_settings(),
        state.clone(),
    );
    let outcome = SourceWalk::new(&ctx)
        .run(Processor::new(change_uri, Capability::ChangeList))
        .await;
    assert_eq!(outcome.status, ProcStatus::Processed);

    // The single entry is dated exactly at the stored state: nothing to do.
    assert!(!mirror.join("files/res1.txt").exists());
    let rows = ctx.reporter.snapshot();
    assert_eq!(rows[0].in_sync, Some(true));
    assert_eq!(rows[0].updated, 0);

    handle.abort();
}

async fn start_delete_source(
) -> (String, tokio::task::JoinHandle<()>, Utf8PathBuf, tempfile::TempDir) {
    let (base, handle) = start_server(|base| {
        vec![(
            "/rs/changelist.xml".to_string(),
            change_list_xml(base, &[("/rs/files/res1.txt", "deleted", T2)]),
        )]
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let mirror = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    std::fs::create_dir_all(mirror.join("files")).unwrap();
    std::fs::write(mirror.join("files/res1.txt"), b"doomed").unwrap();
    (base, handle, mirror, dir)
}

#[tokio::test]
async fn incremental_delete_removes_the_file() {
    let (base, handle, mirror, _dir) = start_delete_source().await;
    let ctx = test_context(&format!("{base}/rs={mirror}\n"), apply_settings());

    let outcome = SourceWalk::new(&ctx)
        .run(Processor::new(
            format!("{base}/rs/changelist.xml"),
            Capability::ChangeList,
        ))
        .await;
    assert_eq!(outcome.status, ProcStatus::Processed);

    assert!(!mirror.join("files/res1.txt").exists());
    let rows = ctx.reporter.snapshot();
    assert_eq!(rows[0].deleted, 1);
    assert_eq!(rows[0].to_delete, 1);

    handle.abort();
}

#[tokio::test]
async fn incremental_delete_in_audit_mode_only_counts() {
    let (base, handle, mirror, _dir) = start_delete_source().await;
    let ctx = test_context(&format!("{base}/rs={mirror}\n"), Settings::default());

    SourceWalk::new(&ctx)
        .run(Processor::new(
            format!("{base}/rs/changelist.xml"),
            Capability::ChangeList,
        ))
        .await;

    assert_eq!(
        std::fs::read_to_string(mirror.join("files/res1.txt")).unwrap(),
        "doomed"
    );
    let rows = ctx.reporter.snapshot();
    assert_eq!(rows[0].deleted, 0);
    assert_eq!(rows[0].to_delete, 1);
    assert!(rows[0].audit);

    handle.abort();
}

#[tokio::test]
async fn deleting_an_absent_file_is_not_an_error() {
    let (base, handle) = start_server(|base| {
        vec![(
            "/rs/changelist.xml".to_string(),
            change_list_xml(base, &[("/rs/files/ghost.txt", "deleted", T2)]),
        )]
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let mirror = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

    let ctx = test_context(&format!("{base}/rs={mirror}\n"), apply_settings());
    let outcome = SourceWalk::new(&ctx)
        .run(Processor::new(
            format!("{base}/rs/changelist.xml"),
            Capability::ChangeList,
        ))
        .await;
    assert_eq!(outcome.status, ProcStatus::Processed);
    let rows = ctx.reporter.snapshot();
    assert_eq!(rows[0].deleted, 0);
    assert_eq!(rows[0].to_delete, 1);

    handle.abort();
}

#[tokio::test]
async fn duplicate_entries_download_once_per_cycle() {
    let (base, handle) = start_server(|base| {
        vec![
            (
                "/rs/changelist.xml".to_string(),
                change_list_xml(
                    base,
                    &[
                        ("/rs/files/res2.txt", "created", T2),
                        ("/rs/files/res2.txt", "created", T2),
                    ],
                ),
            ),
            ("/rs/files/res2.txt".to_string(), "stable".to_string()),
        ]
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let mirror = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

    let ctx = test_context(&format!("{base}/rs={mirror}\n"), apply_settings());
    SourceWalk::new(&ctx)
        .run(Processor::new(
            format!("{base}/rs/changelist.xml"),
            Capability::ChangeList,
        ))
        .await;

    let rows = ctx.reporter.snapshot();
    assert_eq!(rows[0].created, 1);
    assert_eq!(
        std::fs::read_to_string(mirror.join("files/res2.txt")).unwrap(),
        "stable"
    );

    handle.abort();
}
