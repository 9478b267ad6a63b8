mod common;

use camino::Utf8PathBuf;
use common::{resource_list_xml, start_server, test_context};
use resmir_core::Capability;
use resmir_infra::md5_file;
use resmir_pipeline::{ProcStatus, Processor, Settings, SourceWalk};

const AT: &str = "2013-01-03T09:00:00Z";

fn apply_settings() -> Settings {
    Settings {
        audit_only: false,
        ..Settings::default()
    }
}

async fn start_source() -> (String, tokio::task::JoinHandle<()>) {
    start_server(|base| {
        vec![
            (
                "/rs/resourcelist.xml".to_string(),
                resource_list_xml(
                    base,
                    AT,
                    &[("/rs/files/res1.txt", "payload one"), ("/rs/files/res2.txt", "two")],
                ),
            ),
            ("/rs/files/res1.txt".to_string(), "payload one".to_string()),
            ("/rs/files/res2.txt".to_string(), "two".to_string()),
        ]
    })
    .await
}

#[tokio::test]
async fn baseline_creates_the_mirror() {
    let (base, handle) = start_source().await;
    let dir = tempfile::tempdir().unwrap();
    let mirror = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

    let ctx = test_context(&format!("{base}/rs={mirror}\n"), apply_settings());
    let list_uri = format!("{base}/rs/resourcelist.xml");

    let outcome = SourceWalk::new(&ctx)
        .run(Processor::new(list_uri.clone(), Capability::ResourceList))
        .await;
    assert_eq!(outcome.status, ProcStatus::Processed);
    assert!(outcome.exceptions.is_empty());

    let res1 = mirror.join("files/res1.txt");
    let res2 = mirror.join("files/res2.txt");
    assert_eq!(std::fs::read_to_string(&res1).unwrap(), "payload one");
    assert_eq!(std::fs::read_to_string(&res2).unwrap(), "two");
    assert_eq!(
        md5_file(&res1).unwrap(),
        resmir_infra::md5_bytes(b"payload one")
    );

    let rows = ctx.reporter.snapshot();
    assert_eq!(rows.len(), 2);
    let audit = &rows[0];
    assert!(audit.audit);
    assert_eq!(audit.in_sync, Some(false));
    assert_eq!(audit.same, Some(0));
    assert_eq!(audit.created, 2);
    assert_eq!(audit.deleted, 0);
    let apply = &rows[1];
    assert!(!apply.audit);
    assert_eq!(apply.created, 2);
    assert_eq!(apply.updated, 0);
    assert_eq!(apply.deleted, 0);

    handle.abort();
}

#[tokio::test]
async fn baseline_rerun_is_idempotent() {
    let (base, handle) = start_source().await;
    let dir = tempfile::tempdir().unwrap();
    let mirror = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let map = format!("{base}/rs={mirror}\n");
    let list_uri = format!("{base}/rs/resourcelist.xml");

    let ctx = test_context(&map, apply_settings());
    SourceWalk::new(&ctx)
        .run(Processor::new(list_uri.clone(), Capability::ResourceList))
        .await;

    // Second cycle over an unchanged source: one audit row, nothing to do.
    let ctx = test_context(&map, apply_settings());
    let outcome = SourceWalk::new(&ctx)
        .run(Processor::new(list_uri, Capability::ResourceList))
        .await;
    assert_eq!(outcome.status, ProcStatus::Processed);

    let rows = ctx.reporter.snapshot();
    assert_eq!(rows.len(), 1);
    let audit = &rows[0];
    assert_eq!(audit.in_sync, Some(true));
    assert_eq!(audit.same, Some(2));
    assert_eq!(audit.created, 0);
    assert_eq!(audit.updated, 0);
    assert_eq!(audit.to_delete, 0);

    handle.abort();
}

#[tokio::test]
async fn audit_mode_counts_but_never_touches_files() {
    let (base, handle) = start_source().await;
    let dir = tempfile::tempdir().unwrap();
    let mirror = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

    // A stray local file that a baseline would delete.
    std::fs::create_dir_all(mirror.join("files")).unwrap();
    std::fs::write(mirror.join("files/stale.txt"), b"stale").unwrap();

    let ctx = test_context(
        &format!("{base}/rs={mirror}\n"),
        Settings::default(), // audit_only stays true
    );
    let outcome = SourceWalk::new(&ctx)
        .run(Processor::new(
            format!("{base}/rs/resourcelist.xml"),
            Capability::ResourceList,
        ))
        .await;
    assert_eq!(outcome.status, ProcStatus::Processed);

    // Counts recorded, bytes untouched.
    let rows = ctx.reporter.snapshot();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].created, 2);
    assert_eq!(rows[0].to_delete, 1);
    assert!(!mirror.join("files/res1.txt").exists());
    assert_eq!(
        std::fs::read_to_string(mirror.join("files/stale.txt")).unwrap(),
        "stale"
    );

    handle.abort();
}

#[tokio::test]
async fn baseline_removes_local_strays() {
    let (base, handle) = start_source().await;
    let dir = tempfile::tempdir().unwrap();
    let mirror = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    std::fs::create_dir_all(mirror.join("files")).unwrap();
    std::fs::write(mirror.join("files/stale.txt"), b"stale").unwrap();

    let ctx = test_context(&format!("{base}/rs={mirror}\n"), apply_settings());
    SourceWalk::new(&ctx)
        .run(Processor::new(
            format!("{base}/rs/resourcelist.xml"),
            Capability::ResourceList,
        ))
        .await;

    assert!(!mirror.join("files/stale.txt").exists());
    assert!(mirror.join("files/res1.txt").exists());
    let rows = ctx.reporter.snapshot();
    assert_eq!(rows[1].deleted, 1);
    assert_eq!(rows[1].to_delete, 1);

    handle.abort();
}

#[tokio::test]
async fn unmapped_list_reports_a_mapping_failure() {
    let (base, handle) = start_source().await;

    // Empty map, no host fallback: nothing to sync against.
    let ctx = test_context("", apply_settings());
    let outcome = SourceWalk::new(&ctx)
        .run(Processor::new(
            format!("{base}/rs/resourcelist.xml"),
            Capability::ResourceList,
        ))
        .await;
    assert_eq!(outcome.status, ProcStatus::ProcessedWithExceptions);

    let rows = ctx.reporter.snapshot();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].exception.as_deref().unwrap().contains("destination"));

    handle.abort();
}

#[tokio::test]
async fn resource_index_fans_out_to_member_lists() {
    let (base, handle) = start_server(|base| {
        let index = format!(
            "<?xml version=\"1.0\"?>\n\
             <sitemapindex xmlns:rs=\"http://www.openarchives.org/rs/terms/\">\n\
             \x20 <rs:md capability=\"resourcelist\" at=\"{AT}\"/>\n\
             \x20 <sitemap><loc>{base}/rs/list1.xml</loc>\
             <rs:md capability=\"resourcelist\"/></sitemap>\n\
             \x20 <sitemap><loc>{base}/rs/list2.xml</loc>\
             <rs:md capability=\"resourcelist\"/></sitemap>\n\
             </sitemapindex>\n"
        );
        vec![
            ("/rs/resourcelist-index.xml".to_string(), index),
            (
                "/rs/list1.xml".to_string(),
                resource_list_xml(base, AT, &[("/rs/files/a.txt", "alpha")]),
            ),
            (
                "/rs/list2.xml".to_string(),
                resource_list_xml(base, AT, &[("/rs/files/b.txt", "beta")]),
            ),
            ("/rs/files/a.txt".to_string(), "alpha".to_string()),
            ("/rs/files/b.txt".to_string(), "beta".to_string()),
        ]
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let mirror = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let ctx = test_context(&format!("{base}/rs={mirror}\n"), apply_settings());

    let outcome = SourceWalk::new(&ctx)
        .run(Processor::new(
            format!("{base}/rs/resourcelist-index.xml"),
            Capability::ResourceList,
        ))
        .await;
    assert_eq!(outcome.status, ProcStatus::Processed);
    assert_eq!(std::fs::read_to_string(mirror.join("files/a.txt")).unwrap(), "alpha");
    assert_eq!(std::fs::read_to_string(mirror.join("files/b.txt")).unwrap(), "beta");

    handle.abort();
}

#[tokio::test]
async fn wrong_capability_halts_the_branch() {
    let (base, handle) = start_server(|base| {
        vec![(
            "/rs/capabilitylist.xml".to_string(),
            resource_list_xml(base, AT, &[]),
        )]
    })
    .await;

    let ctx = test_context("", Settings::default());
    let outcome = SourceWalk::new(&ctx)
        .run(Processor::new(
            format!("{base}/rs/capabilitylist.xml"),
            Capability::CapabilityList,
        ))
        .await;
    assert_eq!(outcome.status, ProcStatus::ProcessedWithExceptions);
    assert!(outcome.exceptions[0].contains("expected capability capabilitylist"));

    handle.abort();
}
