#![allow(dead_code)]

use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use resmir_core::destmap::DestinationMap;
use resmir_infra::Fetcher;
use resmir_pipeline::{Context, Settings, StateStore};
use std::sync::Arc;

pub async fn serve_static(body: String) -> impl IntoResponse {
    body
}

pub async fn serve_bytes(data: Vec<u8>) -> impl IntoResponse {
    data
}

/// Bind a loopback server first, then let the caller build routes that embed
/// the server's own base URL (sitemaps reference absolute URIs).
pub async fn start_server<F>(make_routes: F) -> (String, tokio::task::JoinHandle<()>)
where
    F: FnOnce(&str) -> Vec<(String, String)>,
{
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let mut app = Router::new();
    for (path, body) in make_routes(&base) {
        app = app.route(
            &path,
            get(move || {
                let body = body.clone();
                serve_static(body)
            }),
        );
    }
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (base, handle)
}

pub fn test_context(map_lines: &str, settings: Settings) -> Context {
    test_context_with_state(map_lines, settings, Arc::new(StateStore::in_memory()))
}

pub fn test_context_with_state(
    map_lines: &str,
    settings: Settings,
    state: Arc<StateStore>,
) -> Context {
    Context::new(
        settings,
        DestinationMap::from_lines(map_lines),
        Fetcher::new(),
        state,
    )
}

/// A resource list over `(relative uri, body)` pairs with md5 and length.
pub fn resource_list_xml(base: &str, at: &str, resources: &[(&str, &str)]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\"\n\
         \x20        xmlns:rs=\"http://www.openarchives.org/rs/terms/\">\n",
    );
    xml.push_str(&format!("  <rs:md capability=\"resourcelist\" at=\"{at}\"/>\n"));
    for (rel, body) in resources {
        let digest = resmir_infra::md5_bytes(body.as_bytes());
        xml.push_str(&format!(
            "  <url>\n    <loc>{base}{rel}</loc>\n    <lastmod>{at}</lastmod>\n    \
             <rs:md hash=\"md5:{digest}\" length=\"{}\"/>\n  </url>\n",
            body.len()
        ));
    }
    xml.push_str("</urlset>\n");
    xml
}

/// A change list over `(relative uri, change, datetime)` triples.
pub fn change_list_xml(base: &str, entries: &[(&str, &str, &str)]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\"\n\
         \x20        xmlns:rs=\"http://www.openarchives.org/rs/terms/\">\n\
         \x20 <rs:md capability=\"changelist\"/>\n",
    );
    for (rel, change, datetime) in entries {
        xml.push_str(&format!(
            "  <url>\n    <loc>{base}{rel}</loc>\n    <lastmod>{datetime}</lastmod>\n    \
             <rs:md change=\"{change}\"/>\n  </url>\n"
        ));
    }
    xml.push_str("</urlset>\n");
    xml
}
