use resmir_core::Capability;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::Context;

/// Folder beneath a destination where received sitemaps are archived.
pub const SITEMAP_FOLDER: &str = "sitemaps";

/// Observer for every successfully read and verified sitemap.
pub trait SitemapListener: Send + Sync {
    fn sitemap_received(&self, ctx: &Context, uri: &str, capability: Capability, text: &str);
}

/// Observer for every manifest recovered from a packaged dump.
pub trait DumpListener: Send + Sync {
    fn manifest_received(&self, ctx: &Context, dump_uri: &str, capability: Capability, manifest: &str);
}

/// Archives each received sitemap beneath the mapped destination, under a
/// `sitemaps/` infix so archived documents never mix with mirrored content.
pub struct SitemapWriter;

impl SitemapListener for SitemapWriter {
    fn sitemap_received(&self, ctx: &Context, uri: &str, _capability: Capability, text: &str) {
        let resolved = ctx.destmap.find_local_path(
            uri,
            None,
            ctx.settings.use_netloc,
            SITEMAP_FOLDER,
        );
        let Some(local_path) = resolved.local_path else {
            warn!(uri, "could not archive sitemap, no local path");
            return;
        };
        if let Some(parent) = local_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(uri, %parent, error = %e, "could not create sitemap archive folder");
                return;
            }
        }
        match std::fs::write(&local_path, text) {
            Ok(()) => debug!(uri, %local_path, "archived sitemap"),
            Err(e) => warn!(uri, %local_path, error = %e, "could not archive sitemap"),
        }
    }
}

/// Archives dump manifests next to the archived sitemaps, named after the
/// packaged artifact with a `.manifest.xml` suffix.
pub struct ManifestWriter;

impl DumpListener for ManifestWriter {
    fn manifest_received(&self, ctx: &Context, dump_uri: &str, _capability: Capability, manifest: &str) {
        let resolved = ctx.destmap.find_local_path(
            dump_uri,
            None,
            ctx.settings.use_netloc,
            SITEMAP_FOLDER,
        );
        let Some(base) = resolved.local_path else {
            warn!(dump_uri, "could not archive dump manifest, no local path");
            return;
        };
        let local_path = camino::Utf8PathBuf::from(format!("{base}.manifest.xml"));
        if let Some(parent) = local_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(dump_uri, %parent, error = %e, "could not create archive folder");
                return;
            }
        }
        match std::fs::write(&local_path, manifest) {
            Ok(()) => debug!(dump_uri, %local_path, "archived dump manifest"),
            Err(e) => warn!(dump_uri, %local_path, error = %e, "could not archive dump manifest"),
        }
    }
}

/// Static listener registry: configuration names map to prebuilt values, no
/// runtime code loading. Unknown names are configuration errors.
pub fn sitemap_listeners_from(names: &[String]) -> Result<Vec<Arc<dyn SitemapListener>>, String> {
    names
        .iter()
        .map(|name| match name.as_str() {
            "sitemap_writer" => Ok(Arc::new(SitemapWriter) as Arc<dyn SitemapListener>),
            other => Err(format!("unknown processor listener '{other}'")),
        })
        .collect()
}

pub fn dump_listeners_from(names: &[String]) -> Result<Vec<Arc<dyn DumpListener>>, String> {
    names
        .iter()
        .map(|name| match name.as_str() {
            "manifest_writer" => Ok(Arc::new(ManifestWriter) as Arc<dyn DumpListener>),
            other => Err(format!("unknown dump listener '{other}'")),
        })
        .collect()
}
