use camino::{Utf8Path, Utf8PathBuf};
use resmir_core::compare::partition;
use resmir_core::formats::parse_sitemap;
use resmir_core::uri_utils::UriPath;
use resmir_core::{Capability, SitemapDoc};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::ProcError;
use crate::report::SyncStatus;
use crate::sync::{enumerate_local, stamp_lastmod};

pub(crate) const ORIGIN_DUMP: &str = "dump::unpack";

/// Name of the manifest sitemap inside every packaged dump.
const MANIFEST_NAME: &str = "manifest.xml";

/// Process a (non-index) resource dump document: gate on the stored sync
/// state, then unpack every packaged entry. A fully clean pass advances the
/// state to the document's `at` instant.
pub async fn process_dump(ctx: &Context, dump_uri: &str, doc: &SitemapDoc) -> Vec<ProcError> {
    let mut errors = Vec::new();

    if let (Some(md_at), Some(last)) = (doc.md_at, ctx.state.get(dump_uri)) {
        if md_at <= last {
            info!(uri = dump_uri, %md_at, "dump unchanged since last sync");
            let mut row = SyncStatus::new(dump_uri, ORIGIN_DUMP);
            row.in_sync = Some(true);
            ctx.reporter.log(row);
            return errors;
        }
    }

    for entry in &doc.resources {
        if ctx.stop_requested() {
            break;
        }
        let pack_uri = entry.link("contents").unwrap_or(entry.uri.as_str());
        match unpack_one(ctx, pack_uri).await {
            Ok(()) => {}
            Err(e) => {
                ctx.reporter
                    .log_exception(pack_uri, ORIGIN_DUMP, &e.to_string());
                errors.push(e);
            }
        }
    }

    if errors.is_empty() && !ctx.settings.audit_only {
        if let Some(md_at) = doc.md_at {
            ctx.state.advance(dump_uri, md_at);
        }
    }
    errors
}

/// Download one packaged dump, extract it, parse its manifest, and reconcile
/// the destination tree against the manifest. Temp artifacts are cleaned up
/// on every path (guard objects own them).
async fn unpack_one(ctx: &Context, pack_uri: &str) -> Result<(), ProcError> {
    let archive = tempfile::Builder::new()
        .prefix("resmir_")
        .suffix(".zip")
        .tempfile()
        .map_err(|e| ProcError::Apply {
            uri: pack_uri.to_string(),
            reason: format!("cannot create temp file: {e}"),
        })?;
    let archive_path = utf8_path(archive.path(), pack_uri)?;
    debug!(uri = pack_uri, path = %archive_path, "downloading packaged dump");
    ctx.fetcher.download(pack_uri, &archive_path).await?;

    let workdir = tempfile::Builder::new()
        .prefix("resmir_")
        .tempdir()
        .map_err(|e| ProcError::Apply {
            uri: pack_uri.to_string(),
            reason: format!("cannot create temp dir: {e}"),
        })?;
    let workdir_path = utf8_path(workdir.path(), pack_uri)?;
    resmir_infra::extract_zip(&archive_path, &workdir_path).map_err(|source| {
        ProcError::Unpack {
            uri: pack_uri.to_string(),
            source,
        }
    })?;

    let manifest_xml = std::fs::read_to_string(workdir_path.join(MANIFEST_NAME)).map_err(|e| {
        ProcError::Apply {
            uri: pack_uri.to_string(),
            reason: format!("dump has no readable {MANIFEST_NAME}: {e}"),
        }
    })?;
    let manifest = parse_sitemap(&manifest_xml)?;
    match manifest.capability {
        Capability::ResourceDumpManifest => {}
        Capability::ChangeDumpManifest => {
            warn!(uri = pack_uri, "changedump manifest accepted but not processed");
            return Ok(());
        }
        found => {
            return Err(ProcError::WrongCapability {
                uri: pack_uri.to_string(),
                expected: Capability::ResourceDumpManifest,
                found,
            });
        }
    }
    ctx.notify_manifest(pack_uri, manifest.capability, &manifest_xml);

    reconcile(ctx, pack_uri, &manifest, &workdir_path)
}

/// Compare the manifest against the destination tree and copy members out of
/// the extracted archive (or delete strays), honoring audit-only mode.
fn reconcile(
    ctx: &Context,
    pack_uri: &str,
    manifest: &SitemapDoc,
    workdir: &Utf8Path,
) -> Result<(), ProcError> {
    let settings = &ctx.settings;
    let resolved = ctx
        .destmap
        .find_destination(pack_uri, None, settings.use_netloc, "");
    let Some(dest) = resolved.destination else {
        return Err(ProcError::Mapping(pack_uri.to_string()));
    };
    let map_base = UriPath::parent(pack_uri).unwrap_or(resolved.base_uri);

    let mut remote = Vec::new();
    let mut members = std::collections::HashMap::new();
    for entry in &manifest.resources {
        let Some(suffix) = UriPath::suffix_after(&entry.uri, &map_base) else {
            warn!(uri = %entry.uri, %map_base, "manifest entry not mappable, skipping");
            continue;
        };
        let Some(segments) = UriPath::decode_segments(suffix) else {
            continue;
        };
        let rel_path = segments.join("/");
        let member = entry
            .path
            .as_deref()
            .unwrap_or(suffix)
            .trim_start_matches('/')
            .to_string();
        members.insert(rel_path.clone(), (member, entry.lastmod));
        remote.push(resmir_core::compare::RemoteItem {
            uri: entry.uri.clone(),
            rel_path,
            length: entry.length,
            digest: entry.hash.clone(),
            lastmod: entry.lastmod,
        });
    }

    let local = enumerate_local(&dest).map_err(|e| ProcError::Apply {
        uri: pack_uri.to_string(),
        reason: format!("cannot enumerate {dest}: {e}"),
    })?;
    let part = partition(remote, local, settings.use_checksum);

    let mut row = SyncStatus::new(pack_uri, ORIGIN_DUMP);
    row.audit = settings.audit_only;
    row.in_sync = Some(part.is_clean());
    row.same = Some(part.same.len() as u64);
    row.to_delete = part.deleted.len() as u64;

    if settings.audit_only {
        row.created = part.created.len() as u64;
        row.updated = part.updated.len() as u64;
        ctx.reporter.log(row);
        return Ok(());
    }

    for item in &part.same {
        ctx.claim(&item.uri);
    }

    let mut first_error: Option<ProcError> = None;
    for (is_create, item) in part
        .created
        .into_iter()
        .map(|i| (true, i))
        .chain(part.updated.into_iter().map(|i| (false, i)))
    {
        if !ctx.claim(&item.uri) {
            debug!(uri = %item.uri, "already handled this cycle, skipping");
            continue;
        }
        let Some((member, lastmod)) = members.get(&item.rel_path) else {
            continue;
        };
        let source = workdir.join(member);
        let target = dest.join(&item.rel_path);
        match install_member(&source, &target) {
            Ok(()) => {
                stamp_lastmod(&target, *lastmod);
                if is_create {
                    row.created += 1;
                } else {
                    row.updated += 1;
                }
            }
            Err(e) => {
                let err = ProcError::Apply {
                    uri: item.uri.clone(),
                    reason: format!("cannot install {member}: {e}"),
                };
                first_error.get_or_insert(err);
            }
        }
    }

    for stale in &part.deleted {
        let stale_uri = format!("{map_base}/{}", stale.rel_path);
        if ctx.is_handled(&stale_uri) {
            debug!(uri = %stale_uri, "owned by a sibling list, not deleting");
            continue;
        }
        let path = dest.join(&stale.rel_path);
        if let Err(e) = std::fs::remove_file(&path) {
            let err = ProcError::Apply {
                uri: pack_uri.to_string(),
                reason: format!("cannot delete {path}: {e}"),
            };
            first_error.get_or_insert(err);
        } else {
            row.deleted += 1;
        }
    }

    if let Some(err) = first_error {
        row.exception = Some(err.to_string());
        ctx.reporter.log(row);
        return Err(err);
    }
    info!(
        uri = pack_uri,
        created = row.created,
        updated = row.updated,
        deleted = row.deleted,
        "dump reconciled"
    );
    ctx.reporter.log(row);
    Ok(())
}

/// Copy an extracted member into place via a temp sibling and atomic rename.
fn install_member(source: &Utf8Path, target: &Utf8Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let part = Utf8PathBuf::from(format!("{target}.part"));
    if let Err(e) = std::fs::copy(source, &part) {
        let _ = std::fs::remove_file(&part);
        return Err(e);
    }
    std::fs::rename(&part, target)
}

fn utf8_path(path: &std::path::Path, uri: &str) -> Result<Utf8PathBuf, ProcError> {
    Utf8Path::from_path(path)
        .map(Utf8Path::to_owned)
        .ok_or_else(|| ProcError::Apply {
            uri: uri.to_string(),
            reason: format!("temp path is not utf-8: {}", path.display()),
        })
}
