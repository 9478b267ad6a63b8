use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use filetime::FileTime;
use futures::StreamExt;
use rayon::prelude::*;
use resmir_core::compare::{partition, LocalItem, RemoteItem};
use resmir_core::uri_utils::UriPath;
use resmir_core::{ChangeKind, ResourceEntry, SitemapDoc};
use resmir_infra::hashing::md5_file;
use resmir_infra::Fetcher;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::context::Context;
use crate::error::ProcError;
use crate::listener::SITEMAP_FOLDER;
use crate::report::SyncStatus;

pub(crate) const ORIGIN_BASELINE: &str = "sync::baseline";
pub(crate) const ORIGIN_INCREMENTAL: &str = "sync::incremental";

const NO_DESTINATION: &str = "No destination specified and use of net location prohibited.";

/// Translates one remote list into local file operations. Baseline mode
/// reconciles the whole tree against a resource list; incremental mode
/// replays a change list since the last synced instant.
pub struct Syncer<'a> {
    ctx: &'a Context,
}

impl<'a> Syncer<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Full reconciliation against a resource list. Always records an audit
    /// row; applies changes (and records an apply row) unless the context is
    /// audit-only. Returns the branch's accumulated errors.
    pub async fn baseline(&self, sitemap_uri: &str, doc: &SitemapDoc) -> Vec<ProcError> {
        let mut errors = Vec::new();
        let settings = &self.ctx.settings;

        let Some((dest, map_base)) = self.resolve(sitemap_uri, ORIGIN_BASELINE, &mut errors)
        else {
            return errors;
        };

        let remote = collect_remote(&doc.resources, &map_base, &mut errors);

        let mut local = match enumerate_local(&dest) {
            Ok(items) => items,
            Err(e) => {
                let err = ProcError::Apply {
                    uri: sitemap_uri.to_string(),
                    reason: format!("cannot enumerate {dest}: {e}"),
                };
                self.ctx
                    .reporter
                    .log_exception(sitemap_uri, ORIGIN_BASELINE, &err.to_string());
                errors.push(err);
                return errors;
            }
        };

        if settings.use_checksum && remote.iter().any(|r| r.digest.is_some()) {
            hash_local(&dest, &mut local);
        }

        let part = partition(remote, local, settings.use_checksum);
        let clean = part.is_clean();

        let mut audit_row = SyncStatus::new(sitemap_uri, ORIGIN_BASELINE);
        audit_row.audit = true;
        audit_row.in_sync = Some(clean && errors.is_empty());
        audit_row.same = Some(part.same.len() as u64);
        audit_row.created = part.created.len() as u64;
        audit_row.updated = part.updated.len() as u64;
        audit_row.to_delete = part.deleted.len() as u64;
        self.ctx.reporter.log(audit_row);

        if settings.audit_only {
            debug!(uri = sitemap_uri, "audit only, not touching files");
            return errors;
        }

        // Everything this list accounts for is covered for the rest of the
        // cycle, matched files included.
        for item in &part.same {
            self.ctx.claim(&item.uri);
        }

        if !clean {
            let mut apply_row = SyncStatus::new(sitemap_uri, ORIGIN_BASELINE);
            apply_row.to_delete = part.deleted.len() as u64;

            let mut work = Vec::new();
            for item in part.created {
                if self.ctx.claim(&item.uri) {
                    work.push((true, item));
                } else {
                    debug!(uri = %item.uri, "already handled this cycle, skipping");
                }
            }
            for item in part.updated {
                if self.ctx.claim(&item.uri) {
                    work.push((false, item));
                } else {
                    debug!(uri = %item.uri, "already handled this cycle, skipping");
                }
            }

            let fetcher = &self.ctx.fetcher;
            let results: Vec<(bool, Result<(), ProcError>)> = futures::stream::iter(work)
                .map(|(is_create, item)| {
                    let dest = dest.clone();
                    async move {
                        let result = fetch_resource(fetcher, &dest, &item).await;
                        (is_create, result)
                    }
                })
                .buffer_unordered(settings.download_threads.max(1))
                .collect()
                .await;

            for (is_create, result) in results {
                match result {
                    Ok(()) if is_create => apply_row.created += 1,
                    Ok(()) => apply_row.updated += 1,
                    Err(e) => errors.push(e),
                }
            }

            for stale in &part.deleted {
                let stale_uri = format!("{map_base}/{}", stale.rel_path);
                if self.ctx.is_handled(&stale_uri) {
                    debug!(uri = %stale_uri, "owned by a sibling list, not deleting");
                    continue;
                }
                let path = dest.join(&stale.rel_path);
                match std::fs::remove_file(&path) {
                    Ok(()) => apply_row.deleted += 1,
                    Err(e) => errors.push(ProcError::Apply {
                        uri: sitemap_uri.to_string(),
                        reason: format!("cannot delete {path}: {e}"),
                    }),
                }
            }

            if let Some(first) = errors.first() {
                apply_row.exception = Some(first.to_string());
            }
            info!(
                uri = sitemap_uri,
                created = apply_row.created,
                updated = apply_row.updated,
                deleted = apply_row.deleted,
                "baseline applied"
            );
            self.ctx.reporter.log(apply_row);
        }

        if errors.is_empty() && !settings.audit_only {
            if let Some(at) = doc.md_at {
                self.ctx.state.advance(sitemap_uri, at);
            }
        }
        errors
    }

    /// Replay a change list in document order, gated on the last synced
    /// instant for this list URI.
    pub async fn incremental(&self, sitemap_uri: &str, doc: &SitemapDoc) -> Vec<ProcError> {
        let mut errors = Vec::new();
        let settings = &self.ctx.settings;

        let Some((dest, map_base)) = self.resolve(sitemap_uri, ORIGIN_INCREMENTAL, &mut errors)
        else {
            return errors;
        };

        let last_synced = self.ctx.state.get(sitemap_uri);

        let mut row = SyncStatus::new(sitemap_uri, ORIGIN_INCREMENTAL);
        row.incremental = true;
        row.audit = settings.audit_only;
        let mut max_seen: Option<DateTime<Utc>> = None;

        for entry in &doc.resources {
            if self.ctx.stop_requested() {
                break;
            }
            let Some(change) = entry.change else {
                errors.push(ProcError::Apply {
                    uri: entry.uri.clone(),
                    reason: "change list entry without a change attribute".to_string(),
                });
                continue;
            };
            let changed_at = entry.change_datetime();
            if let (Some(last), Some(at)) = (last_synced, changed_at) {
                if at <= last {
                    debug!(uri = %entry.uri, %at, "change at or before last sync, skipping");
                    continue;
                }
            }
            if let Some(at) = changed_at {
                max_seen = Some(max_seen.map_or(at, |m| m.max(at)));
            }

            let Some(rel_path) = rel_path_for(entry, &map_base) else {
                errors.push(ProcError::Apply {
                    uri: entry.uri.clone(),
                    reason: format!("entry not mappable beneath {map_base}"),
                });
                continue;
            };
            let target = dest.join(&rel_path);

            match change {
                ChangeKind::Deleted => {
                    row.to_delete += 1;
                    if settings.audit_only {
                        continue;
                    }
                    match std::fs::remove_file(&target) {
                        Ok(()) => row.deleted += 1,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            debug!(%target, "already absent");
                        }
                        Err(e) => errors.push(ProcError::Apply {
                            uri: entry.uri.clone(),
                            reason: format!("cannot delete {target}: {e}"),
                        }),
                    }
                }
                ChangeKind::Created | ChangeKind::Updated => {
                    let existed = target.is_file();
                    if settings.audit_only {
                        if existed {
                            row.updated += 1;
                        } else {
                            row.created += 1;
                        }
                        continue;
                    }
                    if !self.ctx.claim(&entry.uri) {
                        debug!(uri = %entry.uri, "already handled this cycle, skipping");
                        continue;
                    }
                    let item = remote_item(entry, rel_path);
                    match fetch_resource(&self.ctx.fetcher, &dest, &item).await {
                        // A created entry whose target already exists is
                        // re-downloaded and counted as an update.
                        Ok(()) if existed => row.updated += 1,
                        Ok(()) => row.created += 1,
                        Err(e) => errors.push(e),
                    }
                }
            }
        }

        row.in_sync =
            Some(row.created == 0 && row.updated == 0 && row.deleted == 0 && row.to_delete == 0);
        if let Some(first) = errors.first() {
            row.exception = Some(first.to_string());
        }
        info!(
            uri = sitemap_uri,
            created = row.created,
            updated = row.updated,
            deleted = row.deleted,
            to_delete = row.to_delete,
            audit = row.audit,
            "incremental pass done"
        );
        self.ctx.reporter.log(row);

        if errors.is_empty() && !settings.audit_only {
            if let Some(at) = doc.md_completed.or(max_seen) {
                self.ctx.state.advance(sitemap_uri, at);
            }
        }
        errors
    }

    /// Resolve the destination directory and the mapping base (the list
    /// URI's parent directory) or record why not.
    fn resolve(
        &self,
        sitemap_uri: &str,
        origin: &str,
        errors: &mut Vec<ProcError>,
    ) -> Option<(Utf8PathBuf, String)> {
        let resolved = self.ctx.destmap.find_destination(
            sitemap_uri,
            None,
            self.ctx.settings.use_netloc,
            "",
        );
        let Some(dest) = resolved.destination else {
            debug!(uri = sitemap_uri, "no destination");
            self.ctx
                .reporter
                .log_exception(sitemap_uri, origin, NO_DESTINATION);
            errors.push(ProcError::Mapping(sitemap_uri.to_string()));
            return None;
        };
        let map_base =
            UriPath::parent(sitemap_uri).unwrap_or_else(|| resolved.base_uri.clone());
        Some((dest, map_base))
    }
}

fn remote_item(entry: &ResourceEntry, rel_path: String) -> RemoteItem {
    RemoteItem {
        uri: entry.uri.clone(),
        rel_path,
        length: entry.length,
        digest: entry.hash.clone(),
        lastmod: entry.lastmod,
    }
}

/// Relative local path for an entry URI beneath the mapping base, or `None`
/// when the entry lives outside the base or decodes into an unsafe path.
fn rel_path_for(entry: &ResourceEntry, map_base: &str) -> Option<String> {
    let suffix = UriPath::suffix_after(&entry.uri, map_base)?;
    let segments = UriPath::decode_segments(suffix)?;
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

fn collect_remote(
    entries: &[ResourceEntry],
    map_base: &str,
    errors: &mut Vec<ProcError>,
) -> Vec<RemoteItem> {
    let mut remote = Vec::new();
    for entry in entries {
        match rel_path_for(entry, map_base) {
            Some(rel_path) => remote.push(remote_item(entry, rel_path)),
            None => {
                warn!(uri = %entry.uri, map_base, "entry not mappable, skipping");
                errors.push(ProcError::Apply {
                    uri: entry.uri.clone(),
                    reason: format!("entry not mappable beneath {map_base}"),
                });
            }
        }
    }
    remote
}

/// Enumerate the mirror content beneath `dest`. The sitemap archive folder
/// and in-flight `.part` files are not mirror content.
pub(crate) fn enumerate_local(dest: &Utf8Path) -> std::io::Result<Vec<LocalItem>> {
    let mut items = Vec::new();
    if !dest.as_std_path().exists() {
        return Ok(items);
    }
    let skip_root = dest.join(SITEMAP_FOLDER);
    for entry in WalkDir::new(dest) {
        let entry = entry.map_err(std::io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(path) = Utf8Path::from_path(entry.path()) else {
            continue;
        };
        if path.starts_with(&skip_root) || path.as_str().ends_with(".part") {
            continue;
        }
        let Ok(rel) = path.strip_prefix(dest) else {
            continue;
        };
        let meta = entry.metadata().map_err(std::io::Error::other)?;
        let mtime = meta.modified().ok().map(DateTime::<Utc>::from);
        items.push(LocalItem {
            rel_path: rel.as_str().to_string(),
            length: meta.len(),
            mtime,
            md5: None,
        });
    }
    Ok(items)
}

/// Hash the local tree in parallel; only called when checksums are in play.
fn hash_local(dest: &Utf8Path, items: &mut [LocalItem]) {
    items.par_iter_mut().for_each(|item| {
        let path = dest.join(&item.rel_path);
        item.md5 = md5_file(&path).ok();
    });
}

/// Download one resource to its target, atomically, and stamp the remote
/// lastmod onto the file so later metadata comparisons line up.
pub(crate) async fn fetch_resource(
    fetcher: &Fetcher,
    dest: &Utf8Path,
    item: &RemoteItem,
) -> Result<(), ProcError> {
    let target = dest.join(&item.rel_path);
    if !target.starts_with(dest) {
        return Err(ProcError::Apply {
            uri: item.uri.clone(),
            reason: format!("target {target} escapes {dest}"),
        });
    }
    fetcher.download(&item.uri, &target).await?;
    stamp_lastmod(&target, item.lastmod);
    Ok(())
}

pub(crate) fn stamp_lastmod(target: &Utf8Path, lastmod: Option<DateTime<Utc>>) {
    if let Some(lastmod) = lastmod {
        let ft = FileTime::from_unix_time(lastmod.timestamp(), 0);
        if let Err(e) = filetime::set_file_mtime(target.as_std_path(), ft) {
            warn!(%target, error = %e, "could not stamp lastmod");
        }
    }
}
