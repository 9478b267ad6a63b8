use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::Digest;

/// What the remote list says a resource should look like.
#[derive(Debug, Clone)]
pub struct RemoteItem {
    pub uri: String,
    pub rel_path: String,
    pub length: Option<u64>,
    pub digest: Option<Digest>,
    pub lastmod: Option<DateTime<Utc>>,
}

/// What is actually on disk under the destination directory.
#[derive(Debug, Clone)]
pub struct LocalItem {
    pub rel_path: String,
    pub length: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub md5: Option<String>,
}

#[derive(Debug, Default)]
pub struct Partition {
    pub same: Vec<RemoteItem>,
    pub created: Vec<RemoteItem>,
    pub updated: Vec<RemoteItem>,
    pub deleted: Vec<LocalItem>,
}

impl Partition {
    pub fn is_clean(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Split a remote listing and the local tree into same/created/updated/deleted.
///
/// A pair on the same relative path counts as `same` when the md5 digests
/// match (both present, `use_checksum` on), otherwise when the declared
/// length matches and, if the remote carries a lastmod, the local mtime
/// equals it at second precision. A remote entry that declares nothing
/// comparable matches on presence alone.
pub fn partition(
    remote: Vec<RemoteItem>,
    local: Vec<LocalItem>,
    use_checksum: bool,
) -> Partition {
    let mut out = Partition::default();
    let mut local_by_path: HashMap<String, LocalItem> = local
        .into_iter()
        .map(|l| (l.rel_path.clone(), l))
        .collect();

    for item in remote {
        match local_by_path.remove(&item.rel_path) {
            Some(existing) => {
                if matches(&item, &existing, use_checksum) {
                    out.same.push(item);
                } else {
                    out.updated.push(item);
                }
            }
            None => out.created.push(item),
        }
    }

    let mut leftovers: Vec<LocalItem> = local_by_path.into_values().collect();
    leftovers.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    out.deleted = leftovers;
    out
}

fn matches(remote: &RemoteItem, local: &LocalItem, use_checksum: bool) -> bool {
    if use_checksum {
        if let (Some(digest), Some(md5)) = (&remote.digest, &local.md5) {
            if digest.is_md5() {
                return digest.hex.eq_ignore_ascii_case(md5);
            }
        }
    }
    if let Some(length) = remote.length {
        if length != local.length {
            return false;
        }
    }
    match (remote.lastmod, local.mtime) {
        (Some(lm), Some(mt)) => lm.timestamp() == mt.timestamp(),
        (Some(_), None) => false,
        (None, _) => true,
    }
}
