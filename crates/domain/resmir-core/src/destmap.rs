use camino::{Utf8Path, Utf8PathBuf};

use crate::uri_utils::UriPath;

/// Ordered URI-prefix to local-directory resolver.
///
/// Matching strips path segments from the right until a map key matches, so
/// the longest declared prefix always wins. Duplicate keys keep the first
/// declaration. Keys are stored without a trailing slash.
#[derive(Debug, Clone, Default)]
pub struct DestinationMap {
    entries: Vec<(String, String)>,
    root_folder: Utf8PathBuf,
}

/// Outcome of a destination lookup: the base URI that matched (or the URI
/// stripped down to its root when nothing did) and the resolved directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub base_uri: String,
    pub destination: Option<Utf8PathBuf>,
}

/// Outcome of a local-path lookup for a concrete resource URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalResolved {
    pub base_uri: String,
    pub local_path: Option<Utf8PathBuf>,
}

impl DestinationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `base_uri=local_path` lines. Blank lines and `#` comments are
    /// skipped; lines without `=` are ignored with the bad content preserved
    /// nowhere (the map file is operator-maintained).
    pub fn from_lines(text: &str) -> Self {
        let mut map = Self::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                map.insert(key.trim(), value.trim());
            }
        }
        map
    }

    pub fn insert(&mut self, base_uri: &str, destination: &str) {
        let key = base_uri.trim_end_matches('/').to_string();
        if self.lookup(&key).is_none() {
            self.entries.push((key, destination.to_string()));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebase for relative destinations. Empty means the current directory.
    pub fn set_root_folder(&mut self, root: impl Into<Utf8PathBuf>) {
        self.root_folder = root.into();
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Walk `uri` up segment by segment until a map entry matches.
    /// Returns the matched key (or the stripped-to-root URI) and the raw
    /// destination, if any.
    fn resolve(&self, uri: &str) -> (String, Option<String>) {
        let mut candidate = uri.trim_end_matches('/').to_string();
        loop {
            if let Some(dest) = self.lookup(&candidate) {
                return (candidate, Some(dest.to_string()));
            }
            match UriPath::parent(&candidate) {
                Some(parent) if parent != candidate => candidate = parent,
                _ => return (candidate, None),
            }
        }
    }

    fn finish(&self, destination: Option<String>, infix: &str) -> Option<Utf8PathBuf> {
        let destination = destination?;
        let mut path = Utf8PathBuf::from(destination);
        if path.is_relative() && !self.root_folder.as_str().is_empty() {
            path = self.root_folder.join(path);
        }
        if !infix.is_empty() {
            path.push(infix);
        }
        Some(path)
    }

    /// Resolve the destination directory governing `uri`.
    pub fn find_destination(
        &self,
        uri: &str,
        default: Option<&Utf8Path>,
        use_host: bool,
        infix: &str,
    ) -> Resolved {
        let (mut base_uri, mut destination) = self.resolve(uri);
        if destination.is_none() {
            if let Some(d) = default {
                destination = Some(d.to_string());
            } else if use_host {
                if let Some(host) = UriPath::host_of(uri) {
                    base_uri = url_origin(uri).unwrap_or(base_uri);
                    destination = Some(host);
                }
            }
        }
        Resolved {
            base_uri,
            destination: self.finish(destination, infix),
        }
    }

    /// Resolve the absolute local path for a concrete resource URI: the
    /// destination directory plus the URI suffix beneath the matched base.
    pub fn find_local_path(
        &self,
        uri: &str,
        default: Option<&Utf8Path>,
        use_host: bool,
        infix: &str,
    ) -> LocalResolved {
        let resolved = self.find_destination(uri, default, use_host, infix);
        let base_uri = resolved.base_uri.clone();
        let local_path = resolved.destination.and_then(|dir| {
            let suffix = UriPath::suffix_after(uri, &resolved.base_uri)?;
            let segments = UriPath::decode_segments(suffix)?;
            let mut path = dir;
            for seg in segments {
                path.push(seg);
            }
            Some(path)
        });
        LocalResolved {
            base_uri,
            local_path,
        }
    }
}

fn url_origin(uri: &str) -> Option<String> {
    url::Url::parse(uri).ok().map(|u| UriPath::origin(&u))
}
