use percent_encoding::percent_decode_str;
use url::Url;

/// Small URI helpers shared by the destination map and the sync engine.
pub struct UriPath;

impl UriPath {
    /// Drop the last path segment: `http://h/a/b/list.xml` -> `http://h/a/b`.
    /// The query and fragment are discarded. Returns `None` when the input is
    /// not an absolute URI or the path is already empty.
    pub fn parent(uri: &str) -> Option<String> {
        let url = Url::parse(uri).ok()?;
        let path = url.path();
        let cut = path.rfind('/')?;
        let mut parent = path[..cut].to_string();
        if parent == "/" {
            parent.clear();
        }
        Some(format!("{}{}", Self::origin(&url), parent))
    }

    /// `scheme://host[:port]` without a trailing slash.
    pub fn origin(url: &Url) -> String {
        url.origin().ascii_serialization()
    }

    pub fn host_of(uri: &str) -> Option<String> {
        Url::parse(uri)
            .ok()?
            .host_str()
            .map(|h| h.to_string())
    }

    /// The part of `uri` beyond `base`, with leading slashes, query and
    /// fragment stripped. `None` when `uri` does not start with `base`.
    pub fn suffix_after<'a>(uri: &'a str, base: &str) -> Option<&'a str> {
        let rest = uri.strip_prefix(base)?;
        let rest = rest.trim_start_matches('/');
        let end = rest
            .find(['?', '#'])
            .unwrap_or(rest.len());
        Some(&rest[..end])
    }

    /// Percent-decode a relative URI path into local path segments. Rejects
    /// anything that could escape the destination tree.
    pub fn decode_segments(rel: &str) -> Option<Vec<String>> {
        let mut segments = Vec::new();
        for raw in rel.split('/') {
            if raw.is_empty() || raw == "." {
                continue;
            }
            let decoded = percent_decode_str(raw).decode_utf8_lossy().to_string();
            if decoded == ".." || decoded.contains(['/', '\\']) || decoded.contains('\0') {
                return None;
            }
            segments.push(decoded);
        }
        Some(segments)
    }
}
