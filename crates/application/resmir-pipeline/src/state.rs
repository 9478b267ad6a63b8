use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use resmir_core::timeutil::{format_w3c, parse_w3c_datetime};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Per-sitemap-URI last-synced instants, persisted as a small JSON object
/// (`{uri: rfc3339}`) that survives restarts. Only clean branches advance an
/// entry, and an entry never moves backwards.
pub struct StateStore {
    path: Option<Utf8PathBuf>,
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl StateStore {
    /// Load from `path`; a missing file starts empty.
    pub fn load(path: &Utf8Path) -> std::io::Result<Self> {
        let mut entries = HashMap::new();
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let raw: BTreeMap<String, String> = serde_json::from_str(&text)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                for (uri, stamp) in raw {
                    match parse_w3c_datetime(&stamp) {
                        Some(at) => {
                            entries.insert(uri, at);
                        }
                        None => warn!(%uri, %stamp, "ignoring unreadable sync state entry"),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        debug!(%path, entries = entries.len(), "loaded sync state");
        Ok(Self {
            path: Some(path.to_owned()),
            entries: Mutex::new(entries),
        })
    }

    /// A store that never touches disk; `flush` is a no-op.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, uri: &str) -> Option<DateTime<Utc>> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(uri).copied())
    }

    /// Move `uri` forward to `at`. Regressions are ignored; returns whether
    /// the entry changed.
    pub fn advance(&self, uri: &str, at: DateTime<Utc>) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        match entries.get(uri) {
            Some(current) if *current >= at => {
                debug!(uri, %at, %current, "sync state regression ignored");
                false
            }
            _ => {
                entries.insert(uri.to_string(), at);
                true
            }
        }
    }

    /// Write the store back to disk, atomically (tmp file then rename).
    pub fn flush(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot: BTreeMap<String, String> = self
            .entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .map(|(uri, at)| (uri.clone(), format_w3c(*at)))
                    .collect()
            })
            .unwrap_or_default();
        let data = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = Utf8PathBuf::from(format!("{path}.tmp"));
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn advance_is_monotonic() {
        let store = StateStore::in_memory();
        let uri = "http://s/rs/changelist.xml";
        assert!(store.advance(uri, at(2000)));
        assert!(!store.advance(uri, at(1000)));
        assert!(!store.advance(uri, at(2000)));
        assert_eq!(store.get(uri), Some(at(2000)));
        assert!(store.advance(uri, at(3000)));
        assert_eq!(store.get(uri), Some(at(3000)));
    }

    #[test]
    fn survives_a_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("state.json")).unwrap();

        let store = StateStore::load(&path).unwrap();
        store.advance("http://s/rs/changelist.xml", at(1_357_209_600));
        store.flush().unwrap();

        let reloaded = StateStore::load(&path).unwrap();
        assert_eq!(
            reloaded.get("http://s/rs/changelist.xml"),
            Some(at(1_357_209_600))
        );
        assert_eq!(reloaded.get("http://other"), None);
    }

    #[test]
    fn corrupt_state_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("state.json")).unwrap();
        std::fs::write(&path, "not json").unwrap();
        assert!(StateStore::load(&path).is_err());
    }
}
