//! Configuration loading: the key=value config file, the sources file, and
//! the URI-to-destination map file.

use camino::{Utf8Path, Utf8PathBuf};
use resmir_core::destmap::DestinationMap;
use std::collections::HashMap;
use tracing::warn;

pub const KEY_LOGGING_CONFIGURATION_FILE: &str = "logging_configuration_file";
pub const KEY_LOCATION_MAPPER_DESTINATION_FILE: &str = "location_mapper_destination_file";
pub const KEY_DESTINATION_ROOT: &str = "destination_root";
pub const KEY_USE_NETLOC: &str = "use_netloc";
pub const KEY_USE_CHECKSUM: &str = "use_checksum";
pub const KEY_AUDIT_ONLY: &str = "audit_only";
pub const KEY_SYNC_STATUS_REPORT_FILE: &str = "sync_status_report_file";
pub const KEY_SYNC_STATE_FILE: &str = "sync_state_file";
pub const KEY_SYNC_PAUSE: &str = "sync_pause";
pub const KEY_SYNC_WORKERS: &str = "sync_workers";
pub const KEY_MAX_SITEMAP_DEPTH: &str = "max_sitemap_depth";
pub const KEY_DES_PROCESSOR_LISTENERS: &str = "des_processor_listeners";
pub const KEY_DES_DUMP_LISTENERS: &str = "des_dump_listeners";

pub const DEFAULT_DESTINATION_FILE: &str = "conf/desmap.txt";
pub const DEFAULT_REPORT_FILE: &str = "sync-status.csv";
pub const DEFAULT_STATE_FILE: &str = "sync-state.json";

/// Inter-cycle sleep in seconds when the config does not say otherwise.
pub const DEFAULT_SYNC_PAUSE: u64 = 3600;

/// Sources processed concurrently within one cycle.
pub const DEFAULT_SYNC_WORKERS: usize = 1;

/// Recursion bound for nested sitemap indexes.
pub const DEFAULT_MAX_SITEMAP_DEPTH: u32 = 8;

/// Concurrent resource downloads within one list.
pub const DEFAULT_DOWNLOAD_THREADS: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The key=value configuration file. Blank lines and `#` comments are
/// skipped; the first `=` splits key from value; both sides are trimmed.
/// Unknown keys are kept and retrievable but ignored by the core.
#[derive(Debug, Clone, Default)]
pub struct Config {
    props: HashMap<String, String>,
}

impl Config {
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = read(path)?;
        Ok(Self::from_lines(&text))
    }

    pub fn from_lines(text: &str) -> Self {
        let mut props = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                props.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Self { props }
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn prop(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    pub fn prop_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.prop(key).unwrap_or(default)
    }

    /// Booleans are the literal strings `True` / `False`, case-sensitive.
    /// Anything else reads as `False`.
    pub fn boolean_prop(&self, key: &str, default: bool) -> bool {
        match self.prop(key) {
            Some(value) => value == "True",
            None => default,
        }
    }

    pub fn int_prop(&self, key: &str, default: u64) -> u64 {
        match self.prop(key) {
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!(key, value, "not an integer, using default {default}");
                default
            }),
            None => default,
        }
    }

    /// Comma-separated list; empty items dropped.
    pub fn list_prop(&self, key: &str) -> Vec<String> {
        self.prop(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Read a sources file: one URI per line, `#` comments, blank lines skipped.
pub fn read_uri_list(path: &Utf8Path) -> Result<Vec<String>, ConfigError> {
    let text = read(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Read the URI-to-destination map file and apply the destination root.
pub fn load_destination_map(
    path: &Utf8Path,
    root_folder: &Utf8Path,
) -> Result<DestinationMap, ConfigError> {
    let text = read(path)?;
    let mut map = DestinationMap::from_lines(&text);
    map.set_root_folder(root_folder);
    Ok(map)
}

fn read(path: &Utf8Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_owned(),
        source,
    })
}
