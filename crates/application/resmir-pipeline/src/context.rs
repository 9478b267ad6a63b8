use resmir_core::destmap::DestinationMap;
use resmir_core::Capability;
use resmir_infra::Fetcher;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::listener::{DumpListener, SitemapListener};
use crate::report::Reporter;
use crate::state::StateStore;

/// Behavior switches for one cycle, snapshotted from the configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub audit_only: bool,
    pub use_checksum: bool,
    pub use_netloc: bool,
    pub max_depth: u32,
    pub download_threads: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audit_only: true,
            use_checksum: true,
            use_netloc: false,
            max_depth: 8,
            download_threads: 4,
        }
    }
}

/// Everything a processing branch needs, threaded explicitly from the runner
/// instead of living in process-wide singletons. One `Context` serves one
/// cycle; the state store is shared across cycles by the caller.
pub struct Context {
    pub settings: Settings,
    pub destmap: DestinationMap,
    pub fetcher: Fetcher,
    pub reporter: Reporter,
    pub state: Arc<StateStore>,
    sitemap_listeners: Vec<Arc<dyn SitemapListener>>,
    dump_listeners: Vec<Arc<dyn DumpListener>>,
    handled: Mutex<HashSet<String>>,
    stop: Arc<AtomicBool>,
}

impl Context {
    pub fn new(
        settings: Settings,
        destmap: DestinationMap,
        fetcher: Fetcher,
        state: Arc<StateStore>,
    ) -> Self {
        Self {
            settings,
            destmap,
            fetcher,
            reporter: Reporter::new(),
            state,
            sitemap_listeners: Vec::new(),
            dump_listeners: Vec::new(),
            handled: Mutex::new(HashSet::new()),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_sitemap_listeners(mut self, listeners: Vec<Arc<dyn SitemapListener>>) -> Self {
        self.sitemap_listeners = listeners;
        self
    }

    pub fn with_dump_listeners(mut self, listeners: Vec<Arc<dyn DumpListener>>) -> Self {
        self.dump_listeners = listeners;
        self
    }

    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = flag;
        self
    }

    /// First claim of a resource URI within this cycle wins; later lists
    /// naming the same URI must not download it again.
    pub fn claim(&self, uri: &str) -> bool {
        self.handled
            .lock()
            .map(|mut set| set.insert(uri.to_string()))
            .unwrap_or(false)
    }

    /// Whether some list already covered this URI in the current cycle.
    /// Sibling lists of an index share a destination; a URI one of them owns
    /// must not be treated as a stray by another.
    pub fn is_handled(&self, uri: &str) -> bool {
        self.handled
            .lock()
            .map(|set| set.contains(uri))
            .unwrap_or(false)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn notify_sitemap(&self, uri: &str, capability: Capability, text: &str) {
        for listener in &self.sitemap_listeners {
            listener.sitemap_received(self, uri, capability, text);
        }
    }

    pub fn notify_manifest(&self, dump_uri: &str, capability: Capability, manifest: &str) {
        for listener in &self.dump_listeners {
            listener.manifest_received(self, dump_uri, capability, manifest);
        }
    }
}
