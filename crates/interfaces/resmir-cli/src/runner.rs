use camino::{Utf8Path, Utf8PathBuf};
use futures::StreamExt;
use resmir_config as config;
use resmir_config::{Config, ConfigError};
use resmir_core::Capability;
use resmir_infra::Fetcher;
use resmir_pipeline::listener::{
    dump_listeners_from, sitemap_listeners_from, DumpListener, SitemapListener,
};
use resmir_pipeline::{
    well_known_uri, Context, Discoverer, Processor, Settings, SourceWalk, StateStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const ORIGIN_RUNNER: &str = "runner";

/// How a source URI is turned into a root processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Task {
    /// Probe each source with the five-step discovery pipeline.
    Discover,
    /// Every source exposes `.well-known/resourcesync`.
    Wellknown,
    /// Every source URI is a capability list.
    Capability,
}

/// The periodic main loop: read sources, reload the destination map, walk
/// every source, report, sleep, repeat until told to stop.
pub struct Runner {
    config: Config,
    state: Arc<StateStore>,
    fetcher: Fetcher,
    sitemap_listeners: Vec<Arc<dyn SitemapListener>>,
    dump_listeners: Vec<Arc<dyn DumpListener>>,
    stop_flag: Arc<AtomicBool>,
    stop_file: Utf8PathBuf,
}

impl Runner {
    /// Build a runner from a loaded configuration. Listener names and the
    /// sync state file are validated here, before the loop starts.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let sitemap_listeners =
            sitemap_listeners_from(&config.list_prop(config::KEY_DES_PROCESSOR_LISTENERS))
                .map_err(ConfigError::Invalid)?;
        let dump_listeners = dump_listeners_from(&config.list_prop(config::KEY_DES_DUMP_LISTENERS))
            .map_err(ConfigError::Invalid)?;

        let state_path =
            Utf8PathBuf::from(config.prop_or(config::KEY_SYNC_STATE_FILE, config::DEFAULT_STATE_FILE));
        let state = StateStore::load(&state_path).map_err(|e| {
            ConfigError::Invalid(format!("cannot load sync state {state_path}: {e}"))
        })?;

        Ok(Self {
            config,
            state: Arc::new(state),
            fetcher: Fetcher::new(),
            sitemap_listeners,
            dump_listeners,
            stop_flag: Arc::new(AtomicBool::new(false)),
            stop_file: Utf8PathBuf::from("stop"),
        })
    }

    /// Where to look for the stop file (the working directory by default).
    pub fn with_stop_file(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.stop_file = path.into();
        self
    }

    /// A handle external code (signal handlers, tests) can use to end the
    /// loop at the next safe point.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    pub async fn run(
        &self,
        sources_file: &Utf8Path,
        task: Task,
        once: bool,
    ) -> anyhow::Result<()> {
        let report_path = Utf8PathBuf::from(
            self.config
                .prop_or(config::KEY_SYNC_STATUS_REPORT_FILE, config::DEFAULT_REPORT_FILE),
        );
        let workers = self
            .config
            .int_prop(config::KEY_SYNC_WORKERS, config::DEFAULT_SYNC_WORKERS as u64)
            .max(1) as usize;

        loop {
            let sources = config::read_uri_list(sources_file)?;
            info!(count = sources.len(), file = %sources_file, "read source uris");

            let ctx = Arc::new(self.build_context()?);

            futures::stream::iter(sources.iter().cloned())
                .map(|uri| {
                    let ctx = ctx.clone();
                    async move { process_source(&ctx, &uri, task).await }
                })
                .buffer_unordered(workers)
                .collect::<Vec<()>>()
                .await;

            if let Err(e) = ctx.reporter.write_to(&report_path) {
                warn!(path = %report_path, error = %e, "could not write sync status report");
            }
            ctx.reporter.reset();
            if let Err(e) = self.state.flush() {
                warn!(error = %e, "could not flush sync state");
            }

            if once || self.stopped() {
                break;
            }
            let pause = self
                .config
                .int_prop(config::KEY_SYNC_PAUSE, config::DEFAULT_SYNC_PAUSE);
            info!(seconds = pause, "going to sleep; touch '{}' to stop", self.stop_file);
            self.interruptible_sleep(pause).await;
            if self.stopped() {
                break;
            }
        }
        info!("runner finished");
        Ok(())
    }

    /// Fresh per-cycle context: the destination map is re-read so mapping
    /// changes take effect without a restart.
    fn build_context(&self) -> Result<Context, ConfigError> {
        let map_path = Utf8PathBuf::from(self.config.prop_or(
            config::KEY_LOCATION_MAPPER_DESTINATION_FILE,
            config::DEFAULT_DESTINATION_FILE,
        ));
        let root = Utf8PathBuf::from(self.config.prop_or(config::KEY_DESTINATION_ROOT, ""));
        let destmap = config::load_destination_map(&map_path, &root)?;
        info!(path = %map_path, entries = destmap.len(), "loaded destination map");

        let settings = Settings {
            audit_only: self.config.boolean_prop(config::KEY_AUDIT_ONLY, true),
            use_checksum: self.config.boolean_prop(config::KEY_USE_CHECKSUM, true),
            use_netloc: self.config.boolean_prop(config::KEY_USE_NETLOC, false),
            max_depth: self.config.int_prop(
                config::KEY_MAX_SITEMAP_DEPTH,
                config::DEFAULT_MAX_SITEMAP_DEPTH as u64,
            ) as u32,
            download_threads: config::DEFAULT_DOWNLOAD_THREADS,
        };

        Ok(Context::new(settings, destmap, self.fetcher.clone(), self.state.clone())
            .with_sitemap_listeners(self.sitemap_listeners.clone())
            .with_dump_listeners(self.dump_listeners.clone())
            .with_stop_flag(self.stop_flag.clone()))
    }

    fn stopped(&self) -> bool {
        if self.stop_flag.load(Ordering::Relaxed) {
            return true;
        }
        if self.stop_file.is_file() {
            info!(file = %self.stop_file, "stop file present, shutting down");
            return true;
        }
        false
    }

    /// Sleep in one-second slices so the stop signal cuts the pause short.
    async fn interruptible_sleep(&self, seconds: u64) {
        for _ in 0..seconds {
            if self.stopped() {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Walk one source; failures never propagate past this boundary.
async fn process_source(ctx: &Context, uri: &str, task: Task) {
    let root = match task {
        Task::Discover => Discoverer::new(ctx, uri).discover().await,
        Task::Wellknown => Some(Processor::new(well_known_uri(uri), Capability::Description)),
        Task::Capability => Some(Processor::new(uri, Capability::CapabilityList)),
    };
    let Some(root) = root else {
        warn!(uri, "no processor for source");
        ctx.reporter.log_exception(
            uri,
            ORIGIN_RUNNER,
            &format!("Could not discover a resource sync method for {uri}"),
        );
        return;
    };
    let outcome = SourceWalk::new(ctx).run(root).await;
    info!(
        uri,
        status = ?outcome.status,
        exceptions = outcome.exceptions.len(),
        "source processed"
    );
}
