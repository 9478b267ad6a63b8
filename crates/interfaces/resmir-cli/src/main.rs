use anyhow::Context as _;
use camino::Utf8PathBuf;
use clap::Parser;
use resmir_cli::{Runner, Task};
use resmir_config::{Config, KEY_LOGGING_CONFIGURATION_FILE};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Run a ResourceSync Destination: mirror the sources named in the sources
/// file into the locally mapped destination directories.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// File with one source URI per line.
    sources: Utf8PathBuf,
    /// Configuration file.
    #[arg(short, long, default_value = "conf/config.txt")]
    config: Utf8PathBuf,
    /// How source URIs are interpreted.
    #[arg(short, long, value_enum, default_value_t = Task::Discover)]
    task: Task,
    /// Explore the sources once and exit.
    #[arg(short, long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("cannot load configuration '{}'", cli.config))?;
    init_logging(&config)?;
    info!(config = %cli.config, sources = %cli.sources, "started resmir");

    let runner = Runner::new(config)?;
    runner.run(&cli.sources, cli.task, cli.once).await
}

/// The logging configuration file, when set, holds an env-filter directive
/// on its first non-comment line. An unreadable file is fatal; without the
/// key, RUST_LOG or "info" applies.
fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = match config.prop(KEY_LOGGING_CONFIGURATION_FILE) {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("logging configuration file not found: {path}"))?;
            let directive = text
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty() && !line.starts_with('#'))
                .unwrap_or("info")
                .to_string();
            EnvFilter::try_new(directive)
                .with_context(|| format!("bad logging directive in {path}"))?
        }
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
