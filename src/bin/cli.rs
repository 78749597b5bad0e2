//! resync-oai CLI
//!
//! Local execution entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use resync_oai::{
    error::Result,
    models::{Config, ResourceContainer},
    pipeline,
    storage::CatalogCodec,
    utils::http::HttpFetcher,
};
use tokio_util::sync::CancellationToken;

/// resync-oai - OAI-PMH to ResourceSync bridge
#[derive(Parser, Debug)]
#[command(
    name = "resync-oai",
    version,
    about = "Harvest an OAI-PMH endpoint and publish a ResourceSync catalog"
)]
struct Cli {
    /// Path to storage directory containing config.toml
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bootstrap, then poll and publish until Ctrl-C
    Harvest {
        /// Override the configured endpoint
        #[arg(long)]
        endpoint: Option<String>,

        /// Override the configured initial from date
        #[arg(long)]
        from: Option<String>,
    },

    /// Bootstrap and publish once
    Snapshot {
        /// Override the configured endpoint
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Read a catalog document (path, file: URI or URL) and summarise it
    Read {
        location: String,

        /// Read as a change-set even without the rs:type marker
        #[arg(long)]
        change_set: bool,
    },

    /// Compare two catalog documents
    Diff { current: String, incoming: String },

    /// Validate configuration
    Validate,
}

/// Initialize logging with the given default filter.
fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn reader(config: &Config) -> Result<CatalogCodec> {
    let fetcher = HttpFetcher::from_config(&config.harvest)?;
    Ok(CatalogCodec::from_config(&config.publish)?.with_fetcher(Arc::new(fetcher)))
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.storage_dir.join("config.toml");
    let loaded = Config::load(&config_path);
    let level = match (&loaded, cli.verbose) {
        (_, true) => "debug".to_string(),
        (Ok(config), false) => config.logging.level.clone(),
        (Err(_), false) => "info".to_string(),
    };
    init_logging(&level);

    let mut config = match loaded {
        Ok(config) => {
            log::info!("Loaded configuration from {}", config_path.display());
            config
        }
        Err(e) => {
            log::warn!(
                "Failed to load {}: {}. Using defaults.",
                config_path.display(),
                e
            );
            Config::default()
        }
    };

    match cli.command {
        Command::Harvest { endpoint, from } => {
            if let Some(endpoint) = endpoint {
                config.harvest.endpoint = endpoint;
            }
            if from.is_some() {
                config.harvest.from_date = from;
            }

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        log::info!("Ctrl-C received, stopping after the current round...");
                        cancel.cancel();
                    }
                }
            });

            let repository = pipeline::run_source(&config, cancel).await?;
            log::info!(
                "Harvest stopped with {} resources (cursor {:?})",
                repository.resource_count(),
                repository.cursor()
            );
        }

        Command::Snapshot { endpoint } => {
            if let Some(endpoint) = endpoint {
                config.harvest.endpoint = endpoint;
            }
            let stats = pipeline::run_snapshot(&config).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Command::Read {
            location,
            change_set,
        } => {
            let (catalog, summary) = reader(&config)?.read(&location, change_set).await?;
            let container = catalog.container();
            log::info!(
                "Read {} ({} documents, {} bytes)",
                location,
                summary.documents,
                summary.bytes_read
            );
            println!(
                "{}: {} entries, {} capabilities",
                if catalog.is_change_set() { "change-set" } else { "snapshot" },
                container.len(),
                container.capabilities().len()
            );
            for resource in container.resources() {
                println!("{resource}");
            }
        }

        Command::Diff { current, incoming } => {
            let reader = reader(&config)?;
            let (current, _) = reader.read_snapshot(&current).await?;
            let (incoming, _) = reader.read_snapshot(&incoming).await?;

            let diff = pipeline::calculate_diff(&current, &incoming);
            log::info!(
                "{} same, {} updated, {} deleted, {} created",
                diff.same.len(),
                diff.updated.len(),
                diff.deleted.len(),
                diff.created.len()
            );
            for resource in diff.into_change_set().iter() {
                println!("{resource}");
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");
        }
    }

    log::info!("Done!");

    Ok(())
}
