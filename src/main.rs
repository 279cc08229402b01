use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wayback_site_restorer::config::Config;
use wayback_site_restorer::discovery::Discovery;
use wayback_site_restorer::inventory::{parse_date_bound, DocumentStatus, Inventory};
use wayback_site_restorer::pipeline::{DownloadOptions, Pipeline};
use wayback_site_restorer::sites::Sites;
use wayback_site_restorer::wayback::WaybackClient;

/// Restore a vanished website from Wayback Machine captures.
///
/// Settings come from the environment (or a `.env` file); eras to search
/// come from the sites file.
#[derive(Parser)]
#[command(name = "wayback-restore", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the archive index and add new captures to the inventory.
    Discover {
        /// Only this era.
        #[arg(long)]
        era: Option<String>,
        /// Override the era's first year.
        #[arg(long)]
        from_year: Option<i32>,
        /// Override the era's last year.
        #[arg(long)]
        to_year: Option<i32>,
        /// Report what would be added without saving.
        #[arg(long)]
        dry_run: bool,
    },

    /// Fetch documents and their assets.
    Download {
        #[arg(long)]
        era: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        /// Earliest capture date, `YYYYMMDD`.
        #[arg(long, value_parser = parse_date_bound)]
        from_date: Option<String>,
        /// Latest capture date, `YYYYMMDD`.
        #[arg(long, value_parser = parse_date_bound)]
        to_date: Option<String>,
        /// Process at most this many documents.
        #[arg(long)]
        limit: Option<usize>,
        /// Re-scan downloaded documents for missing assets.
        #[arg(long)]
        rescan_assets: bool,
        /// Also retry documents that failed before.
        #[arg(long)]
        retry_failed: bool,
        /// Log the planned work without fetching or writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Put failed or downloaded documents back in the queue.
    Reset {
        #[arg(long)]
        era: Option<String>,
        #[arg(long, value_enum, default_value_t = ResetStatus::Failed)]
        status: ResetStatus,
    },

    /// Show inventory counts per era and status.
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum ResetStatus {
    Failed,
    Downloaded,
}

impl From<ResetStatus> for DocumentStatus {
    fn from(status: ResetStatus) -> Self {
        match status {
            ResetStatus::Failed => Self::Failed,
            ResetStatus::Downloaded => Self::Downloaded,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // A corrupt inventory must stop the run before anything is fetched.
    let mut inventory = Inventory::load(&config.inventory_path)
        .await
        .context("Failed to load inventory")?;
    info!(
        path = %config.inventory_path.display(),
        records = inventory.records.len(),
        "Inventory loaded"
    );

    match cli.command {
        Commands::Discover {
            era,
            from_year,
            to_year,
            dry_run,
        } => {
            let sites = Sites::load(&config.sites_file)
                .with_context(|| format!("Failed to load {}", config.sites_file.display()))?;
            let eras = sites.selected(era.as_deref());
            if eras.is_empty() {
                warn!(era = ?era, "No matching eras in sites file");
                return Ok(());
            }

            let discovery = Discovery::new(Arc::new(WaybackClient::new(&config)?));
            for era in eras {
                let records = discovery
                    .discover_era(era, from_year, to_year)
                    .await
                    .with_context(|| format!("Discovery failed for era {}", era.name))?;
                let found = records.len();
                let added = inventory.merge_catalog(records);
                info!(era = %era.name, found, added, "Era discovered");
            }

            if dry_run {
                info!("Dry run, inventory not saved");
            } else {
                inventory
                    .save(&config.inventory_path)
                    .await
                    .context("Failed to save inventory")?;
            }
        }

        Commands::Download {
            era,
            year,
            from_date,
            to_date,
            limit,
            rescan_assets,
            retry_failed,
            dry_run,
        } => {
            let options = DownloadOptions {
                era,
                year,
                from_date,
                to_date,
                limit,
                rescan_assets,
                retry_failed,
                dry_run,
            };
            let inventory_path = config.inventory_path.clone();
            let pipeline = Pipeline::new(config)?;
            let summary = pipeline
                .run(&mut inventory, &inventory_path, &options)
                .await?;
            info!(
                selected = summary.selected,
                downloaded = summary.downloaded,
                failed = summary.failed,
                "Download run complete"
            );
        }

        Commands::Reset { era, status } => {
            let count = inventory.reset_status(era.as_deref(), status.into());
            inventory
                .save(&config.inventory_path)
                .await
                .context("Failed to save inventory")?;
            info!(count, "Records reset to discovered");
        }

        Commands::Status => {
            for (era, counts) in inventory.counts() {
                let line = counts
                    .iter()
                    .map(|(status, n)| format!("{status}={n}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                println!("{era}: {line}");
            }
        }
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,wayback_site_restorer=debug"));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
