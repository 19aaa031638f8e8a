//! Command-line front end for datamold.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datamold_core::Format;
use datamold_core::config::AppConfig;
use datamold_engine::{AggregateReport, Generator, TransferController};
use datamold_storage::ObjectStorage;
use figment::Figment;
use figment::providers::{Env, Format as _, Toml};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "datamold")]
#[command(about = "Synthetic dataset generator and object-storage migration tool")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(long, env = "DATAMOLD_CONFIG", default_value = "datamold.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic dataset
    Generate {
        /// Artifact format (txt, csv, json, xml, png, gif, gz)
        #[arg(long)]
        format: Format,

        /// Capacity in GiB; each GiB yields ten artifacts
        #[arg(long)]
        capacity: u32,

        /// Local destination directory
        #[arg(long, required_unless_present = "remote", conflicts_with = "remote")]
        dest: Option<PathBuf>,

        /// Write into the configured storage backend instead
        #[arg(long)]
        remote: bool,

        /// Worker count (overrides config)
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Bucket operations on the configured backend
    Bucket {
        #[command(subcommand)]
        command: BucketCommands,
    },
    /// Upload a local directory into the bucket
    Put {
        /// Directory to upload
        dir: PathBuf,
    },
    /// Download the whole bucket into a local directory
    Get {
        /// Destination directory
        dir: PathBuf,
    },
    /// Copy every object into the backend described by another config file
    Copy {
        /// Configuration file of the target backend
        target_config: PathBuf,
    },
}

#[derive(Subcommand)]
enum BucketCommands {
    /// Create the bucket if it does not exist
    Create,
    /// Delete every object, then the bucket
    Delete,
    /// List every object
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Cli { config, command } = Cli::parse();
    let config = load_config(&config)?;

    match command {
        Commands::Generate {
            format,
            capacity,
            dest,
            remote,
            threads,
        } => handle_generate(&config, format, capacity, dest, remote, threads).await,
        Commands::Bucket { command } => handle_bucket_command(&config, command).await,
        Commands::Put { dir } => {
            let report = controller(&config).await?.put_dir(&dir).await?;
            print_report("Uploaded", &report);
            Ok(())
        }
        Commands::Get { dir } => {
            let report = controller(&config).await?.get_dir(&dir).await?;
            print_report("Downloaded", &report);
            Ok(())
        }
        Commands::Copy { target_config } => {
            let target = load_config(&target_config)?;
            let report = controller(&config)
                .await?
                .copy_to(&controller(&target).await?)
                .await?;
            print_report("Copied", &report);
            Ok(())
        }
    }
}

/// Layer defaults, the optional TOML file and `DATAMOLD_` env vars.
fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        tracing::info!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("DATAMOLD_").split("__"));

    let config: AppConfig = figment
        .extract()
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn ObjectStorage>> {
    datamold_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage backend")
}

async fn controller(config: &AppConfig) -> Result<TransferController> {
    let controller =
        TransferController::new(open_store(config).await?).with_threads(config.transfer.threads);
    let span = controller.backend_span();
    Ok(controller.with_logger(Some(span)))
}

async fn handle_generate(
    config: &AppConfig,
    format: Format,
    capacity: u32,
    dest: Option<PathBuf>,
    remote: bool,
    threads: Option<usize>,
) -> Result<()> {
    let mut generator = Generator::from_config(format, &config.generate);
    if let Some(threads) = threads {
        generator = generator.with_threads(threads);
    }

    let report = match dest {
        Some(dest) if !remote => generator
            .generate(&dest, capacity)
            .await
            .with_context(|| format!("generation into {} failed", dest.display()))?,
        _ => {
            let store = open_store(config).await?;
            generator
                .generate_into(store, capacity)
                .await
                .context("remote generation failed")?
        }
    };

    print_report("Generated", &report);
    Ok(())
}

async fn handle_bucket_command(config: &AppConfig, command: BucketCommands) -> Result<()> {
    let controller = controller(config).await?;

    match command {
        BucketCommands::Create => {
            controller
                .create_bucket()
                .await
                .context("failed to create bucket")?;
            println!("Bucket ready");
        }
        BucketCommands::Delete => {
            controller
                .delete_bucket()
                .await
                .context("failed to delete bucket")?;
            println!("Bucket deleted");
        }
        BucketCommands::List { json } => {
            let objects = controller
                .object_list()
                .await
                .context("failed to list bucket")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&objects)?);
            } else {
                println!("{:<48} {:>14}  {:<26} ETAG", "KEY", "SIZE", "LAST MODIFIED");
                for object in &objects {
                    println!(
                        "{:<48} {:>14}  {:<26} {}",
                        object.key, object.size, object.last_modified, object.etag
                    );
                }
                println!("\n{} objects", objects.len());
            }
        }
    }

    Ok(())
}

fn print_report(verb: &str, report: &AggregateReport) {
    println!("{verb} {} of {} units", report.succeeded, report.total);
}
