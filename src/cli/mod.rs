use anyhow::{Context, Result, bail};
use archivedb::{Archive, ArchiveRequest, StoreConfig, StreamBatch};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "archivedb")]
#[command(about = "Apply entity lifecycle batches and browse dimension archives")]
pub struct Cli {
    /// Store URL (`archivedb://<table>@<memory|dir>?index=<name>`); the
    /// environment is used when omitted
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply a change-stream batch (JSON with a `Records` array)
    Apply {
        #[arg(long)]
        file: PathBuf,
    },
    /// List the values of one dimension type, newest first
    List {
        #[arg(long = "type")]
        dimension_type: String,
        /// Include values whose count dropped to zero
        #[arg(long)]
        all: bool,
    },
    /// Show one dimension value
    Get {
        #[arg(long = "type")]
        dimension_type: String,
        #[arg(long)]
        value: String,
    },
    /// Browse the month archive
    Archives {
        #[arg(long)]
        year: Option<String>,
        #[arg(long, requires = "year")]
        month: Option<String>,
        /// Group months under their year
        #[arg(long, conflicts_with_all = ["year", "month"])]
        grouped: bool,
    },
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = match &self.url {
            Some(url) => StoreConfig::from_url(url).context("invalid --url")?,
            None => StoreConfig::from_env().context("store configuration missing from environment")?,
        };
        let archive = Archive::open(&config).context("failed to open aggregate store")?;

        match self.command {
            Command::Apply { file } => apply(&archive, &file).await,
            Command::List { dimension_type, all } => {
                let values = if all {
                    archive.queries().list_dimension_values_unfiltered(&dimension_type).await?
                } else {
                    archive.queries().list_dimension_values(&dimension_type).await?
                };
                print_json(&values)
            }
            Command::Get { dimension_type, value } => {
                print_json(&archive.queries().get_dimension(&dimension_type, &value).await?)
            }
            Command::Archives { year, month, grouped } => {
                if grouped {
                    return print_json(&archive.queries().year_archives().await?);
                }
                let request = match (year, month) {
                    (Some(year), Some(month)) => ArchiveRequest::Month { year, month },
                    (Some(year), None) => ArchiveRequest::Year(year),
                    _ => ArchiveRequest::All,
                };
                print_json(&archive.queries().archives(request).await?)
            }
        }
    }
}

async fn apply(archive: &Archive, file: &Path) -> Result<()> {
    let raw = fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let batch = StreamBatch::from_json(&raw)?;
    let report = archive.process(batch).await;
    archive.store().checkpoint().await.context("failed to checkpoint store")?;

    print_json(&report)?;
    eprintln!("{}", report.summary());
    if report.failed() > 0 {
        bail!(
            "{} event(s) failed, {} retryable",
            report.failed(),
            report.retry_events().len()
        );
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
