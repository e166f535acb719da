//! Command-line interface for enrichr.
//!
//! Provides commands for running events through the pipeline, listing
//! persisted records, and inspecting the resolved configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;

use crate::adapters::{
    Enricher, EventStore, HttpEnricher, JsonlStore, MemoryStore, SqliteStore, StaticEnricher,
};
use crate::config::{load_config, ResolvedConfig, StoreKind};
use crate::core::EventProcessor;
use crate::dispatch::{LineDispatcher, Summary};
use crate::domain::{EnrichedEvent, Outcome};

/// enrichr - Event enrichment pipeline
#[derive(Parser, Debug)]
#[command(name = "enrichr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to .enrichr/config.yaml in this or a parent directory)
    #[arg(short, long, global = true, env = "ENRICHR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process JSONL events, one response line per event on stdout
    Run {
        /// Input file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Storage backend
        #[arg(short, long, value_enum)]
        store: Option<StoreKind>,

        /// Store file (defaults under ENRICHR_HOME/store)
        #[arg(long)]
        store_path: Option<PathBuf>,

        /// HTTP enrichment endpoint
        #[arg(long, conflicts_with = "attr")]
        enrich_url: Option<String>,

        /// Static enrichment attribute (key=value, repeatable)
        #[arg(short, long)]
        attr: Vec<String>,

        /// Assign ids to messages that carry none
        #[arg(long)]
        assign_ids: bool,

        /// Maximum events processed at once
        #[arg(long)]
        max_in_flight: Option<usize>,

        /// Maximum events waiting for a slot
        #[arg(long)]
        max_queued: Option<usize>,

        /// Retries per capability call after the first attempt
        #[arg(long)]
        max_retries: Option<u32>,

        /// Timeout per capability call in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// List persisted records
    Records {
        /// Storage backend
        #[arg(short, long, value_enum)]
        store: Option<StoreKind>,

        /// Store file (defaults under ENRICHR_HOME/store)
        #[arg(long)]
        store_path: Option<PathBuf>,

        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let mut config = load_config(self.config.as_deref())?;

        match self.command {
            Commands::Run {
                input,
                store,
                store_path,
                enrich_url,
                attr,
                assign_ids,
                max_in_flight,
                max_queued,
                max_retries,
                timeout_ms,
            } => {
                if let Some(n) = max_in_flight {
                    config.processor.max_in_flight = n;
                }
                if let Some(n) = max_queued {
                    config.processor.max_queued = n;
                }
                if let Some(n) = max_retries {
                    config.processor.retry.max_retries = n;
                }
                if let Some(ms) = timeout_ms {
                    config.processor.call_timeout_ms = ms;
                }

                let enricher = build_enricher(&config, enrich_url, &attr)?;
                let kind = store.unwrap_or(config.store_kind);
                let path = store_path.unwrap_or_else(|| config.store_path_for(kind));
                let store = open_store(kind, path).await?;

                run_events(&config, enricher, store, input, assign_ids).await
            }

            Commands::Records {
                store,
                store_path,
                limit,
            } => {
                let kind = store.unwrap_or(config.store_kind);
                let path = store_path.unwrap_or_else(|| config.store_path_for(kind));
                list_records(kind, path, limit).await
            }

            Commands::Config => show_config(&config),
        }
    }
}

fn build_enricher(
    config: &ResolvedConfig,
    enrich_url: Option<String>,
    attrs: &[String],
) -> Result<Arc<dyn Enricher>> {
    // Flags on the command line beat anything from the config file
    if !attrs.is_empty() {
        return Ok(Arc::new(StaticEnricher::from_pairs(attrs)?));
    }

    match enrich_url.or_else(|| config.enrich_url.clone()) {
        Some(url) => Ok(Arc::new(HttpEnricher::new(url))),
        None => Ok(Arc::new(StaticEnricher::new(config.attributes.clone()))),
    }
}

async fn open_store(kind: StoreKind, path: PathBuf) -> Result<Arc<dyn EventStore>> {
    Ok(match kind {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::Jsonl => Arc::new(JsonlStore::open(path).await?),
        StoreKind::Sqlite => Arc::new(SqliteStore::open(&path)?),
    })
}

async fn run_events(
    config: &ResolvedConfig,
    enricher: Arc<dyn Enricher>,
    store: Arc<dyn EventStore>,
    input: Option<PathBuf>,
    assign_ids: bool,
) -> Result<()> {
    let processor = EventProcessor::new(enricher, store, config.processor.clone())
        .context("Invalid processor configuration")?;
    let dispatcher = LineDispatcher::new(processor).assign_missing_ids(assign_ids);
    let stdout = tokio::io::stdout();

    let summary = match input {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open input file: {}", path.display()))?;
            dispatcher.run(BufReader::new(file), stdout).await?
        }
        None => {
            dispatcher
                .run(BufReader::new(tokio::io::stdin()), stdout)
                .await?
        }
    };

    print_summary(&summary, &dispatcher);
    Ok(())
}

fn print_summary(summary: &Summary, dispatcher: &LineDispatcher) {
    eprintln!();
    eprintln!("Processed {} event(s)", summary.total());
    for outcome in Outcome::ALL {
        let count = summary.count(outcome);
        if count > 0 {
            eprintln!("  {:<18} {}", outcome, count);
        }
    }

    let stats = dispatcher.processor().stats();
    eprintln!(
        "  calls: enrich={} store={} retries={} dedup_hits={}",
        stats.enrich_calls, stats.store_calls, stats.retries, stats.dedup_hits
    );
}

async fn list_records(kind: StoreKind, path: PathBuf, limit: usize) -> Result<()> {
    let records: Vec<EnrichedEvent> = match kind {
        StoreKind::Memory => anyhow::bail!("The memory store keeps nothing between runs"),
        StoreKind::Jsonl => {
            let store = JsonlStore::open(path).await?;
            let mut records = store.replay().await?;
            // Most recent first, matching the SQLite listing
            records.reverse();
            records.truncate(limit);
            records
        }
        StoreKind::Sqlite => SqliteStore::open(&path)?.records(limit).await?,
    };

    if records.is_empty() {
        println!("No records found.");
        return Ok(());
    }

    for record in &records {
        println!(
            "{}",
            serde_json::to_string(record).context("Failed to serialize record")?
        );
    }
    Ok(())
}

fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!("enrichr Configuration");
    println!("=====================");
    println!();

    match &config.config_file {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (none found, using defaults)"),
    }
    println!();

    let yaml = serde_yaml::to_string(config).context("Failed to render configuration")?;
    print!("{}", yaml);
    Ok(())
}
