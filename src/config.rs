//! Configuration for enrichr.
//!
//! Configuration sources (highest priority first):
//! 1. CLI flags (applied by the caller on top of the resolved config)
//! 2. Environment variables (ENRICHR_HOME, ENRICHR_MAX_IN_FLIGHT, ...)
//! 3. Config file (.enrichr/config.yaml)
//! 4. Defaults (~/.enrichr)
//!
//! Config file discovery:
//! - Searches current directory and parents for .enrichr/config.yaml
//! - Relative store paths are resolved against the project root (the parent of .enrichr/)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::core::ProcessorConfig;
use crate::domain::Payload;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub version: Option<String>,
    /// Engine state directory (relative to the .enrichr/ directory)
    pub home: Option<String>,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub enrichment: EnrichmentSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSection {
    pub kind: Option<StoreKind>,
    /// Store file (relative to the project root)
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnrichmentSection {
    /// HTTP provider endpoint; takes precedence over static attributes
    pub url: Option<String>,
    /// Fixed attributes added to every event
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Storage backends selectable from config or the CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Newline-delimited JSON file
    #[default]
    Jsonl,
    /// SQLite database file
    Sqlite,
    /// Process memory only (lost on exit)
    Memory,
}

impl StoreKind {
    fn default_file_name(self) -> &'static str {
        match self {
            StoreKind::Jsonl | StoreKind::Memory => "events.jsonl",
            StoreKind::Sqlite => "events.db",
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Absolute path to enrichr home (engine state)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Processor limits and retry policy
    pub processor: ProcessorConfig,
    pub store_kind: StoreKind,
    /// Explicit store file, if configured
    pub store_path: Option<PathBuf>,
    pub enrich_url: Option<String>,
    pub attributes: Payload,
}

impl ResolvedConfig {
    /// Store file for `kind`: the configured path, or one under home
    pub fn store_path_for(&self, kind: StoreKind) -> PathBuf {
        match &self.store_path {
            Some(path) if kind == self.store_kind => path.clone(),
            _ => self.home.join("store").join(kind.default_file_name()),
        }
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".enrichr").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Default home directory (~/.enrichr)
fn default_home() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".enrichr"))
}

/// Overlay ENRICHR_* variables onto processor settings
fn apply_env_overrides<F>(config: &mut ProcessorConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: FromStr>(name: &str, raw: String) -> Result<T>
    where
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        raw.trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: '{}'", name, raw))
    }

    if let Some(raw) = lookup("ENRICHR_MAX_IN_FLIGHT") {
        config.max_in_flight = parse("ENRICHR_MAX_IN_FLIGHT", raw)?;
    }
    if let Some(raw) = lookup("ENRICHR_MAX_QUEUED") {
        config.max_queued = parse("ENRICHR_MAX_QUEUED", raw)?;
    }
    if let Some(raw) = lookup("ENRICHR_CALL_TIMEOUT_MS") {
        config.call_timeout_ms = parse("ENRICHR_CALL_TIMEOUT_MS", raw)?;
    }
    if let Some(raw) = lookup("ENRICHR_DEDUP_TTL_MS") {
        config.dedup_ttl_ms = parse("ENRICHR_DEDUP_TTL_MS", raw)?;
    }
    if let Some(raw) = lookup("ENRICHR_MAX_RETRIES") {
        config.retry.max_retries = parse("ENRICHR_MAX_RETRIES", raw)?;
    }
    Ok(())
}

fn resolve<F>(config_file: Option<PathBuf>, lookup: F) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let file = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    // .enrichr/ and the project root above it
    let config_dir = config_file.as_deref().and_then(Path::parent);
    let project_root = config_dir.and_then(Path::parent).unwrap_or(Path::new("."));

    let home = if let Some(env_home) = lookup("ENRICHR_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(dir), Some(home)) = (config_dir, file.home.as_deref()) {
        resolve_path(dir, home)
    } else {
        default_home()?
    };

    let mut processor = file.processor;
    apply_env_overrides(&mut processor, &lookup)?;

    let store_path = file
        .store
        .path
        .as_deref()
        .map(|p| resolve_path(project_root, p));

    Ok(ResolvedConfig {
        home,
        config_file,
        processor,
        store_kind: file.store.kind.unwrap_or_default(),
        store_path,
        enrich_url: file.enrichment.url,
        attributes: file.enrichment.attributes.into_iter().collect(),
    })
}

/// Load configuration from all sources.
///
/// `explicit` skips discovery and reads that file instead.
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_file = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            find_config_file(&cwd)
        }
    };

    resolve(config_file, |name| std::env::var(name).ok())
}
