use crate::aggregation::{AggregationEngine, DEFAULT_MAX_IN_FLIGHT};
use crate::core::{ArchiveError, Result};
use crate::storage::{DurabilityMode, InMemoryAggregateStore};
use std::path::PathBuf;
use std::sync::Arc;

pub const ENV_ENDPOINT: &str = "ARCHIVE_STORE_ENDPOINT";
pub const ENV_TABLE: &str = "AGGREGATES_TABLE";
pub const ENV_TYPE_INDEX: &str = "AGGREGATES_TYPE_INDEX";
pub const ENV_DURABILITY: &str = "ARCHIVE_DURABILITY";
pub const ENV_CHECKPOINT_THRESHOLD: &str = "ARCHIVE_CHECKPOINT_THRESHOLD";
pub const ENV_MAX_IN_FLIGHT: &str = "ARCHIVE_MAX_IN_FLIGHT";

const URL_SCHEME: &str = "archivedb://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEndpoint {
    /// `memory://`
    Memory,
    /// `file://<dir>`
    Directory(PathBuf),
}

impl StoreEndpoint {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw == "memory://" || raw == "memory" {
            return Ok(Self::Memory);
        }
        match raw.strip_prefix("file://") {
            Some(path) if !path.is_empty() => Ok(Self::Directory(PathBuf::from(path))),
            _ => Err(ArchiveError::Config(format!(
                "store endpoint '{}' must be 'memory://' or 'file://<dir>'",
                raw
            ))),
        }
    }
}

/// Aggregate store configuration
///
/// Built once at process start; the store it opens is shared by every
/// request handler.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Where records live
    pub endpoint: StoreEndpoint,

    /// Aggregate table name, also the file stem of its WAL and snapshot
    pub table: String,

    /// Name of the dimension-type index
    pub type_index: String,

    /// WAL fsync policy for directory endpoints
    pub durability_mode: DurabilityMode,

    /// WAL entries between snapshot checkpoints
    pub checkpoint_threshold: usize,

    /// Merges dispatched concurrently by the engine
    pub max_in_flight: usize,
}

impl StoreConfig {
    pub fn new(table: &str, type_index: &str) -> Self {
        Self {
            endpoint: StoreEndpoint::Memory,
            table: table.to_string(),
            type_index: type_index.to_string(),
            durability_mode: DurabilityMode::default(),
            checkpoint_threshold: 1000,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn endpoint(mut self, endpoint: StoreEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.endpoint = StoreEndpoint::Directory(dir.into());
        self
    }

    pub fn durability_mode(mut self, mode: DurabilityMode) -> Self {
        self.durability_mode = mode;
        self
    }

    pub fn checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }

    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ArchiveError::Config(format!("environment variable {} is not set", name)))
        };

        let endpoint = StoreEndpoint::parse(&required(ENV_ENDPOINT)?)?;
        let mut config = Self::new(&required(ENV_TABLE)?, &required(ENV_TYPE_INDEX)?).endpoint(endpoint);

        if let Some(mode) = lookup(ENV_DURABILITY) {
            config.durability_mode = mode.parse()?;
        }
        if let Some(raw) = lookup(ENV_CHECKPOINT_THRESHOLD) {
            config.checkpoint_threshold = parse_number(ENV_CHECKPOINT_THRESHOLD, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_IN_FLIGHT) {
            config.max_in_flight = parse_number(ENV_MAX_IN_FLIGHT, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse from connection string
    ///
    /// Format: `archivedb://<table>@<memory|dir>?index=<name>[&durability=<mode>]`
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| ArchiveError::Config(format!("URL must start with '{}'", URL_SCHEME)))?;
        let (table, rest) = rest
            .split_once('@')
            .ok_or_else(|| ArchiveError::Config("URL is missing '<table>@'".to_string()))?;
        let (location, query) = rest.split_once('?').unwrap_or((rest, ""));

        let endpoint = if location == "memory" {
            StoreEndpoint::Memory
        } else if location.is_empty() {
            return Err(ArchiveError::Config("URL is missing a store location".to_string()));
        } else {
            StoreEndpoint::Directory(PathBuf::from(location))
        };

        let mut type_index = None;
        let mut durability_mode = DurabilityMode::default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some(("index", value)) => type_index = Some(value.to_string()),
                Some(("durability", value)) => durability_mode = value.parse()?,
                _ => {
                    return Err(ArchiveError::Config(format!("unknown URL parameter '{}'", pair)));
                }
            }
        }
        let type_index =
            type_index.ok_or_else(|| ArchiveError::Config("URL is missing '?index=<name>'".to_string()))?;

        let config = Self::new(table, &type_index)
            .endpoint(endpoint)
            .durability_mode(durability_mode);
        config.validate()?;
        Ok(config)
    }

    pub fn to_url(&self) -> String {
        let location = match &self.endpoint {
            StoreEndpoint::Memory => "memory".to_string(),
            StoreEndpoint::Directory(dir) => dir.display().to_string(),
        };
        let durability = match self.durability_mode {
            DurabilityMode::Sync => "sync",
            DurabilityMode::Async => "async",
            DurabilityMode::None => "none",
        };
        format!(
            "{}{}@{}?index={}&durability={}",
            URL_SCHEME, self.table, location, self.type_index, durability
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(ArchiveError::Config("table name cannot be empty".to_string()));
        }
        if self.type_index.is_empty() {
            return Err(ArchiveError::Config("type index name cannot be empty".to_string()));
        }
        if self.checkpoint_threshold == 0 {
            return Err(ArchiveError::Config("checkpoint_threshold must be > 0".to_string()));
        }
        if self.max_in_flight == 0 {
            return Err(ArchiveError::Config("max_in_flight must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn open_store(&self) -> Result<Arc<InMemoryAggregateStore>> {
        self.validate()?;
        let store = match &self.endpoint {
            StoreEndpoint::Memory => InMemoryAggregateStore::new(),
            StoreEndpoint::Directory(dir) => InMemoryAggregateStore::open(
                dir,
                &self.table,
                &self.type_index,
                self.durability_mode,
                self.checkpoint_threshold,
            )?,
        };
        Ok(Arc::new(store))
    }

    pub fn engine(&self, store: Arc<InMemoryAggregateStore>) -> AggregationEngine {
        AggregationEngine::new(store).with_max_in_flight(self.max_in_flight)
    }
}

fn parse_number(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| ArchiveError::Config(format!("{} must be a positive integer, got '{}'", name, raw)))
}
