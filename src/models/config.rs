//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::utils::datetime::parse_w3c;
use crate::utils::mapper::Mapper;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Harvest endpoint and HTTP behavior
    #[serde(default)]
    pub harvest: HarvestConfig,

    /// Incremental polling schedule
    #[serde(default)]
    pub poll: PollConfig,

    /// Catalog publishing
    #[serde(default)]
    pub publish: PublishConfig,

    /// In-memory change-set producer
    #[serde(default)]
    pub change_memory: ChangeMemoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.harvest.endpoint.trim().is_empty() {
            return Err(AppError::validation("harvest.endpoint is empty"));
        }
        Url::parse(&self.harvest.endpoint).map_err(|e| {
            AppError::validation(format!(
                "harvest.endpoint '{}' is not a URL: {e}",
                self.harvest.endpoint
            ))
        })?;
        self.harvest.from_datetime()?;
        if self.harvest.metadata_prefix.trim().is_empty() {
            return Err(AppError::validation("harvest.metadata_prefix is empty"));
        }
        if self.harvest.user_agent.trim().is_empty() {
            return Err(AppError::validation("harvest.user_agent is empty"));
        }
        if self.harvest.timeout_secs == 0 {
            return Err(AppError::validation("harvest.timeout_secs must be > 0"));
        }
        if self.poll.interval_secs == 0 {
            return Err(AppError::validation("poll.interval_secs must be > 0"));
        }
        Url::parse(&self.publish.base_uri).map_err(|e| {
            AppError::validation(format!(
                "publish.base_uri '{}' is not a URL: {e}",
                self.publish.base_uri
            ))
        })?;
        if self.publish.max_sitemap_entries == 0 {
            return Err(AppError::validation(
                "publish.max_sitemap_entries must be > 0",
            ));
        }
        if self.publish.interval_secs == 0 {
            return Err(AppError::validation("publish.interval_secs must be > 0"));
        }
        if self.publish.basename.trim().is_empty() {
            return Err(AppError::validation("publish.basename is empty"));
        }
        self.publish.mapper()?;
        if self.change_memory.max_changes < -1 || self.change_memory.max_changes == 0 {
            return Err(AppError::validation(
                "change_memory.max_changes must be positive or -1",
            ));
        }
        Ok(())
    }
}

/// Harvest endpoint and HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Base URL of the OAI-PMH endpoint
    #[serde(default)]
    pub endpoint: String,

    /// Lower bound for the initial harvest (W3C datetime)
    #[serde(default)]
    pub from_date: Option<String>,

    #[serde(default = "defaults::metadata_prefix")]
    pub metadata_prefix: String,

    /// Delay between result pages in milliseconds
    #[serde(default)]
    pub page_delay_ms: u64,

    /// Backoff when a 503 carries no Retry-After header
    #[serde(default = "defaults::retry_secs")]
    pub default_retry_secs: u64,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Also track the GetRecord URL of each metadata record
    #[serde(default)]
    pub track_metadata_records: bool,
}

impl HarvestConfig {
    /// Parsed `from_date`, if configured.
    pub fn from_datetime(&self) -> Result<Option<DateTime<Utc>>> {
        self.from_date
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(parse_w3c)
            .transpose()
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            from_date: None,
            metadata_prefix: defaults::metadata_prefix(),
            page_delay_ms: 0,
            default_retry_secs: defaults::retry_secs(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            track_metadata_records: false,
        }
    }
}

/// Incremental polling schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,

    /// Stop after this many rounds (0 runs until cancelled)
    #[serde(default)]
    pub max_runs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::interval(),
            max_runs: 0,
        }
    }
}

/// Catalog publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Public URI under which output_dir is served
    #[serde(default = "defaults::base_uri")]
    pub base_uri: String,

    #[serde(default = "defaults::output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "defaults::temp_dir")]
    pub temp_dir: PathBuf,

    /// File name of the single document or index
    #[serde(default = "defaults::basename")]
    pub basename: String,

    #[serde(default = "defaults::max_sitemap_entries")]
    pub max_sitemap_entries: usize,

    #[serde(default = "defaults::enabled")]
    pub allow_multifile: bool,

    #[serde(default)]
    pub pretty_xml: bool,

    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,

    /// `uri=path` pairs, or exactly `[uri, path]`
    #[serde(default)]
    pub mappings: Vec<String>,
}

impl PublishConfig {
    /// Mapper from configured mappings, or `base_uri=output_dir` if none.
    pub fn mapper(&self) -> Result<Mapper> {
        if self.mappings.is_empty() {
            let output = self.output_dir.to_string_lossy();
            return Mapper::parse(&[self.base_uri.as_str(), &*output]);
        }
        Mapper::parse(self.mappings.as_slice())
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            base_uri: defaults::base_uri(),
            output_dir: defaults::output_dir(),
            temp_dir: defaults::temp_dir(),
            basename: defaults::basename(),
            max_sitemap_entries: defaults::max_sitemap_entries(),
            allow_multifile: true,
            pretty_xml: false,
            interval_secs: defaults::interval(),
            mappings: Vec::new(),
        }
    }
}

/// Change memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeMemoryConfig {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Path segment below base_uri for change-set documents
    #[serde(default = "defaults::uri_path")]
    pub uri_path: String,

    /// Bound on remembered changes (-1 is unbounded)
    #[serde(default = "defaults::max_changes")]
    pub max_changes: i64,
}

impl ChangeMemoryConfig {
    /// Limit as a count, `None` when unbounded. Zero is treated as
    /// unbounded; `validate` rejects it for loaded configs.
    pub fn limit(&self) -> Option<usize> {
        usize::try_from(self.max_changes).ok().filter(|&n| n > 0)
    }
}

impl Default for ChangeMemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            uri_path: defaults::uri_path(),
            max_changes: defaults::max_changes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Harvest defaults
    pub fn metadata_prefix() -> String {
        "oai_dc".into()
    }
    pub fn retry_secs() -> u64 {
        10
    }
    pub fn user_agent() -> String {
        concat!("resync-oai/", env!("CARGO_PKG_VERSION")).into()
    }
    pub fn timeout() -> u64 {
        30
    }

    // Schedule defaults
    pub fn interval() -> u64 {
        60
    }

    // Publish defaults
    pub fn base_uri() -> String {
        "http://localhost:8888/".into()
    }
    pub fn output_dir() -> PathBuf {
        PathBuf::from("storage/static")
    }
    pub fn temp_dir() -> PathBuf {
        PathBuf::from("storage/tmp")
    }
    pub fn basename() -> String {
        "sitemap.xml".into()
    }
    pub fn max_sitemap_entries() -> usize {
        50_000
    }
    pub fn enabled() -> bool {
        true
    }

    // Change memory defaults
    pub fn uri_path() -> String {
        "changeset".into()
    }
    pub fn max_changes() -> i64 {
        1000
    }

    pub fn level() -> String {
        "info".into()
    }
}
