//! Dispatch configuration.
//!
//! [`FanoutConfig`] mirrors the TOML file and keeps every field optional.
//! [`DispatchSettings`] is the validated form the pool and the composite session run
//! on: chunk size within the endpoint ceiling, concurrency of at least one, and
//! concrete timeouts.
//!
//! ```toml
//! [dispatch]
//! chunk_size = 25
//! concurrency = 32
//! timeout_seconds = 120
//! connect_timeout_seconds = 30
//! allow_http = false
//! reference_prefix = "RefId"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use fanout_types::{DEFAULT_REFERENCE_PREFIX, MAX_COMPOSITE_SUBREQUESTS, UsageError};
use serde::Deserialize;
use thiserror::Error;

pub const ENV_CHUNK_SIZE: &str = "FANOUT_CHUNK_SIZE";
pub const ENV_CONCURRENCY: &str = "FANOUT_CONCURRENCY";
pub const ENV_TIMEOUT_SECS: &str = "FANOUT_TIMEOUT_SECS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },
    #[error(transparent)]
    Invalid(#[from] UsageError),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FanoutConfig {
    pub dispatch: Option<DispatchConfig>,
}

/// `[dispatch]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchConfig {
    /// Sub-requests per composite envelope. Default: 25.
    pub chunk_size: Option<usize>,

    /// Maximum simultaneous envelope calls. Default: 32.
    pub concurrency: Option<usize>,

    /// Per-call timeout in seconds, 0 disables. Default: 120.
    pub timeout_seconds: Option<u64>,

    /// Connect timeout in seconds. Default: 30.
    pub connect_timeout_seconds: Option<u64>,

    /// Permit plain-http base URLs (local test servers, proxies).
    #[serde(default)]
    pub allow_http: bool,

    /// Prefix for generated reference ids. Default: "RefId".
    pub reference_prefix: Option<String>,
}

impl DispatchConfig {
    pub const DEFAULT_CHUNK_SIZE: usize = MAX_COMPOSITE_SUBREQUESTS;
    pub const DEFAULT_CONCURRENCY: usize = 32;
    pub const DEFAULT_TIMEOUT_SECONDS: u64 = 120;
    pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 30;

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(Self::DEFAULT_CHUNK_SIZE)
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or(Self::DEFAULT_CONCURRENCY)
    }

    #[must_use]
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
            .unwrap_or(Self::DEFAULT_TIMEOUT_SECONDS)
    }

    #[must_use]
    pub fn connect_timeout_seconds(&self) -> u64 {
        self.connect_timeout_seconds
            .unwrap_or(Self::DEFAULT_CONNECT_TIMEOUT_SECONDS)
    }
}

impl FanoutConfig {
    /// Load configuration from `path`. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// Apply `FANOUT_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dispatch = self.dispatch.get_or_insert_with(DispatchConfig::default);

        if let Some(value) = parse_override::<usize>(&lookup, ENV_CHUNK_SIZE)? {
            dispatch.chunk_size = Some(value);
        }
        if let Some(value) = parse_override::<usize>(&lookup, ENV_CONCURRENCY)? {
            dispatch.concurrency = Some(value);
        }
        if let Some(value) = parse_override::<u64>(&lookup, ENV_TIMEOUT_SECS)? {
            dispatch.timeout_seconds = Some(value);
        }
        Ok(())
    }

    pub fn settings(&self) -> Result<DispatchSettings, ConfigError> {
        let dispatch = self.dispatch.clone().unwrap_or_default();
        Ok(DispatchSettings::from_config(&dispatch)?)
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::Env { var, value: raw })
}

// ============================================================================
// Validated settings
// ============================================================================

/// Validated dispatch settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    chunk_size: usize,
    concurrency: usize,
    timeout: Option<Duration>,
    connect_timeout: Duration,
    allow_http: bool,
    reference_prefix: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            chunk_size: DispatchConfig::DEFAULT_CHUNK_SIZE,
            concurrency: DispatchConfig::DEFAULT_CONCURRENCY,
            timeout: Some(Duration::from_secs(DispatchConfig::DEFAULT_TIMEOUT_SECONDS)),
            connect_timeout: Duration::from_secs(DispatchConfig::DEFAULT_CONNECT_TIMEOUT_SECONDS),
            allow_http: false,
            reference_prefix: DEFAULT_REFERENCE_PREFIX.to_string(),
        }
    }
}

impl DispatchSettings {
    pub fn new(chunk_size: usize, concurrency: usize) -> Result<Self, UsageError> {
        Self::default()
            .with_chunk_size(chunk_size)?
            .with_concurrency(concurrency)
    }

    pub fn from_config(config: &DispatchConfig) -> Result<Self, UsageError> {
        let timeout = match config.timeout_seconds() {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let reference_prefix = config
            .reference_prefix
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REFERENCE_PREFIX.to_string());

        let settings = Self {
            timeout,
            connect_timeout: Duration::from_secs(config.connect_timeout_seconds()),
            allow_http: config.allow_http,
            reference_prefix,
            ..Self::default()
        };
        settings
            .with_chunk_size(config.chunk_size())?
            .with_concurrency(config.concurrency())
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self, UsageError> {
        if chunk_size == 0 {
            return Err(UsageError::InvalidChunkSize { value: chunk_size });
        }
        if chunk_size > MAX_COMPOSITE_SUBREQUESTS {
            return Err(UsageError::ChunkSizeAboveLimit {
                value: chunk_size,
                limit: MAX_COMPOSITE_SUBREQUESTS,
            });
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self, UsageError> {
        if concurrency == 0 {
            return Err(UsageError::InvalidConcurrency { value: concurrency });
        }
        self.concurrency = concurrency;
        Ok(self)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_allow_http(mut self, allow_http: bool) -> Self {
        self.allow_http = allow_http;
        self
    }

    #[must_use]
    pub fn with_reference_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reference_prefix = prefix.into();
        self
    }

    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub const fn allow_http(&self) -> bool {
        self.allow_http
    }

    #[must_use]
    pub fn reference_prefix(&self) -> &str {
        &self.reference_prefix
    }
}
