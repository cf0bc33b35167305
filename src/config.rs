//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};

/// Prefix for environment variable overrides, e.g. `TOLLGATE_LIMITER__CAPACITY`.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Admission algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Smooth accrual of `refill_rate` tokens per `refill_interval`.
    #[default]
    TokenBucket,
    /// A counter that resets to `capacity` when its key expires.
    FixedWindow,
}

/// Limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Which admission algorithm to run
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Maximum tokens a bucket may hold
    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Tokens granted per refill interval
    #[serde(default = "default_refill_rate")]
    pub refill_rate: u64,

    /// Refill interval in milliseconds (window length for the fixed window)
    #[serde(default = "default_refill_interval_ms")]
    pub refill_interval_ms: u64,

    /// Prefix applied to every store key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Base64-encode identities before using them as store keys
    #[serde(default = "default_encode_keys")]
    pub encode_keys: bool,

    /// Number of lock stripes used to serialize same-identity checks
    #[serde(default = "default_lock_stripes")]
    pub lock_stripes: usize,

    /// Identifier of this limiter instance, used in log lines
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            capacity: default_capacity(),
            refill_rate: default_refill_rate(),
            refill_interval_ms: default_refill_interval_ms(),
            key_prefix: default_key_prefix(),
            encode_keys: default_encode_keys(),
            lock_stripes: default_lock_stripes(),
            instance_id: default_instance_id(),
        }
    }
}

fn default_capacity() -> u64 {
    100
}

fn default_refill_rate() -> u64 {
    10
}

fn default_refill_interval_ms() -> u64 {
    1000
}

fn default_key_prefix() -> String {
    "tollgate:".to_string()
}

fn default_encode_keys() -> bool {
    true
}

fn default_lock_stripes() -> usize {
    64
}

fn default_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl LimiterConfig {
    /// The refill interval as a [`Duration`].
    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }

    /// Reject settings that would make the refill arithmetic meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(TollgateError::Config("capacity must be greater than zero".into()));
        }
        if self.refill_rate == 0 {
            return Err(TollgateError::Config("refill_rate must be greater than zero".into()));
        }
        if self.refill_interval_ms == 0 {
            return Err(TollgateError::Config(
                "refill_interval_ms must be greater than zero".into(),
            ));
        }
        if self.lock_stripes == 0 {
            return Err(TollgateError::Config("lock_stripes must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Which store implementation backs the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process map; state is not shared between processes
    #[default]
    Memory,
    /// Remote Redis server shared by every instance
    Redis,
}

/// Shared store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL for the Redis backend
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Per-call timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_timeout_ms() -> u64 {
    500
}

impl StoreConfig {
    /// The per-call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl TollgateConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `TOLLGATE_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: TollgateConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.limiter.validate()?;
        if self.store.timeout_ms == 0 {
            return Err(TollgateError::Config("store timeout_ms must be greater than zero".into()));
        }
        Ok(())
    }
}
