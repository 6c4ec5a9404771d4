//! Configuration types for transistor

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Manager behavior configuration (pool bound, assign-loop pacing, stop policy)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Maximum number of concurrently running units (default: 20)
    ///
    /// Units are the worker drive loops, the assign loop and, when broker-backed,
    /// the consume loop. To run every worker at once this should be at least the
    /// total number of workers + 1 (+1 more when broker-backed); otherwise excess
    /// units wait for a free slot.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// How long the assign loop waits on one tracker pop (default: 500 ms)
    ///
    /// Every worker `qtimeout` must be strictly greater than this value, or idle
    /// workers retire while the manager is merely slow.
    #[serde(default = "default_pop_timeout", with = "duration_ms_serde")]
    pub pop_timeout: Duration,

    /// Stop the whole manager once the tracker queues are exhausted (default: false)
    #[serde(default)]
    pub should_stop: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            pop_timeout: default_pop_timeout(),
            should_stop: false,
        }
    }
}

/// Retry behavior for transient upstream faults inside one rendering session
///
/// The backoff is drawn uniformly from `min_backoff..=max_backoff`. The defaults
/// respect the minimum spacing a proxied rendering session needs between two
/// requests from the same client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRetryConfig {
    /// Maximum number of replays per session (default: 5)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Lower bound of the randomized backoff (default: 12 seconds)
    #[serde(default = "default_min_backoff", with = "duration_ms_serde")]
    pub min_backoff: Duration,

    /// Upper bound of the randomized backoff (default: 20 seconds)
    #[serde(default = "default_max_backoff", with = "duration_ms_serde")]
    pub max_backoff: Duration,

    /// Also replay requests that hit the local transport timeout (default: false)
    #[serde(default)]
    pub retry_local_timeout: bool,
}

impl Default for SessionRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            min_backoff: default_min_backoff(),
            max_backoff: default_max_backoff(),
            retry_local_timeout: false,
        }
    }
}

/// Retry behavior for broker receive failures (exponential backoff)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Rendering endpoint connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// The render endpoint requests are POSTed to (default: "http://localhost:8050/execute")
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Basic-auth username for the rendering service
    #[serde(default)]
    pub username: Option<String>,

    /// Basic-auth password for the rendering service
    #[serde(default)]
    pub password: Option<String>,

    /// TCP connect timeout for the HTTP client (default: 3050 ms)
    #[serde(default = "default_connect_timeout", with = "duration_ms_serde")]
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            username: None,
            password: None,
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl SessionConfig {
    /// Fill in credentials from `SPLASH_USERNAME` / `SPLASH_PASSWORD` when present
    pub fn with_env_credentials(mut self) -> Self {
        if let Ok(user) = std::env::var("SPLASH_USERNAME") {
            self.username = Some(user);
        }
        if let Ok(pass) = std::env::var("SPLASH_PASSWORD") {
            self.password = Some(pass);
        }
        self
    }

    /// Parse and check the endpoint URL
    pub fn endpoint_url(&self) -> Result<url::Url> {
        let parsed = url::Url::parse(&self.endpoint).map_err(|e| {
            Error::config(
                format!("invalid endpoint '{}': {}", self.endpoint, e),
                "session.endpoint",
            )
        })?;
        match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            other => Err(Error::config(
                format!("unsupported endpoint scheme '{other}'"),
                "session.endpoint",
            )),
        }
    }
}

/// Per-request timeout pair: time to connect, then time allowed for the render
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderTimeout {
    /// Connect timeout
    #[serde(with = "duration_ms_serde")]
    pub connect: Duration,
    /// Read/render timeout
    #[serde(with = "duration_ms_serde")]
    pub read: Duration,
}

impl RenderTimeout {
    /// Build a timeout pair
    pub fn new(connect: Duration, read: Duration) -> Self {
        Self { connect, read }
    }

    /// Timeout used by a work group when none is configured: (3.05s, 700s)
    pub fn group_default() -> Self {
        Self::new(Duration::from_millis(3050), Duration::from_secs(700))
    }

    /// Total deadline for one request
    pub fn total(&self) -> Duration {
        self.connect + self.read
    }
}

impl Default for RenderTimeout {
    /// Scraper default: (3.05s, 10.05s)
    fn default() -> Self {
        Self::new(Duration::from_millis(3050), Duration::from_millis(10050))
    }
}

/// Top-level configuration bundle
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Manager settings
    #[serde(default)]
    pub manager: ManagerConfig,

    /// Rendering endpoint settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Per-session retry settings
    #[serde(default)]
    pub session_retry: SessionRetryConfig,

    /// Broker receive retry settings
    #[serde(default)]
    pub broker_retry: RetryConfig,
}

impl Config {
    /// Check every section for values that cannot work
    pub fn validate(&self) -> Result<()> {
        self.manager.validate()?;
        self.session_retry.validate()?;
        self.session.endpoint_url()?;
        Ok(())
    }
}

impl ManagerConfig {
    /// Check pool and pacing settings
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::config(
                "pool_size must be at least 1",
                "manager.pool_size",
            ));
        }
        if self.pop_timeout.is_zero() {
            return Err(Error::config(
                "pop_timeout must be greater than zero",
                "manager.pop_timeout",
            ));
        }
        Ok(())
    }
}

impl SessionRetryConfig {
    /// Check the backoff window
    pub fn validate(&self) -> Result<()> {
        if self.min_backoff > self.max_backoff {
            return Err(Error::config(
                format!(
                    "min_backoff ({:?}) exceeds max_backoff ({:?})",
                    self.min_backoff, self.max_backoff
                ),
                "session_retry.min_backoff",
            ));
        }
        Ok(())
    }
}

fn default_pool_size() -> usize {
    20
}

fn default_pop_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_max_retries() -> u32 {
    5
}

fn default_min_backoff() -> Duration {
    Duration::from_secs(12)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(20)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    "http://localhost:8050/execute".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_millis(3050)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
