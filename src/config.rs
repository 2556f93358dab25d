//! Configuration with layered resolution using figment.
//!
//! Resolution order (highest priority last):
//! 1. User config: `~/.config/agekit/config.toml` (XDG) or platform config dir
//! 2. Project config: `.agekit.toml`
//! 3. Environment variables: `AGEKIT_*`
//!
//! Everything here is also plainly constructible, so embedders and tests
//! can build isolated configurations without touching the filesystem.

use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::error::Error;
use crate::staging::valid_identifier;

/// Root client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    /// Request TLS from the server. The client dials with the driver's
    /// plain connector; this only sets the negotiated ssl mode.
    #[serde(default)]
    pub ssl: bool,
    /// Relational schema housing the staging table (default `public`).
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Search path applied to every new session. Must include the
    /// engine's catalog schema `ag_catalog`; when unset, a path of
    /// `ag_catalog, <schema>` is used.
    pub search_path: Option<String>,
    /// Schema housing the staging functions.
    #[serde(default = "default_temp_schema")]
    pub temp_schema: String,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Default per-statement timeout in milliseconds, if any.
    pub statement_timeout_millis: Option<u64>,
    /// Default end-to-end transaction timeout in milliseconds, if any.
    pub transaction_timeout_millis: Option<u64>,
}

fn default_port() -> u16 {
    5432
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_temp_schema() -> String {
    "age_client".to_string()
}

/// Connection pool sizing and timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Hard cap on concurrent sessions.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Sessions created eagerly when the pool is built.
    #[serde(default)]
    pub min_idle: usize,
    /// How long an acquire may wait for a free session.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_millis: u64,
    /// Dial timeout for a new session.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_millis: u64,
    /// Idle sessions older than this are discarded on next acquire.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_millis: u64,
}

fn default_max_size() -> usize {
    16
}

fn default_acquire_timeout() -> u64 {
    30_000
}

fn default_connection_timeout() -> u64 {
    30_000
}

fn default_idle_timeout() -> u64 {
    600_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            min_idle: 0,
            acquire_timeout_millis: default_acquire_timeout(),
            connection_timeout_millis: default_connection_timeout(),
            idle_timeout_millis: default_idle_timeout(),
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_millis)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_millis)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_millis)
    }
}

/// Session-creation retry policy, also consulted by the executor for
/// transient statement failures.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_millis: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_millis: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Fractional jitter applied to each delay (0.1 = ±10%).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    100
}

fn default_max_delay() -> u64 {
    5_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_millis: default_initial_delay(),
            max_delay_millis: default_max_delay(),
            backoff_factor: default_backoff_factor(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Base delay before `attempt` (1-based): `initial × factor^(attempt-1)`,
    /// clamped to `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0);
        let exp = attempt.saturating_sub(1).min(32);
        let millis = (self.initial_delay_millis as f64) * factor.powi(exp as i32);
        Duration::from_millis((millis as u64).min(self.max_delay_millis))
    }

    /// Delay with jitter applied, for actual sleeping.
    pub(crate) fn jittered_delay(&self, attempt: u32) -> Duration {
        use rand::Rng;
        let base = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = self.jitter.min(1.0);
        let factor = rand::thread_rng().gen_range(1.0 - spread..=1.0 + spread);
        base.mul_f64(factor)
    }
}

impl ClientConfig {
    /// Load config from layered sources; later sources override earlier
    /// ones, with environment variables winning over every file.
    pub fn load() -> Result<Self, Error> {
        let mut figment = Figment::new();
        for path in Self::config_file_candidates() {
            figment = figment.merge(Toml::file(path));
        }
        // AGEKIT_POOL__MAX_SIZE maps to pool.max_size
        figment = figment.merge(Env::prefixed("AGEKIT_").split("__"));

        let config: ClientConfig = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Config files considered, lowest priority first: the platform
    /// config dir, the XDG location (which overrides it when both
    /// exist), then the project-local file.
    fn config_file_candidates() -> Vec<std::path::PathBuf> {
        let mut candidates = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("agekit").join("config.toml"));
        }
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".config").join("agekit").join("config.toml"));
        }
        candidates.push(std::path::PathBuf::from(".agekit.toml"));
        candidates
    }

    /// Checks invariants that cannot be expressed in the type system.
    pub fn validate(&self) -> Result<(), Error> {
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.database.is_empty() {
            return Err(Error::Config("database must not be empty".into()));
        }
        if !valid_identifier(&self.schema) {
            return Err(Error::Config(format!(
                "schema '{}' is not a valid identifier",
                self.schema
            )));
        }
        if !valid_identifier(&self.temp_schema) {
            return Err(Error::Config(format!(
                "temp_schema '{}' is not a valid identifier",
                self.temp_schema
            )));
        }
        if let Some(path) = &self.search_path {
            if !path.split(',').any(|s| s.trim() == "ag_catalog") {
                return Err(Error::Config(
                    "search_path must include ag_catalog".into(),
                ));
            }
        }
        if self.pool.max_size == 0 {
            return Err(Error::Config("pool.max_size must be at least 1".into()));
        }
        if self.pool.min_idle > self.pool.max_size {
            return Err(Error::Config(
                "pool.min_idle must not exceed pool.max_size".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(Error::Config(
                "retry.backoff_factor must be at least 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Search path for new sessions; always resolves the engine catalog.
    pub fn effective_search_path(&self) -> String {
        match &self.search_path {
            Some(path) => path.clone(),
            None => format!("ag_catalog, {}", self.schema),
        }
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_millis.map(Duration::from_millis)
    }

    pub fn transaction_timeout(&self) -> Option<Duration> {
        self.transaction_timeout_millis.map(Duration::from_millis)
    }

    /// Driver configuration for dialing a session.
    pub(crate) fn pg_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .application_name("agekit")
            .connect_timeout(self.pool.connection_timeout());
        if let Some(password) = &self.password {
            pg.password(password);
        }
        pg.ssl_mode(if self.ssl {
            tokio_postgres::config::SslMode::Prefer
        } else {
            tokio_postgres::config::SslMode::Disable
        });
        pg
    }
}
