//! Engine configuration
//!
//! Defaults mirror the production deployment: 600 ticks (~10 minutes of
//! prints) and 390 minute bars (one 6.5 hour session) per instrument, a
//! 10-wide lookup pool with a 10 second per-lookup timeout, and a 5 minute
//! sector snapshot TTL. Every value can be overridden from the environment.

use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;
use thiserror::Error;

/// Maximum ticks retained per instrument.
pub const MAX_TICKS: usize = 600;
/// Maximum minute bars retained per instrument.
pub const MAX_BARS: usize = 390;
/// Default lookup pool width.
pub const DEFAULT_FETCH_POOL_WIDTH: usize = 10;
/// Default per-lookup timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Default sector snapshot TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
/// KST (UTC+09:00); minute keys are rendered in session-local time.
pub const DEFAULT_SESSION_UTC_OFFSET_SECS: i32 = 9 * 3600;

const ENV_MAX_TICKS: &str = "MARKET_DATA_MAX_TICKS";
const ENV_MAX_BARS: &str = "MARKET_DATA_MAX_BARS";
const ENV_FETCH_POOL_WIDTH: &str = "MARKET_DATA_FETCH_POOL_WIDTH";
const ENV_FETCH_TIMEOUT_MS: &str = "MARKET_DATA_FETCH_TIMEOUT_MS";
const ENV_CACHE_TTL_SECS: &str = "MARKET_DATA_CACHE_TTL_SECS";
const ENV_SESSION_UTC_OFFSET_SECS: &str = "MARKET_DATA_SESSION_UTC_OFFSET_SECS";
const ENV_SECTOR_CATALOG: &str = "MARKET_DATA_SECTOR_CATALOG";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read sector catalog {path}: {source}")]
    CatalogIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed sector catalog: {0}")]
    CatalogFormat(#[from] serde_json::Error),

    #[error("sector catalog is invalid: {0}")]
    CatalogInvalid(String),
}

/// Configuration for the market-data engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketDataConfig {
    /// Ticks retained per instrument (FIFO eviction beyond this).
    pub max_ticks: usize,
    /// Minute bars retained per instrument (FIFO eviction beyond this).
    pub max_bars: usize,
    /// Concurrent lookups allowed per fetch batch.
    pub fetch_pool_width: usize,
    /// Timeout applied to each lookup once it starts running.
    pub fetch_timeout: Duration,
    /// Maximum age of a servable sector snapshot set.
    pub cache_ttl: Duration,
    /// Offset of the trading session's local time from UTC, in seconds.
    pub session_utc_offset_secs: i32,
    /// Optional JSON file replacing the built-in sector catalog.
    pub sector_catalog_path: Option<PathBuf>,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            max_ticks: MAX_TICKS,
            max_bars: MAX_BARS,
            fetch_pool_width: DEFAULT_FETCH_POOL_WIDTH,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            session_utc_offset_secs: DEFAULT_SESSION_UTC_OFFSET_SECS,
            sector_catalog_path: None,
        }
    }
}

impl MarketDataConfig {
    /// Build a configuration from `MARKET_DATA_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var::<usize, _>(&lookup, ENV_MAX_TICKS)? {
            config.max_ticks = v;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, ENV_MAX_BARS)? {
            config.max_bars = v;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, ENV_FETCH_POOL_WIDTH)? {
            config.fetch_pool_width = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, ENV_FETCH_TIMEOUT_MS)? {
            config.fetch_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, ENV_CACHE_TTL_SECS)? {
            config.cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<i32, _>(&lookup, ENV_SESSION_UTC_OFFSET_SECS)? {
            config.session_utc_offset_secs = v;
        }
        if let Some(path) = lookup(ENV_SECTOR_CATALOG).filter(|p| !p.trim().is_empty()) {
            config.sector_catalog_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_ticks == 0 {
            return Err(invalid(ENV_MAX_TICKS, self.max_ticks, "must be at least 1"));
        }
        if self.max_bars == 0 {
            return Err(invalid(ENV_MAX_BARS, self.max_bars, "must be at least 1"));
        }
        if self.fetch_pool_width == 0 {
            return Err(invalid(
                ENV_FETCH_POOL_WIDTH,
                self.fetch_pool_width,
                "must be at least 1",
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(invalid(
                ENV_FETCH_TIMEOUT_MS,
                self.fetch_timeout.as_millis(),
                "must be positive",
            ));
        }
        if self.session_offset().is_none() {
            return Err(invalid(
                ENV_SESSION_UTC_OFFSET_SECS,
                self.session_utc_offset_secs,
                "must be within ±86399 seconds",
            ));
        }
        Ok(())
    }

    /// Session-local offset used to render minute keys.
    pub fn session_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.session_utc_offset_secs)
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key,
                value: raw,
                reason: e.to_string(),
            }),
    }
}

fn invalid(key: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
