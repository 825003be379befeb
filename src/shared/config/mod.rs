//! Synchronization configuration module
//!
//! Provides the `SyncConfig` used by the facade and its change subscription.
//! Values come from the builder or from `CONTACT_SYNC_*` environment variables.

use std::time::Duration;
use thiserror::Error;

use crate::sync::retry::BackoffStrategy;

/// Default table the change feed is scoped to
const DEFAULT_TABLE: &str = "contacts";
const DEFAULT_RECONNECT_BASE: Duration = Duration::from_millis(500);
const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);
const DEFAULT_RECONNECT_JITTER: f64 = 0.1;

/// Synchronization configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Table scope of the change feed
    pub table: String,
    /// First reconnect delay after a transport drop
    pub reconnect_base_delay: Duration,
    /// Upper bound on the reconnect delay
    pub reconnect_max_delay: Duration,
    /// Jitter factor (0.0 to 1.0) added on top of each reconnect delay
    pub reconnect_jitter: f64,
    /// Start the change subscription as soon as the facade opens
    pub realtime_on_open: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            reconnect_base_delay: DEFAULT_RECONNECT_BASE,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX,
            reconnect_jitter: DEFAULT_RECONNECT_JITTER,
            realtime_on_open: true,
        }
    }
}

impl SyncConfig {
    /// Create a new SyncConfigBuilder
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Load from `CONTACT_SYNC_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut builder = Self::builder();

        if let Some(table) = lookup("CONTACT_SYNC_TABLE") {
            builder = builder.table(table);
        }
        if let Some(raw) = lookup("CONTACT_SYNC_RECONNECT_BASE_MS") {
            builder = builder.reconnect_base_delay(parse_millis("CONTACT_SYNC_RECONNECT_BASE_MS", &raw)?);
        }
        if let Some(raw) = lookup("CONTACT_SYNC_RECONNECT_MAX_MS") {
            builder = builder.reconnect_max_delay(parse_millis("CONTACT_SYNC_RECONNECT_MAX_MS", &raw)?);
        }
        if let Some(raw) = lookup("CONTACT_SYNC_RECONNECT_JITTER") {
            let jitter = raw.trim().parse::<f64>().map_err(|_| ConfigError::InvalidValue {
                key: "CONTACT_SYNC_RECONNECT_JITTER",
                value: raw.clone(),
            })?;
            builder = builder.reconnect_jitter(jitter);
        }
        if let Some(raw) = lookup("CONTACT_SYNC_REALTIME") {
            let enabled = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "CONTACT_SYNC_REALTIME",
                        value: raw,
                    })
                }
            };
            builder = builder.realtime_on_open(enabled);
        }

        builder.build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.trim().is_empty() {
            return Err(ConfigError::MissingValue("table"));
        }
        if self.reconnect_base_delay.is_zero() {
            return Err(ConfigError::OutOfRange {
                field: "reconnect_base_delay",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.reconnect_max_delay < self.reconnect_base_delay {
            return Err(ConfigError::OutOfRange {
                field: "reconnect_max_delay",
                reason: format!(
                    "{:?} is shorter than the base delay {:?}",
                    self.reconnect_max_delay, self.reconnect_base_delay
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.reconnect_jitter) {
            return Err(ConfigError::OutOfRange {
                field: "reconnect_jitter",
                reason: format!("{} is outside 0.0..=1.0", self.reconnect_jitter),
            });
        }
        Ok(())
    }

    /// Reconnect backoff for the change subscription
    pub fn backoff(&self) -> BackoffStrategy {
        BackoffStrategy::Exponential {
            base: self.reconnect_base_delay,
            max: self.reconnect_max_delay,
            jitter: self.reconnect_jitter,
        }
    }
}

fn parse_millis(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
        })
}

/// Builder for SyncConfig
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    table: Option<String>,
    reconnect_base_delay: Option<Duration>,
    reconnect_max_delay: Option<Duration>,
    reconnect_jitter: Option<f64>,
    realtime_on_open: Option<bool>,
}

impl SyncConfigBuilder {
    /// Set the change-feed table scope
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = Some(delay);
        self
    }

    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = Some(delay);
        self
    }

    pub fn reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = Some(jitter);
        self
    }

    pub fn realtime_on_open(mut self, enabled: bool) -> Self {
        self.realtime_on_open = Some(enabled);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<SyncConfig, ConfigError> {
        let defaults = SyncConfig::default();
        let config = SyncConfig {
            table: self.table.unwrap_or(defaults.table),
            reconnect_base_delay: self.reconnect_base_delay.unwrap_or(defaults.reconnect_base_delay),
            reconnect_max_delay: self.reconnect_max_delay.unwrap_or(defaults.reconnect_max_delay),
            reconnect_jitter: self.reconnect_jitter.unwrap_or(defaults.reconnect_jitter),
            realtime_on_open: self.realtime_on_open.unwrap_or(defaults.realtime_on_open),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
    #[error("{field} out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}
