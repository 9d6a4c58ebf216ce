//! Chat configuration module
//!
//! `ChatConfig` holds every tunable of the chat core. Values come from
//! defaults, an optional TOML file, and environment overrides (see
//! `backend::server::config`). All durations are stored as plain integers so
//! the TOML stays readable.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::shared::messaging::DEFAULT_MAX_BODY_CHARS;

/// Chat core configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Socket address the HTTP server binds to
    pub bind_address: String,
    /// PostgreSQL URL; in-memory storage when absent
    pub database_url: Option<String>,
    /// Redis URL for presence; in-memory presence when absent
    pub redis_url: Option<String>,
    /// HS256 secret shared with the identity issuer
    pub jwt_secret: String,
    pub max_body_chars: usize,
    /// Retries after the first failed persistence attempt
    pub persist_retries: u32,
    pub retry_backoff_ms: u64,
    pub retry_backoff_max_ms: u64,
    pub presence_ttl_secs: u64,
    /// Delay before the last disconnect marks a user offline
    pub presence_grace_ms: u64,
    /// Heartbeat cadence suggested to clients in `hello`
    pub heartbeat_interval_secs: u64,
    /// A connection with no inbound frame for this long is closed
    pub idle_timeout_secs: u64,
    /// Capacity of each connection's outbound channel
    pub outbound_buffer: usize,
    pub queue_retention_days: u64,
    pub maintenance_interval_secs: u64,
    pub sequencer_idle_secs: u64,
    pub reconcile_page_size: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            database_url: None,
            redis_url: None,
            jwt_secret: "change-me-in-production".to_string(),
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
            persist_retries: 3,
            retry_backoff_ms: 50,
            retry_backoff_max_ms: 2_000,
            presence_ttl_secs: 60,
            presence_grace_ms: 5_000,
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 90,
            outbound_buffer: 256,
            queue_retention_days: 7,
            maintenance_interval_secs: 300,
            sequencer_idle_secs: 300,
            reconcile_page_size: 200,
        }
    }
}

impl ChatConfig {
    /// Create a new ChatConfigBuilder
    pub fn builder() -> ChatConfigBuilder {
        ChatConfigBuilder::default()
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: ChatConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::MissingValue("jwt_secret"));
        }
        if self.max_body_chars == 0 {
            return Err(ConfigError::invalid("max_body_chars", "must be positive"));
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::invalid("outbound_buffer", "must be positive"));
        }
        if self.reconcile_page_size == 0 {
            return Err(ConfigError::invalid("reconcile_page_size", "must be positive"));
        }
        if self.retry_backoff_max_ms < self.retry_backoff_ms {
            return Err(ConfigError::invalid(
                "retry_backoff_max_ms",
                "must not be below retry_backoff_ms",
            ));
        }
        if self.heartbeat_interval_secs == 0 || self.heartbeat_interval_secs >= self.presence_ttl_secs {
            return Err(ConfigError::invalid(
                "heartbeat_interval_secs",
                "must be positive and shorter than presence_ttl_secs",
            ));
        }
        if self.idle_timeout_secs < self.heartbeat_interval_secs {
            return Err(ConfigError::invalid(
                "idle_timeout_secs",
                "must be at least heartbeat_interval_secs",
            ));
        }
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn retry_backoff_max(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_max_ms)
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    pub fn presence_grace(&self) -> Duration {
        Duration::from_millis(self.presence_grace_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn queue_retention(&self) -> Duration {
        Duration::from_secs(self.queue_retention_days * 24 * 60 * 60)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn sequencer_idle(&self) -> Duration {
        Duration::from_secs(self.sequencer_idle_secs)
    }
}

/// Builder for ChatConfig
#[derive(Debug, Default)]
pub struct ChatConfigBuilder {
    config: ChatConfig,
}

impl ChatConfigBuilder {
    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.config.bind_address = address.into();
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.config.redis_url = Some(url.into());
        self
    }

    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.jwt_secret = secret.into();
        self
    }

    pub fn max_body_chars(mut self, max: usize) -> Self {
        self.config.max_body_chars = max;
        self
    }

    pub fn persist_retries(mut self, retries: u32) -> Self {
        self.config.persist_retries = retries;
        self
    }

    pub fn retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.retry_backoff_ms = base.as_millis() as u64;
        self.config.retry_backoff_max_ms = max.as_millis() as u64;
        self
    }

    pub fn presence_ttl(mut self, ttl: Duration) -> Self {
        self.config.presence_ttl_secs = ttl.as_secs();
        self
    }

    pub fn presence_grace(mut self, grace: Duration) -> Self {
        self.config.presence_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn outbound_buffer(mut self, capacity: usize) -> Self {
        self.config.outbound_buffer = capacity;
        self
    }

    pub fn queue_retention_days(mut self, days: u64) -> Self {
        self.config.queue_retention_days = days;
        self
    }

    pub fn sequencer_idle(mut self, idle: Duration) -> Self {
        self.config.sequencer_idle_secs = idle.as_secs();
        self
    }

    pub fn reconcile_page_size(mut self, size: u64) -> Self {
        self.config.reconcile_page_size = size;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ChatConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
