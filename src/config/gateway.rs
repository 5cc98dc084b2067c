//! Gateway configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::MAX_TOKEN_TTL;

/// Default number of concurrent execution slots.
pub const DEFAULT_SLOT_CAPACITY: u32 = 1_000;
/// Default number of active logical connections.
pub const DEFAULT_CONNECTION_CAPACITY: u32 = 10_000;
/// Default credential lifetime in seconds.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3_600;

/// Environment variable overriding [`GatewayConfig::slot_capacity`].
pub const ENV_SLOT_CAPACITY: &str = "CALLGATE_SLOT_CAPACITY";
/// Environment variable overriding [`GatewayConfig::connection_capacity`].
pub const ENV_CONNECTION_CAPACITY: &str = "CALLGATE_CONNECTION_CAPACITY";
/// Environment variable overriding [`GatewayConfig::default_token_ttl_secs`].
pub const ENV_TOKEN_TTL_SECS: &str = "CALLGATE_TOKEN_TTL_SECS";

const fn default_slot_capacity() -> u32 {
    DEFAULT_SLOT_CAPACITY
}

const fn default_connection_capacity() -> u32 {
    DEFAULT_CONNECTION_CAPACITY
}

const fn default_token_ttl_secs() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

/// Admission budgets and credential lifetime for one gateway instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Maximum concurrent execution slots.
    #[serde(default = "default_slot_capacity")]
    pub slot_capacity: u32,
    /// Maximum active logical connections.
    #[serde(default = "default_connection_capacity")]
    pub connection_capacity: u32,
    /// Credential lifetime used when the issuer does not provide one.
    #[serde(default = "default_token_ttl_secs")]
    pub default_token_ttl_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            connection_capacity: DEFAULT_CONNECTION_CAPACITY,
            default_token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

impl GatewayConfig {
    /// Set the slot capacity.
    #[must_use]
    pub const fn with_slot_capacity(mut self, slots: u32) -> Self {
        self.slot_capacity = slots;
        self
    }

    /// Set the connection capacity.
    #[must_use]
    pub const fn with_connection_capacity(mut self, connections: u32) -> Self {
        self.connection_capacity = connections;
        self
    }

    /// Set the default credential lifetime in seconds.
    #[must_use]
    pub const fn with_default_token_ttl_secs(mut self, secs: u64) -> Self {
        self.default_token_ttl_secs = secs;
        self
    }

    /// Default credential lifetime as a `Duration`.
    pub const fn default_token_ttl(&self) -> Duration {
        Duration::from_secs(self.default_token_ttl_secs)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.slot_capacity == 0 {
            return Err("slot_capacity must be greater than 0".into());
        }
        if self.connection_capacity == 0 {
            return Err("connection_capacity must be greater than 0".into());
        }
        if self.default_token_ttl_secs == 0 {
            return Err("default_token_ttl_secs must be greater than 0".into());
        }
        if self.default_token_ttl_secs > MAX_TOKEN_TTL.as_secs() {
            return Err(format!(
                "default_token_ttl_secs must not exceed {}",
                MAX_TOKEN_TTL.as_secs()
            ));
        }
        if self.slot_capacity > self.connection_capacity {
            tracing::warn!(
                slots = self.slot_capacity,
                connections = self.connection_capacity,
                "slot capacity exceeds connection budget; connections will be the binding limit"
            );
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the environment, loading `.env` first if present.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, String> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(format!("failed to load .env: {e}"));
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup and validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(raw) = lookup(ENV_SLOT_CAPACITY) {
            cfg.slot_capacity = parse_var(ENV_SLOT_CAPACITY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CONNECTION_CAPACITY) {
            cfg.connection_capacity = parse_var(ENV_CONNECTION_CAPACITY, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TOKEN_TTL_SECS) {
            cfg.default_token_ttl_secs = parse_var(ENV_TOKEN_TTL_SECS, &raw)?;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| format!("{key}={raw:?} is invalid: {e}"))
}
