//! Invoker configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable overriding [`InvokerConfig::long_threshold_ms`].
pub const ENV_LONG_THRESHOLD_MS: &str = "INVOKER_LONG_THRESHOLD_MS";
/// Environment variable overriding [`InvokerConfig::profile_bucket_width_ms`].
pub const ENV_PROFILE_BUCKET_WIDTH_MS: &str = "INVOKER_PROFILE_BUCKET_WIDTH_MS";
/// Environment variable overriding [`InvokerConfig::profile_bucket_count`].
pub const ENV_PROFILE_BUCKET_COUNT: &str = "INVOKER_PROFILE_BUCKET_COUNT";

/// Invoker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokerConfig {
    /// Units running longer than this are reported, in milliseconds.
    pub long_threshold_ms: u64,
    /// Width of each profile histogram bucket, in milliseconds.
    pub profile_bucket_width_ms: u64,
    /// Number of buckets per profile histogram.
    pub profile_bucket_count: usize,
    /// Initial (and minimum retained) capacity of the unit queue.
    pub queue_capacity: usize,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            long_threshold_ms: 500,
            profile_bucket_width_ms: 50,
            profile_bucket_count: 10,
            queue_capacity: 4,
        }
    }
}

impl InvokerConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `INVOKER_*` environment variables. A `.env` file in
    /// the working directory is loaded first if present.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable when a value does not parse or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        if let Some(value) = env_value(ENV_LONG_THRESHOLD_MS)? {
            cfg.long_threshold_ms = value;
        }
        if let Some(value) = env_value(ENV_PROFILE_BUCKET_WIDTH_MS)? {
            cfg.profile_bucket_width_ms = value;
        }
        if let Some(value) = env_value(ENV_PROFILE_BUCKET_COUNT)? {
            cfg.profile_bucket_count = value;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Set the long-unit threshold in milliseconds.
    #[must_use]
    pub const fn with_long_threshold_ms(mut self, millis: u64) -> Self {
        self.long_threshold_ms = millis;
        self
    }

    /// Set the profile histogram bucket width in milliseconds.
    #[must_use]
    pub const fn with_profile_bucket_width_ms(mut self, millis: u64) -> Self {
        self.profile_bucket_width_ms = millis;
        self
    }

    /// Set the number of profile histogram buckets.
    #[must_use]
    pub const fn with_profile_bucket_count(mut self, count: usize) -> Self {
        self.profile_bucket_count = count;
        self
    }

    /// Set the initial queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// The long-unit threshold as a duration.
    #[must_use]
    pub const fn long_threshold(&self) -> Duration {
        Duration::from_millis(self.long_threshold_ms)
    }

    /// Validate invoker configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.long_threshold_ms == 0 {
            return Err("long_threshold_ms must be greater than 0".into());
        }
        if self.profile_bucket_width_ms == 0 {
            return Err("profile_bucket_width_ms must be greater than 0".into());
        }
        if self.profile_bucket_count == 0 {
            return Err("profile_bucket_count must be greater than 0".into());
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".into());
        }
        Ok(())
    }
}

fn env_value<T>(key: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("{key}: {e}")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(format!("{key}: {e}")),
    }
}
