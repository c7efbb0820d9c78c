//! Scheduler, serial executor and root configuration structures.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

use super::InvokerConfig;

/// Timer thread configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name given to the timer thread.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name: "interval-timer".into(),
        }
    }
}

impl SchedulerConfig {
    /// Set the timer thread name.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Validate scheduler configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        validate_thread_name("thread_name", &self.thread_name)
    }
}

/// Serial executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialExecutorConfig {
    /// Timeout applied to closures passed to `SerialExecutor::execute`, in milliseconds.
    pub default_timeout_ms: u64,
    /// Prefix of the names given to task threads; the task number is appended.
    pub thread_name_prefix: String,
}

impl Default for SerialExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            thread_name_prefix: "serial-task".into(),
        }
    }
}

impl SerialExecutorConfig {
    /// Set the default task timeout in milliseconds.
    #[must_use]
    pub const fn with_default_timeout_ms(mut self, millis: u64) -> Self {
        self.default_timeout_ms = millis;
        self
    }

    /// Set the task thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Validate serial executor configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_timeout_ms == 0 {
            return Err("default_timeout_ms must be greater than 0".into());
        }
        validate_thread_name("thread_name_prefix", &self.thread_name_prefix)
    }
}

/// Root configuration: one scheduler, one serial executor and named invokers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Timer thread settings.
    pub scheduler: SchedulerConfig,
    /// Serial executor settings.
    pub serial: SerialExecutorConfig,
    /// Map of invoker name to configuration.
    pub invokers: HashMap<String, InvokerConfig>,
}

impl CoreConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid section.
    pub fn validate(&self) -> Result<(), String> {
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler invalid: {e}"))?;
        self.serial
            .validate()
            .map_err(|e| format!("serial executor invalid: {e}"))?;
        for (name, invoker) in &self.invokers {
            validate_thread_name("invoker name", name)?;
            invoker
                .validate()
                .map_err(|e| format!("invoker `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or its contents are invalid.
    pub fn from_json_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json_str(&raw)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading config file {}", path.display()))
    }
}

fn validate_thread_name(field: &str, name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if name.contains('\0') {
        return Err(format!("{field} must not contain NUL bytes"));
    }
    Ok(())
}
