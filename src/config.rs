// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration types and parsing for the logging pipeline.
//!
//! JSON5 configuration format supporting:
//! - Global minimum severity and default-logger registration
//! - Buffered adapter tuning (buffer/batch sizes, flush cadence, overflow policy)
//! - Attribute redaction and omission rules
//! - Declarative output adapters (text/JSON to stdout, stderr or a file)
//! - Comments and trailing commas

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::logging::{next_power_of_two, Format, Severity};

pub const DEFAULT_BUFFER_SIZE: usize = 8192;
pub const DEFAULT_BATCH_SIZE: usize = 2048;
pub const DEFAULT_FLUSH_INTERVAL_US: u64 = 256;
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_RETRY_TIMEOUT_MS: u64 = 1000;

/// What a buffered adapter does when its ring buffer is full
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Ask the worker to flush and retry with backoff, bounded by the retry timeout
    #[default]
    Block,
    /// Count the record as dropped and fail immediately
    Drop,
}

/// Tuning for buffered adapters
///
/// Sealed once at logger construction (see [`AdapterConfig::seal`]) and shared
/// read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdapterConfig {
    /// Ring buffer capacity; rounded up to a power of two when sealed
    pub buffer_size: usize,

    /// Maximum records handed to a handler per worker pass
    pub batch_size: usize,

    /// Worker tick period in microseconds; 0 disables periodic draining
    pub flush_interval_us: u64,

    /// How long `flush` waits for the worker to acknowledge
    pub flush_timeout_ms: u64,

    /// Admission retries under the block policy
    pub max_retries: u32,

    /// Upper bound on the whole retry sequence
    pub retry_timeout_ms: u64,

    pub policy: Policy,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_us: DEFAULT_FLUSH_INTERVAL_US,
            flush_timeout_ms: DEFAULT_FLUSH_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_timeout_ms: DEFAULT_RETRY_TIMEOUT_MS,
            policy: Policy::Block,
        }
    }
}

impl AdapterConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_micros(self.flush_interval_us)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_us = u64::try_from(interval.as_micros()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout_ms = saturating_millis(timeout);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, timeout: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_timeout_ms = saturating_millis(timeout);
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Validate the adapter settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "buffer_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.flush_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "flush_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Normalize and freeze: the buffer size becomes a power of two and the
    /// batch size is clamped into `1..=buffer_size`.
    pub fn seal(mut self) -> Arc<AdapterConfig> {
        self.buffer_size = next_power_of_two(self.buffer_size);
        self.batch_size = self.batch_size.clamp(1, self.buffer_size);
        Arc::new(self)
    }
}

/// Declarative output adapter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Optional name used in errors and metrics (defaults to the target)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub format: Format,

    /// "stdout", "stderr", or a file path
    pub target: String,

    /// Per-output minimum severity (defaults to the global level)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Severity>,

    /// Route through a ring buffer and background worker
    #[serde(default = "default_buffered")]
    pub buffered: bool,
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_buffered() -> bool {
    true
}

impl OutputConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.target)
    }
}

/// Logger configuration (JSON5 file format)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggerConfig {
    /// Global minimum severity
    pub level: Severity,

    /// Install the pipeline as the process-wide `log` logger at construction
    pub register_default: bool,

    /// Settings shared by every buffered adapter
    pub adapter: AdapterConfig,

    /// Attribute keys whose values are replaced with a redaction marker
    pub redact: Vec<String>,

    /// Attribute keys removed from records entirely
    pub omit: Vec<String>,

    /// Declarative outputs; the logger falls back to text on stdout if none compose
    pub outputs: Vec<OutputConfig>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: Severity::Info,
            register_default: false,
            adapter: AdapterConfig::default(),
            redact: Vec::new(),
            omit: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl LoggerConfig {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize configuration (JSON is valid JSON5)
    pub fn to_json5(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_json5())
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.adapter.validate()?;

        for key in self.redact.iter().chain(self.omit.iter()) {
            if key.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "redact/omit",
                    reason: "attribute keys cannot be empty".to_string(),
                });
            }
        }

        let mut seen = HashSet::new();
        for (idx, output) in self.outputs.iter().enumerate() {
            if output.target.trim().is_empty() {
                return Err(ConfigError::EmptyOutputTarget { index: idx });
            }
            if !seen.insert(output.display_name().to_string()) {
                return Err(ConfigError::DuplicateOutput {
                    name: output.display_name().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    IoError(std::path::PathBuf, String),
    ParseError(String),
    InvalidValue { field: &'static str, reason: String },
    EmptyOutputTarget { index: usize },
    DuplicateOutput { name: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, msg) => {
                write!(
                    f,
                    "failed to read config file '{}': {}",
                    path.display(),
                    msg
                )
            }
            ConfigError::ParseError(msg) => write!(f, "failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "invalid value for '{}': {}", field, reason)
            }
            ConfigError::EmptyOutputTarget { index } => {
                write!(f, "output {} has an empty target", index)
            }
            ConfigError::DuplicateOutput { name } => {
                write!(f, "duplicate output name '{}'", name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
