//! Client configuration.
//!
//! Configuration can be built in code or loaded from JSON:
//!
//! ```json
//! {
//!   "retry": { "max_retries": 5, "base_delay_ms": 10, "max_delay_ms": 200 },
//!   "watch_capacity": 256,
//!   "auto_id_length": 20
//! }
//! ```
//!
//! Missing keys take their default values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Configuration for transaction retry behavior.
///
/// A transaction that loses a race against a concurrent writer re-reads
/// its record and runs again, up to `max_retries` times, sleeping with
/// exponential backoff in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: usize,
    /// Base delay between retries in milliseconds (exponential backoff)
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 10,
            max_delay_ms: 200,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RetryConfig with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Calculate delay for a given attempt (exponential backoff)
    pub(crate) fn calculate_delay(&self, attempt: usize) -> Duration {
        // Cap the shift to prevent overflow
        let shift = attempt.min(63);
        let multiplier = 1u64 << shift;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Configuration for [`crate::DocumentClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub retry: RetryConfig,
    /// Events buffered per watch channel before slow listeners skip ahead.
    pub watch_capacity: usize,
    /// Length of generated document ids.
    pub auto_id_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            watch_capacity: 1024,
            auto_id_length: 20,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_watch_capacity(mut self, capacity: usize) -> Self {
        self.watch_capacity = capacity;
        self
    }

    pub fn with_auto_id_length(mut self, length: usize) -> Self {
        self.auto_id_length = length;
        self
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            StoreError::InvalidArgument(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.watch_capacity == 0 {
            return Err(StoreError::InvalidArgument(
                "watch_capacity must be positive".to_string(),
            ));
        }
        if self.auto_id_length < 8 {
            return Err(StoreError::InvalidArgument(
                "auto_id_length must be at least 8".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(StoreError::InvalidArgument(
                "retry.base_delay_ms exceeds retry.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}
