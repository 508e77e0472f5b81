use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Tunables for the bridge, its queue and the renderer.
///
/// Deserializes from camelCase JSON; missing fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeOptions {
    pub request_timeout_ms: u64,
    pub flush_interval_ms: u64,
    pub batch_size: usize,
    pub pool_capacity: usize,
    pub max_flush_attempts: u32,
    pub dead_letter_capacity: usize,
    pub style_cache_capacity: usize,
    pub dev_server_addr: String,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            flush_interval_ms: 16,
            batch_size: 50,
            pool_capacity: 100,
            max_flush_attempts: 5,
            dead_letter_capacity: 64,
            style_cache_capacity: 256,
            dev_server_addr: "127.0.0.1:8097".to_string(),
        }
    }
}

impl BridgeOptions {
    pub fn from_json(source: &str) -> BridgeResult<Self> {
        let options: Self =
            serde_json::from_str(source).map_err(|err| BridgeError::Config(err.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.batch_size == 0 {
            return Err(BridgeError::Config("batchSize must be at least 1".into()));
        }
        if self.max_flush_attempts == 0 {
            return Err(BridgeError::Config(
                "maxFlushAttempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_max_flush_attempts(mut self, attempts: u32) -> Self {
        self.max_flush_attempts = attempts;
        self
    }

    pub fn with_dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.dead_letter_capacity = capacity;
        self
    }

    pub fn with_style_cache_capacity(mut self, capacity: usize) -> Self {
        self.style_cache_capacity = capacity;
        self
    }

    pub fn with_dev_server_addr(mut self, addr: impl Into<String>) -> Self {
        self.dev_server_addr = addr.into();
        self
    }
}
