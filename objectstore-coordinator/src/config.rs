//! Coordinator configuration.

use crate::error::CoordinatorResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default timeout for a synchronous request to a peer.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// Configuration for a [`CoordinateEngine`](crate::CoordinateEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Application name, sent as the network id in handshakes. Required.
    pub app_name: String,
    /// Time to wait for a response to a synchronous request (ms).
    pub request_timeout_ms: u64,
    /// Tick of the asynchronous drain loops while work is pending (ms).
    pub task_loop_period_ms: u64,
    /// Attempts per observe command on a retryable error.
    pub observe_retry_limit: u32,
    /// Pause between observe attempts (ms).
    pub observe_retry_wait_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            task_loop_period_ms: 10,
            observe_retry_limit: 3,
            observe_retry_wait_ms: 10,
        }
    }
}

impl CoordinatorConfig {
    /// Default configuration for `app_name`.
    pub fn for_app(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Parses a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> CoordinatorResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn task_loop_period(&self) -> Duration {
        Duration::from_millis(self.task_loop_period_ms)
    }

    pub fn observe_retry_wait(&self) -> Duration {
        Duration::from_millis(self.observe_retry_wait_ms)
    }
}
