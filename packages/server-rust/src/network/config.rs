//! Network configuration of the admin HTTP listener.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Listener settings of the admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete.
    pub request_timeout_ms: u64,
    /// Time in-flight requests get to finish after shutdown starts.
    pub drain_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 18080,
            cors_origins: vec!["*".to_string()],
            request_timeout_ms: 60_000,
            drain_timeout_ms: 10_000,
        }
    }
}

impl NetworkConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
