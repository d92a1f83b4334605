//! Bridge configuration.

use flow_model::{ComponentDefinition, Definitions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::{ComponentRequest, DEFAULT_ENDPOINT};
use crate::security::SecurityState;

/// Default coalescing window.
pub const DEFAULT_BATCH_DELAY_MS: u64 = 10;

/// Default HTTP request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Session configuration, threaded through [`crate::Bridge`] construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Exchange endpoint path.
    pub endpoint: String,
    /// Origin prepended to `endpoint` by the HTTP transport.
    pub base_url: Option<String>,
    /// Coalescing window (ms).
    pub batch_delay_ms: u64,
    /// HTTP timeout (ms).
    pub request_timeout_ms: u64,
    /// Initial session security settings.
    pub security: SecurityState,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            base_url: None,
            batch_delay_ms: DEFAULT_BATCH_DELAY_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            security: SecurityState::default(),
        }
    }
}

impl BridgeConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_security(mut self, security: SecurityState) -> Self {
        self.security = security;
        self
    }
}

/// Bootstrap options: configuration plus definitions to preload and
/// components to fetch on install.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowOptions {
    #[serde(flatten)]
    pub config: BridgeConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definitions: Option<Definitions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoload_components: Option<ComponentRequest>,
}

/// Host hook receiving every component definition the first time it
/// becomes known.
pub trait ComponentRegistrar: Send + Sync {
    fn register(&self, name: &str, definition: &ComponentDefinition);
}
