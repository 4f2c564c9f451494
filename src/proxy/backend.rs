// src/proxy/backend.rs
use crate::config::BackendConfig;
use hyper::Uri;
use serde::Serialize;

/// A routable destination. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Backend {
    pub id: String,
    /// `host:port` the proxy forwards to. Opaque to the routing core.
    pub address: String,
}

impl Backend {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }

    /// Upstream URI for a request path (and optional query) on this backend.
    pub fn upstream_uri(&self, path_and_query: &str) -> Result<Uri, hyper::http::uri::InvalidUri> {
        format!("http://{}{}", self.address, path_and_query).parse()
    }
}

impl From<BackendConfig> for Backend {
    fn from(config: BackendConfig) -> Self {
        Self::new(config.id, config.address)
    }
}

/// Lifecycle of a backend as seen by the load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendState {
    /// Not in the registry; cannot be activated.
    Unknown,
    Inactive,
    Active,
}
