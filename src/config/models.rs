// src/config/models.rs
use crate::maglev::{is_valid_table_size, DEFAULT_TABLE_SIZE};
use anyhow::{anyhow, bail, ensure, Result};
use hyper::header::HeaderName;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the proxy listens on for client traffic.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Address of the administrative API.
    #[serde(default = "default_admin_listen")]
    pub admin_listen: SocketAddr,

    #[serde(default)]
    pub routing: RoutingConfig,

    /// Every backend the balancer knows about, active or not.
    pub backends: Vec<BackendConfig>,

    /// Ids active at startup.
    #[serde(default)]
    pub active: Vec<String>,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    /// `host:port`
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Lookup table size. Must be prime.
    #[serde(default = "default_table_size")]
    pub table_size: usize,

    #[serde(default)]
    pub hash_key: HashKey,

    /// Header read when `hash_key` is `header`.
    #[serde(default)]
    pub hash_header: Option<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            table_size: DEFAULT_TABLE_SIZE,
            hash_key: HashKey::default(),
            hash_header: None,
        }
    }
}

/// What part of a request is hashed onto the lookup table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashKey {
    /// Client IP only; keeps a client pinned across source ports.
    #[default]
    ClientIp,
    /// Client `ip:port`.
    ClientAddr,
    /// Value of `routing.hash_header`, falling back to the client IP.
    Header,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

impl Config {
    /// Structural checks. Registry/active-set consistency is enforced again
    /// when the load balancer is constructed.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.backends.is_empty(), "at least one backend must be configured");
        ensure!(
            is_valid_table_size(self.routing.table_size),
            "routing.table_size {} must be a prime below 2^32",
            self.routing.table_size
        );

        let mut ids = HashSet::new();
        for backend in &self.backends {
            ensure!(!backend.id.is_empty(), "backend id must not be empty");
            if !ids.insert(backend.id.as_str()) {
                bail!("duplicate backend id: {}", backend.id);
            }
            let url = Url::parse(&format!("http://{}", backend.address)).map_err(|e| {
                anyhow!(
                    "backend {} has invalid address {:?}: {}",
                    backend.id,
                    backend.address,
                    e
                )
            })?;
            ensure!(
                url.host_str().is_some() && url.path() == "/",
                "backend {} address {:?} must be host:port",
                backend.id,
                backend.address
            );
        }

        for id in &self.active {
            ensure!(ids.contains(id.as_str()), "active backend {} is not configured", id);
        }

        match self.routing.hash_header.as_deref() {
            Some(name) => ensure!(
                HeaderName::from_bytes(name.as_bytes()).is_ok(),
                "routing.hash_header {:?} is not a valid header name",
                name
            ),
            None => ensure!(
                self.routing.hash_key != HashKey::Header,
                "routing.hash_header is required when hash_key is header"
            ),
        }

        ensure!(self.proxy.timeout_secs > 0, "proxy.timeout_secs must be positive");
        ensure!(
            self.metrics.path.starts_with('/'),
            "metrics.path must start with '/'"
        );
        Ok(())
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_admin_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_table_size() -> usize {
    DEFAULT_TABLE_SIZE
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9100
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}
