// ────────────────────────────────
// src/proxy/proxy.rs
// Forwards client requests to the backend the load balancer resolves.
// ────────────────────────────────

use crate::config::{Config, HashKey};
use crate::load_balancer::{LoadBalancer, RoutingError};
use crate::metrics::{MetricsCollector, Timer};
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::{Body, Client, Method, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub const BACKEND_ID_HEADER: &str = "x-backend-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

pub struct Proxy {
    load_balancer: Arc<LoadBalancer>,
    client: Client<HttpConnector, Body>,
    hash_key: HashKey,
    hash_header: Option<HeaderName>,
    timeout: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Proxy {
    pub fn new(
        config: &Config,
        load_balancer: Arc<LoadBalancer>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let hash_header = config
            .routing
            .hash_header
            .as_deref()
            .and_then(|name| match HeaderName::from_bytes(name.as_bytes()) {
                Ok(header) => Some(header),
                Err(_) => {
                    warn!(header = %name, "ignoring invalid routing.hash_header");
                    None
                }
            });

        Self {
            load_balancer,
            client: Client::builder().build_http(),
            hash_key: config.routing.hash_key,
            hash_header,
            timeout: config.proxy.timeout(),
            metrics,
        }
    }

    /// Key hashed onto the lookup table for this request.
    pub fn hash_key(&self, req: &Request<Body>, peer: SocketAddr) -> String {
        match self.hash_key {
            HashKey::ClientIp => peer.ip().to_string(),
            HashKey::ClientAddr => peer.to_string(),
            HashKey::Header => self
                .hash_header
                .as_ref()
                .and_then(|name| req.headers().get(name))
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
                .unwrap_or_else(|| peer.ip().to_string()),
        }
    }

    pub async fn handle(
        &self,
        req: Request<Body>,
        peer: SocketAddr,
    ) -> Result<Response<Body>, ProxyError> {
        let mut guard = InFlight::start(self.metrics.clone(), req.method().clone());
        let result = self.forward(req, peer).await;
        guard.finish(&result);
        result
    }

    async fn forward(
        &self,
        req: Request<Body>,
        peer: SocketAddr,
    ) -> Result<Response<Body>, ProxyError> {
        let key = self.hash_key(&req, peer);
        let backend = self.load_balancer.resolve(key.as_bytes())?;

        debug!(
            client = %peer,
            key = %key,
            backend = %backend.id,
            address = %backend.address,
            "routing request"
        );

        let (mut parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        parts.uri = backend
            .upstream_uri(path_and_query)
            .map_err(|_| ProxyError::InvalidBackendAddress {
                backend: backend.id.clone(),
                address: backend.address.clone(),
            })?;

        strip_hop_by_hop(&mut parts.headers);
        append_forwarded_for(&mut parts.headers, peer);
        if !parts.headers.contains_key(REQUEST_ID_HEADER) {
            if let Ok(id) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
                parts.headers.insert(REQUEST_ID_HEADER, id);
            }
        }

        let upstream = Request::from_parts(parts, body);
        let pending = self.client.request(upstream);
        let mut response = match tokio::time::timeout(self.timeout, pending).await {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => {
                return Err(ProxyError::Upstream {
                    backend: backend.id.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(ProxyError::Timeout {
                    backend: backend.id.clone(),
                })
            }
        };

        strip_hop_by_hop(response.headers_mut());
        if let Ok(id) = HeaderValue::from_str(&backend.id) {
            response.headers_mut().insert(BACKEND_ID_HEADER, id);
        }
        Ok(response)
    }
}

/// Status recorded for requests whose client went away before a response.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Tracks one proxied request in the metrics. The gauge is released and the
/// request recorded on drop, so a cancelled `handle` future still counts.
struct InFlight {
    metrics: Option<Arc<MetricsCollector>>,
    method: Method,
    timer: Timer,
    outcome: Option<(u16, String)>,
}

impl InFlight {
    fn start(metrics: Option<Arc<MetricsCollector>>, method: Method) -> Self {
        if let Some(metrics) = &metrics {
            metrics.increment_active_connections();
        }
        Self {
            metrics,
            method,
            timer: Timer::new(),
            outcome: None,
        }
    }

    fn finish(&mut self, result: &Result<Response<Body>, ProxyError>) {
        let (status, backend) = match result {
            Ok(response) => (
                response.status(),
                response
                    .headers()
                    .get(BACKEND_ID_HEADER)
                    .and_then(|v| v.to_str().ok()),
            ),
            Err(e) => (e.status(), e.backend()),
        };
        self.outcome = Some((status.as_u16(), backend.unwrap_or("none").to_owned()));
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.decrement_active_connections();
        let (status, backend) = self
            .outcome
            .take()
            .unwrap_or_else(|| (CLIENT_CLOSED_REQUEST, "none".to_owned()));
        metrics.record_request(self.method.as_str(), status, &backend, self.timer.elapsed());
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in Connection are hop-by-hop too.
    let listed: Vec<HeaderName> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let ip = peer.ip().to_string();
    let value = match headers.get(FORWARDED_FOR_HEADER).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{}, {}", existing, ip),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(FORWARDED_FOR_HEADER, value);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No backend available")]
    NoBackendAvailable,

    #[error("Routing error: {0}")]
    Routing(RoutingError),

    #[error("Backend {backend} has invalid address {address:?}")]
    InvalidBackendAddress { backend: String, address: String },

    #[error("Backend {backend} error: {source}")]
    Upstream {
        backend: String,
        #[source]
        source: hyper::Error,
    },

    #[error("Request to backend {backend} timed out")]
    Timeout { backend: String },
}

impl From<RoutingError> for ProxyError {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::NoBackendAvailable => ProxyError::NoBackendAvailable,
            other => ProxyError::Routing(other),
        }
    }
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoBackendAvailable => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Routing(_) | ProxyError::InvalidBackendAddress { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn backend(&self) -> Option<&str> {
        match self {
            ProxyError::InvalidBackendAddress { backend, .. }
            | ProxyError::Upstream { backend, .. }
            | ProxyError::Timeout { backend } => Some(backend),
            ProxyError::NoBackendAvailable | ProxyError::Routing(_) => None,
        }
    }
}

// Convert ProxyError to Hyper Response for error handling
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let status = err.status();
        let message = match status {
            StatusCode::SERVICE_UNAVAILABLE => "Service unavailable",
            StatusCode::BAD_GATEWAY => "Bad gateway",
            StatusCode::GATEWAY_TIMEOUT => "Gateway timeout",
            _ => "Internal server error",
        };

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = status;
        response
    }
}
