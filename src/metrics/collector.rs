// src/metrics/collector.rs
use crate::load_balancer::RoutingObserver;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;
use anyhow::Result;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,

    // Routing metrics
    pub routing_decisions_total: IntCounterVec,
    pub active_set_changes_total: IntCounter,
    pub active_backends: IntGauge,
    pub registered_backends: IntGauge,

    // Connection metrics
    pub active_connections: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Total number of proxied requests"),
            &["method", "status_code", "backend"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_request_duration_seconds",
                "Request duration in seconds",
            ),
            &["method", "status_code", "backend"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let routing_decisions_total = IntCounterVec::new(
            Opts::new(
                "lb_routing_decisions_total",
                "Keys resolved to each backend",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(routing_decisions_total.clone()))?;

        let active_set_changes_total = IntCounter::new(
            "lb_active_set_changes_total",
            "Lookup table rebuilds caused by activation or deactivation",
        )?;
        registry.register(Box::new(active_set_changes_total.clone()))?;

        let active_backends =
            IntGauge::new("lb_active_backends", "Number of active backends")?;
        registry.register(Box::new(active_backends.clone()))?;

        let registered_backends =
            IntGauge::new("lb_registered_backends", "Number of registered backends")?;
        registry.register(Box::new(registered_backends.clone()))?;

        let active_connections =
            IntGauge::new("lb_active_connections", "Requests currently being proxied")?;
        registry.register(Box::new(active_connections.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            routing_decisions_total,
            active_set_changes_total,
            active_backends,
            registered_backends,
            active_connections,
        })
    }

    pub fn record_request(
        &self,
        method: &str,
        status_code: u16,
        backend: &str,
        duration: std::time::Duration,
    ) {
        let status = status_code.to_string();
        self.requests_total
            .with_label_values(&[method, &status, backend])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[method, &status, backend])
            .observe(duration.as_secs_f64());
    }

    /// Seed the backend gauges before any change notification arrives.
    pub fn set_backend_counts(&self, active: usize, registered: usize) {
        self.active_backends.set(active as i64);
        self.registered_backends.set(registered as i64);
    }

    pub fn increment_active_connections(&self) {
        self.active_connections.inc();
    }

    pub fn decrement_active_connections(&self) {
        self.active_connections.dec();
    }
}

impl RoutingObserver for MetricsCollector {
    fn on_route(&self, _key: &[u8], backend_id: &str) {
        self.routing_decisions_total
            .with_label_values(&[backend_id])
            .inc();
    }

    fn on_active_set_changed(&self, active: &[String]) {
        self.active_set_changes_total.inc();
        self.active_backends.set(active.len() as i64);
    }
}

// Helper for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
