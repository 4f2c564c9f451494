// src/load_balancer/observer.rs

/// Hook for collaborators that want to see routing decisions and active-set
/// changes (dashboards, metrics).
///
/// Calls are synchronous and made on the routing path, so implementations
/// must not block. `on_active_set_changed` runs while the routing state is
/// write-locked, which keeps notifications in commit order.
pub trait RoutingObserver: Send + Sync {
    fn on_route(&self, _key: &[u8], _backend_id: &str) {}

    fn on_active_set_changed(&self, _active: &[String]) {}
}
