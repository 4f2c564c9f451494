// src/load_balancer/mod.rs
mod coordinator;
mod error;
mod observer;
mod state;

pub use coordinator::LoadBalancer;
pub use error::{ConfigError, RoutingError};
pub use observer::RoutingObserver;
