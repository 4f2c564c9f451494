// src/lib.rs
pub mod admin;
pub mod config;
pub mod events;
pub mod load_balancer;
pub mod maglev;
pub mod metrics;
pub mod proxy;
pub mod server;
