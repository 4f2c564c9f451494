// src/events/mod.rs
mod hub;

pub use hub::{EventHub, RoutingEvent, DEFAULT_CAPACITY};
