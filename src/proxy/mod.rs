// src/proxy/mod.rs
mod backend;
mod proxy;

pub use backend::{Backend, BackendState};
pub use proxy::{Proxy, ProxyError, BACKEND_ID_HEADER, REQUEST_ID_HEADER};
