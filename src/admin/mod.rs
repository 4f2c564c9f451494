// src/admin/mod.rs
mod handler;

pub use handler::AdminHandler;
