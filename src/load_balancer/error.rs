// src/load_balancer/error.rs
use crate::maglev::TableError;

/// Outcomes of routing and administrative operations. All are expected,
/// recoverable conditions; the caller decides how to surface them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("no backend available")]
    NoBackendAvailable,

    #[error("backend {0} is already active")]
    AlreadyActive(String),

    #[error("backend {0} does not exist in the registry")]
    UnknownBackend(String),

    #[error("backend {0} not found or already inactive")]
    NotActive(String),

    /// The active set could not be turned into a table. Only reachable if the
    /// registry and active set disagree.
    #[error("lookup table rebuild failed: {0}")]
    Table(#[from] TableError),
}

/// Refusals to construct a load balancer from an inconsistent configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("duplicate backend id in registry: {0}")]
    DuplicateBackend(String),

    #[error("backend {0} listed as active more than once")]
    DuplicateActive(String),

    #[error("active backend {0} is not in the registry")]
    UnknownActive(String),

    #[error("table size {0} must be a prime that fits in 32 bits")]
    InvalidTableSize(usize),
}

impl From<TableError> for ConfigError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::InvalidSize(size) => ConfigError::InvalidTableSize(size),
            TableError::DuplicateBackend(id) => ConfigError::DuplicateActive(id),
        }
    }
}
