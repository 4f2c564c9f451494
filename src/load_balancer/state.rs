// src/load_balancer/state.rs
use super::error::ConfigError;
use crate::maglev::{is_valid_table_size, LookupTable, TableError};
use crate::proxy::{Backend, BackendState};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Registry, active set and published table. Owned by the `LoadBalancer`
/// behind its lock; nothing else holds a mutable reference.
#[derive(Debug)]
pub(crate) struct RoutingState {
    registry: BTreeMap<String, Arc<Backend>>,
    /// Sorted ascending by id, no duplicates.
    active: Vec<Arc<Backend>>,
    table: Arc<LookupTable>,
    table_size: usize,
}

impl RoutingState {
    pub(crate) fn new<I, S>(
        backends: I,
        initial_active: &[S],
        table_size: usize,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = Backend>,
        S: AsRef<str>,
    {
        if !is_valid_table_size(table_size) {
            return Err(ConfigError::InvalidTableSize(table_size));
        }

        let mut registry = BTreeMap::new();
        for backend in backends {
            let id = backend.id.clone();
            if registry.insert(id.clone(), Arc::new(backend)).is_some() {
                return Err(ConfigError::DuplicateBackend(id));
            }
        }

        let mut seen = BTreeSet::new();
        let mut active = Vec::with_capacity(initial_active.len());
        for id in initial_active {
            let id = id.as_ref();
            let backend = registry
                .get(id)
                .ok_or_else(|| ConfigError::UnknownActive(id.to_owned()))?;
            if !seen.insert(id) {
                return Err(ConfigError::DuplicateActive(id.to_owned()));
            }
            active.push(backend.clone());
        }
        active.sort_by(|a, b| a.id.cmp(&b.id));

        let table = Arc::new(build_table(&active, table_size)?);

        Ok(Self {
            registry,
            active,
            table,
            table_size,
        })
    }

    pub(crate) fn table(&self) -> &Arc<LookupTable> {
        &self.table
    }

    pub(crate) fn table_size(&self) -> usize {
        self.table_size
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Arc<Backend>> {
        self.registry.get(id)
    }

    pub(crate) fn registry(&self) -> impl Iterator<Item = &Arc<Backend>> {
        self.registry.values()
    }

    fn active_position(&self, id: &str) -> Result<usize, usize> {
        self.active.binary_search_by(|b| b.id.as_str().cmp(id))
    }

    pub(crate) fn state_of(&self, id: &str) -> BackendState {
        if self.active_position(id).is_ok() {
            BackendState::Active
        } else if self.registry.contains_key(id) {
            BackendState::Inactive
        } else {
            BackendState::Unknown
        }
    }

    pub(crate) fn active_ids(&self) -> Vec<String> {
        self.active.iter().map(|b| b.id.clone()).collect()
    }

    /// Insert `backend` at its canonical position and republish the table.
    /// `Err(pos)` from the search is the insertion point.
    pub(crate) fn insert_active(&mut self, backend: Arc<Backend>) -> Result<bool, TableError> {
        let pos = match self.active_position(&backend.id) {
            Ok(_) => return Ok(false),
            Err(pos) => pos,
        };

        let mut active = self.active.clone();
        active.insert(pos, backend);
        self.publish(active)?;
        Ok(true)
    }

    /// Remove `id` from the active set and republish the table.
    pub(crate) fn remove_active(&mut self, id: &str) -> Result<bool, TableError> {
        let pos = match self.active_position(id) {
            Ok(pos) => pos,
            Err(_) => return Ok(false),
        };

        let mut active = self.active.clone();
        active.remove(pos);
        self.publish(active)?;
        Ok(true)
    }

    /// Build the table for `active` off to the side; only swap both in once
    /// the build has succeeded.
    fn publish(&mut self, active: Vec<Arc<Backend>>) -> Result<(), TableError> {
        let table = build_table(&active, self.table_size)?;
        self.active = active;
        self.table = Arc::new(table);
        Ok(())
    }
}

fn build_table(active: &[Arc<Backend>], table_size: usize) -> Result<LookupTable, TableError> {
    let ids: Vec<&str> = active.iter().map(|b| b.id.as_str()).collect();
    LookupTable::build(&ids, table_size)
}
