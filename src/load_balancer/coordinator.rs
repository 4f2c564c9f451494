// src/load_balancer/coordinator.rs
use super::error::{ConfigError, RoutingError};
use super::observer::RoutingObserver;
use super::state::RoutingState;
use crate::config::Config;
use crate::maglev::LookupTable;
use crate::proxy::{Backend, BackendState};
use parking_lot::RwLock;
use std::sync::Arc;

/// Maglev load balancer.
///
/// Resolution takes the read lock and may run concurrently with other
/// resolutions. Activation and deactivation take the write lock and rebuild
/// the whole table inside it, so a resolution either sees the old table or
/// the new one, never a partial one.
pub struct LoadBalancer {
    state: RwLock<RoutingState>,
    observers: Vec<Arc<dyn RoutingObserver>>,
}

impl LoadBalancer {
    /// Create a balancer over the full set of known `backends`, with
    /// `initial_active` ids active from the start.
    pub fn new<I, S>(
        backends: I,
        initial_active: &[S],
        table_size: usize,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = Backend>,
        S: AsRef<str>,
    {
        Ok(Self {
            state: RwLock::new(RoutingState::new(backends, initial_active, table_size)?),
            observers: Vec::new(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(
            config.backends.iter().cloned().map(Backend::from),
            config.active.as_slice(),
            config.routing.table_size,
        )
    }

    /// Register an observer. Done before the balancer is shared.
    pub fn with_observer(mut self, observer: Arc<dyn RoutingObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Map `key` to a backend through the published lookup table.
    pub fn resolve(&self, key: &[u8]) -> Result<Arc<Backend>, RoutingError> {
        let backend = {
            let state = self.state.read();
            let id = state
                .table()
                .lookup(key)
                .ok_or(RoutingError::NoBackendAvailable)?;
            state
                .get(id)
                .cloned()
                .ok_or_else(|| RoutingError::UnknownBackend(id.to_owned()))?
        };

        for observer in &self.observers {
            observer.on_route(key, &backend.id);
        }
        Ok(backend)
    }

    /// Add a registered backend to the active set and rebuild the table.
    pub fn activate(&self, id: &str) -> Result<(), RoutingError> {
        let mut state = self.state.write();

        let backend = match state.state_of(id) {
            BackendState::Active => return Err(RoutingError::AlreadyActive(id.to_owned())),
            BackendState::Unknown => return Err(RoutingError::UnknownBackend(id.to_owned())),
            BackendState::Inactive => state
                .get(id)
                .cloned()
                .ok_or_else(|| RoutingError::UnknownBackend(id.to_owned()))?,
        };

        state.insert_active(backend)?;
        self.notify_active_set(&state);
        Ok(())
    }

    /// Remove a backend from the active set. Leaves an empty table when the
    /// last backend goes.
    pub fn deactivate(&self, id: &str) -> Result<(), RoutingError> {
        let mut state = self.state.write();

        if !state.remove_active(id)? {
            return Err(RoutingError::NotActive(id.to_owned()));
        }
        self.notify_active_set(&state);
        Ok(())
    }

    /// Active backend ids in canonical (ascending) order.
    pub fn active_backend_ids(&self) -> Vec<String> {
        self.state.read().active_ids()
    }

    pub fn backend_state(&self, id: &str) -> BackendState {
        self.state.read().state_of(id)
    }

    /// Every registered backend with its current state, ordered by id.
    pub fn backends(&self) -> Vec<(Arc<Backend>, BackendState)> {
        let state = self.state.read();
        state
            .registry()
            .map(|b| (b.clone(), state.state_of(&b.id)))
            .collect()
    }

    /// The currently published table.
    pub fn table_snapshot(&self) -> Arc<LookupTable> {
        self.state.read().table().clone()
    }

    /// Configured table size, independent of whether a table is published.
    pub fn table_size(&self) -> usize {
        self.state.read().table_size()
    }

    fn notify_active_set(&self, state: &RoutingState) {
        if self.observers.is_empty() {
            return;
        }
        let active = state.active_ids();
        for observer in &self.observers {
            observer.on_active_set_changed(&active);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maglev::DEFAULT_TABLE_SIZE;
    use parking_lot::Mutex;

    fn backends() -> Vec<Backend> {
        vec![
            Backend::new("A", "localhost:8081"),
            Backend::new("B", "localhost:8082"),
            Backend::new("C", "localhost:8083"),
        ]
    }

    #[derive(Default)]
    struct Recorder {
        routes: Mutex<Vec<String>>,
        changes: Mutex<Vec<Vec<String>>>,
    }

    impl RoutingObserver for Recorder {
        fn on_route(&self, _key: &[u8], backend_id: &str) {
            self.routes.lock().push(backend_id.to_owned());
        }

        fn on_active_set_changed(&self, active: &[String]) {
            self.changes.lock().push(active.to_vec());
        }
    }

    #[test]
    fn test_resolve_single_active() {
        let lb = LoadBalancer::new(backends(), &["A"], DEFAULT_TABLE_SIZE).unwrap();
        for key in ["k1", "k2", "10.0.0.1"] {
            assert_eq!(lb.resolve(key.as_bytes()).unwrap().id, "A");
        }
    }

    #[test]
    fn test_activate_outcomes() {
        let lb = LoadBalancer::new(backends(), &["A"], 13).unwrap();
        assert_eq!(lb.activate("B"), Ok(()));
        let after_first = lb.table_snapshot();
        assert_eq!(lb.activate("B"), Err(RoutingError::AlreadyActive("B".into())));
        assert_eq!(*lb.table_snapshot(), *after_first);
        assert_eq!(lb.activate("Z"), Err(RoutingError::UnknownBackend("Z".into())));
        assert_eq!(lb.active_backend_ids(), vec!["A", "B"]);
    }

    #[test]
    fn test_deactivate_outcomes() {
        let lb = LoadBalancer::new(backends(), &["A", "B"], 13).unwrap();
        let before = lb.table_snapshot();
        assert_eq!(lb.deactivate("Z"), Err(RoutingError::NotActive("Z".into())));
        assert_eq!(lb.deactivate("C"), Err(RoutingError::NotActive("C".into())));
        assert_eq!(*lb.table_snapshot(), *before);

        assert_eq!(lb.deactivate("A"), Ok(()));
        assert_eq!(lb.active_backend_ids(), vec!["B"]);
    }

    #[test]
    fn test_empty_set_resolves_nothing() {
        let lb = LoadBalancer::new(backends(), &["A"], 13).unwrap();
        lb.deactivate("A").unwrap();
        assert!(lb.table_snapshot().is_empty());
        assert_eq!(lb.table_size(), 13);
        for key in ["", "k1", "k2"] {
            assert_eq!(
                lb.resolve(key.as_bytes()),
                Err(RoutingError::NoBackendAvailable)
            );
        }

        lb.activate("C").unwrap();
        assert_eq!(lb.resolve(b"k1").unwrap().id, "C");
    }

    #[test]
    fn test_backend_states() {
        let lb = LoadBalancer::new(backends(), &["B"], 13).unwrap();
        let states: Vec<_> = lb
            .backends()
            .into_iter()
            .map(|(b, s)| (b.id.clone(), s))
            .collect();
        assert_eq!(
            states,
            vec![
                ("A".to_string(), BackendState::Inactive),
                ("B".to_string(), BackendState::Active),
                ("C".to_string(), BackendState::Inactive),
            ]
        );
        assert_eq!(lb.backend_state("Q"), BackendState::Unknown);
    }

    #[test]
    fn test_observers_see_routes_and_changes() {
        let recorder = Arc::new(Recorder::default());
        let lb = LoadBalancer::new(backends(), &["A"], 13)
            .unwrap()
            .with_observer(recorder.clone());

        lb.resolve(b"k1").unwrap();
        lb.activate("C").unwrap();
        lb.activate("C").unwrap_err();
        lb.deactivate("A").unwrap();

        assert_eq!(*recorder.routes.lock(), vec!["A".to_string()]);
        assert_eq!(
            *recorder.changes.lock(),
            vec![
                vec!["A".to_string(), "C".to_string()],
                vec!["C".to_string()],
            ]
        );
    }
}
