// src/events/hub.rs
use crate::load_balancer::RoutingObserver;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingEvent {
    /// A request was routed to `backend_id`.
    Routed {
        backend_id: String,
        key: String,
        at: DateTime<Utc>,
    },
    /// The active set now holds exactly `active`.
    ActiveSet {
        active: Vec<String>,
        at: DateTime<Utc>,
    },
}

impl RoutingEvent {
    pub fn active_set(active: Vec<String>) -> Self {
        RoutingEvent::ActiveSet {
            active,
            at: Utc::now(),
        }
    }

    /// One NDJSON line.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}

/// Best-effort fan-out of routing events to any number of subscribers.
///
/// Publishing never blocks; a subscriber that falls more than `capacity`
/// events behind loses the oldest ones.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<RoutingEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: RoutingEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RoutingObserver for EventHub {
    fn on_route(&self, key: &[u8], backend_id: &str) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        self.publish(RoutingEvent::Routed {
            backend_id: backend_id.to_owned(),
            key: String::from_utf8_lossy(key).into_owned(),
            at: Utc::now(),
        });
    }

    fn on_active_set_changed(&self, active: &[String]) {
        self.publish(RoutingEvent::active_set(active.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let hub = EventHub::new(8);
        let mut rx = hub.subscribe();

        hub.on_route(b"10.0.0.1", "Backend-1");
        hub.on_active_set_changed(&["Backend-1".to_string(), "Backend-2".to_string()]);

        match rx.recv().await.unwrap() {
            RoutingEvent::Routed { backend_id, key, .. } => {
                assert_eq!(backend_id, "Backend-1");
                assert_eq!(key, "10.0.0.1");
            }
            other => panic!("unexpected event {other:?}"),
        }
        match rx.recv().await.unwrap() {
            RoutingEvent::ActiveSet { active, .. } => {
                assert_eq!(active, vec!["Backend-1", "Backend-2"]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = EventHub::default();
        hub.on_route(b"k", "a");
        hub.on_active_set_changed(&[]);
    }

    #[test]
    fn test_line_format() {
        let line = RoutingEvent::active_set(vec!["a".into()]).to_line();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "active_set");
        assert_eq!(value["active"][0], "a");
        assert!(value["at"].is_string());
    }
}
