//! Run events for observers.
//!
//! The executor emits [`RunEvent`]s on a [`tokio::sync::broadcast`] channel.
//! Events never carry request URLs, headers or bodies, since those may hold
//! resolved secrets.

use serde::{Deserialize, Serialize};

use vigil_types::RunStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        plan: String,
        environment: String,
        node_count: usize,
    },
    NodeStarted {
        node_id: String,
        method: String,
        target: String,
    },
    NodeCompleted {
        node_id: String,
        status: RunStatus,
        http_status: Option<u16>,
        duration_ms: u64,
    },
    RunCompleted {
        plan: String,
        status: RunStatus,
        duration_ms: u64,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Send to all current subscribers; dropped when nobody listens.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(RunEvent::RunStarted {
            plan: "checkout".into(),
            environment: "prod".into(),
            node_count: 3,
        });

        match rx.recv().await.unwrap() {
            RunEvent::RunStarted {
                plan, node_count, ..
            } => {
                assert_eq!(plan, "checkout");
                assert_eq!(node_count, 3);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let emitter = EventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit(RunEvent::NodeCompleted {
            node_id: "login".into(),
            status: RunStatus::Passed,
            http_status: Some(200),
            duration_ms: 12,
        });

        assert_eq!(rx1.recv().await.unwrap(), rx2.recv().await.unwrap());
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(RunEvent::RunCompleted {
            plan: "checkout".into(),
            status: RunStatus::Error,
            duration_ms: 5,
        });
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = RunEvent::NodeStarted {
            node_id: "me".into(),
            method: "GET".into(),
            target: "api".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "node_started");
        assert_eq!(json["target"], "api");
    }
}
