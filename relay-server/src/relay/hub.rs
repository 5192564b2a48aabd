//! Broadcast hub: the owned set of live sessions and event fan-out.
//!
//! Fan-out is best-effort per session: a full or closed outbound queue drops
//! the event for that session only. A client that missed events recovers
//! them on its next non-recovered reconnect via replay, as long as it
//! declares an offset at or before the missed id.

use std::collections::HashMap;

use relay_shared::models::ServerEvent;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;
use uuid::Uuid;

/// Opaque identity of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maintains the set of currently connected sessions and delivers events to
/// them. Purely fan-out; no persistence responsibility.
#[derive(Debug)]
pub struct RelayHub {
    capacity: usize,
    sessions: Mutex<HashMap<SessionId, mpsc::Sender<ServerEvent>>>,
}

impl RelayHub {
    /// Creates a hub whose per-session outbound queues hold `capacity`
    /// events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a session to the membership set and returns the receiving half
    /// of its outbound queue.
    pub async fn register(&self, id: SessionId) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let count = {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(id, tx);
            sessions.len()
        };
        metrics::gauge!("relay_connected_sessions").set(usize_to_f64(count));
        debug!(session = %id, sessions = count, "session registered");
        rx
    }

    /// Removes a session from the membership set.
    pub async fn unregister(&self, id: SessionId) {
        let count = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(&id);
            sessions.len()
        };
        metrics::gauge!("relay_connected_sessions").set(usize_to_f64(count));
        debug!(session = %id, sessions = count, "session unregistered");
    }

    /// Delivers `event` to every currently connected session, including the
    /// publisher. Returns the number of sessions that accepted the event.
    pub async fn publish(&self, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        let mut stale = Vec::new();

        let mut sessions = self.sessions.lock().await;
        for (id, sender) in sessions.iter() {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(session = %id, "outbound queue full, dropping event for session");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => stale.push(*id),
            }
        }
        for id in stale {
            sessions.remove(&id);
        }

        delivered
    }

    /// Sends a sequence of events to exactly one session, in order. Used
    /// only for replay. Returns false if the session is gone or its queue
    /// closed mid-delivery.
    pub async fn deliver_to(&self, id: SessionId, events: Vec<ServerEvent>) -> bool {
        let sender = {
            let sessions = self.sessions.lock().await;
            sessions.get(&id).cloned()
        };
        let Some(sender) = sender else {
            return false;
        };

        for event in events {
            if sender.send(event).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Number of sessions currently in the membership set.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[allow(clippy::cast_precision_loss)]
fn usize_to_f64(value: usize) -> f64 {
    value as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_shared::models::ChatMessage;
    use tokio::sync::mpsc::error::TryRecvError;

    fn event(id: i64) -> ServerEvent {
        ServerEvent::from(ChatMessage {
            id,
            content: format!("msg-{id}"),
            author: "ada".to_string(),
        })
    }

    #[tokio::test]
    async fn test_publish_fans_out_to_every_session() {
        let hub = RelayHub::new(8);
        let mut rx_a = hub.register(SessionId::new()).await;
        let mut rx_b = hub.register(SessionId::new()).await;

        let delivered = hub.publish(&event(1)).await;

        assert_eq!(delivered, 2);
        assert_eq!(rx_a.try_recv().unwrap(), event(1));
        assert_eq!(rx_b.try_recv().unwrap(), event(1));
    }

    #[tokio::test]
    async fn test_publish_with_no_sessions_delivers_nothing() {
        let hub = RelayHub::new(8);
        assert_eq!(hub.publish(&event(1)).await, 0);
    }

    #[tokio::test]
    async fn test_publish_prunes_closed_sessions() {
        let hub = RelayHub::new(8);
        let id = SessionId::new();
        let rx = hub.register(id).await;
        drop(rx);

        assert_eq!(hub.publish(&event(1)).await, 0);
        assert_eq!(hub.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_publish_drops_for_full_queue_only() {
        let hub = RelayHub::new(1);
        let slow = SessionId::new();
        let mut rx_slow = hub.register(slow).await;
        let mut rx_fast = hub.register(SessionId::new()).await;

        assert_eq!(hub.publish(&event(1)).await, 2);
        // slow consumer never drains; its queue is now full
        assert_eq!(hub.publish(&event(2)).await, 1);

        assert_eq!(rx_fast.try_recv().unwrap(), event(1));
        assert_eq!(rx_fast.try_recv().unwrap(), event(2));
        assert_eq!(rx_slow.try_recv().unwrap(), event(1));
        assert_eq!(rx_slow.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn test_deliver_to_targets_one_session_in_order() {
        let hub = RelayHub::new(8);
        let target = SessionId::new();
        let mut rx_target = hub.register(target).await;
        let mut rx_other = hub.register(SessionId::new()).await;

        assert!(hub.deliver_to(target, vec![event(1), event(2)]).await);

        assert_eq!(rx_target.try_recv().unwrap(), event(1));
        assert_eq!(rx_target.try_recv().unwrap(), event(2));
        assert_eq!(rx_other.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn test_deliver_to_unknown_session_reports_failure() {
        let hub = RelayHub::new(8);
        assert!(!hub.deliver_to(SessionId::new(), vec![event(1)]).await);
    }

    #[tokio::test]
    async fn test_unregister_removes_membership() {
        let hub = RelayHub::new(8);
        let id = SessionId::new();
        let _rx = hub.register(id).await;
        assert_eq!(hub.session_count().await, 1);

        hub.unregister(id).await;
        assert_eq!(hub.session_count().await, 0);
    }
}
