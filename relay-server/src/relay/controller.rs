//! Relay controller: orchestrates the log store, the session tracker, and
//! the broadcast hub.
//!
//! The publish path is append-then-broadcast, in that order: a message is
//! only announced once the store has assigned it a durable id, otherwise
//! clients would observe a message with no stable identity and later
//! replay-offset arithmetic would break.
//!
//! Replay runs concurrently with appends from other sessions, so a message
//! appended mid-scan may arrive both in the replay batch and as a live
//! broadcast. Delivery is at-least-once; clients that care can de-duplicate
//! by id.

use std::sync::Arc;

use relay_shared::models::{ChatMessage, Handshake, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::db::{MessageStore, StoreError};

use super::hub::RelayHub;
use super::session::{Session, SessionPhase};

/// A session admitted to the hub, together with the receiving half of its
/// outbound event queue.
#[derive(Debug)]
pub struct ConnectedSession {
    /// Recovery state and lifecycle for this connection.
    pub session: Session,
    /// Ordered stream of events addressed to this session.
    pub events: mpsc::Receiver<ServerEvent>,
}

/// Orchestrator for connect, replay, publish, and disconnect.
#[derive(Clone)]
pub struct RelayController {
    store: Arc<dyn MessageStore>,
    hub: Arc<RelayHub>,
}

impl std::fmt::Debug for RelayController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayController").finish_non_exhaustive()
    }
}

impl RelayController {
    /// Creates a controller over the given store and hub.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, hub: Arc<RelayHub>) -> Self {
        Self { store, hub }
    }

    /// Admits a new connection to the hub membership set.
    pub async fn connect(&self, handshake: &Handshake) -> ConnectedSession {
        let session = Session::new(handshake);
        let events = self.hub.register(session.id()).await;
        debug!(
            session = %session.id(),
            author = session.author(),
            recovered = session.recovered(),
            declared_offset = session.declared_offset(),
            "session connected"
        );
        ConnectedSession { session, events }
    }

    /// Runs the recovery decision for a freshly connected session.
    ///
    /// Recovered sessions skip replay entirely: the transport already
    /// delivered anything broadcast during the gap. Non-recovered sessions
    /// get every record after their declared offset, in ascending id order,
    /// delivered to this session only. A failed scan is logged and replay is
    /// skipped; the session still proceeds to `Active`, with a gap in its
    /// history.
    pub async fn replay(&self, session: &mut Session) {
        if session.recovered() {
            trace!(session = %session.id(), "recovered session, skipping replay");
            session.activate();
            return;
        }

        session.begin_replay();
        match self.store.scan_after(session.declared_offset()).await {
            Ok(records) => {
                let count = records.len();
                let events = records.into_iter().map(ServerEvent::from).collect();
                if self.hub.deliver_to(session.id(), events).await {
                    metrics::counter!("relay_replayed_messages_total")
                        .increment(u64::try_from(count).unwrap_or(u64::MAX));
                    debug!(session = %session.id(), count, "replay delivered");
                } else {
                    debug!(session = %session.id(), "session went away during replay");
                }
            }
            Err(err) => {
                warn!(session = %session.id(), error = %err, "skipping replay after scan failure");
            }
        }
        session.activate();
    }

    /// Handles one publish request from an active session: append to the
    /// durable log, then broadcast the record under its assigned id.
    ///
    /// # Errors
    /// Propagates the store error when the append fails. Nothing is
    /// broadcast in that case; the caller logs and drops the message, and
    /// the connection stays usable.
    pub async fn publish(&self, session: &Session, content: String) -> Result<i64, StoreError> {
        debug_assert_eq!(session.phase(), SessionPhase::Active);

        let id = self.store.append(&content, session.author()).await?;
        metrics::counter!("relay_messages_published_total").increment(1);

        let record = ChatMessage {
            id,
            content,
            author: session.author().to_string(),
        };
        let delivered = self.hub.publish(&ServerEvent::from(record)).await;
        trace!(session = %session.id(), id, delivered, "published message");

        Ok(id)
    }

    /// Releases the session from the hub membership set.
    pub async fn disconnect(&self, session: &mut Session) {
        self.hub.unregister(session.id()).await;
        session.close();
        debug!(session = %session.id(), "session disconnected");
    }
}
