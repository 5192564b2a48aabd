//! WebSocket endpoint: one relay session per connection.
//!
//! Lifecycle per connection: admit to the hub, run the recovery decision
//! (replay the gap for non-recovered sessions), then process inbound
//! publishes until the peer goes away. Replay is delivered before the first
//! inbound publish from the session is handled.

use std::ops::ControlFlow;
use std::sync::Arc;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use relay_shared::models::{ClientEvent, Handshake, ServerEvent};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::relay::{RelayController, Session};

/// Handshake inputs carried on the upgrade request. `username` and
/// `server_offset` come from the client; `recovered` is set by the
/// client-side transport wrapper on a state-preserving reconnect.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    username: Option<String>,
    server_offset: Option<i64>,
    recovered: Option<bool>,
}

impl From<ConnectParams> for Handshake {
    fn from(params: ConnectParams) -> Self {
        Handshake {
            username: params.username,
            server_offset: params.server_offset,
            recovered: params.recovered.unwrap_or(false),
        }
    }
}

/// Upgrades `GET /ws` to a relay session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay_session(socket, params.into(), state))
}

async fn relay_session(socket: WebSocket, handshake: Handshake, state: Arc<AppState>) {
    let Some(controller) = state.relay.clone() else {
        warn!("relay not configured, closing connection");
        return;
    };

    let (sink, stream) = socket.split();

    let connected = controller.connect(&handshake).await;
    let mut session = connected.session;

    // Start draining the outbound queue before replay so a replay batch
    // larger than the queue capacity cannot wedge delivery.
    let forward = tokio::spawn(forward_events(connected.events, sink));

    controller.replay(&mut session).await;
    info!(session = %session.id(), author = session.author(), "session active");

    read_publishes(stream, &controller, &session).await;

    controller.disconnect(&mut session).await;
    forward.abort();
}

/// Drains the session's outbound queue into the socket.
async fn forward_events(
    mut events: mpsc::Receiver<ServerEvent>,
    mut sink: SplitSink<WebSocket, Message>,
) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(text) => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                error!(error = %err, "failed to serialize outbound event");
            }
        }
    }
}

/// Processes inbound frames until the peer disconnects.
async fn read_publishes(
    mut stream: SplitStream<WebSocket>,
    controller: &RelayController,
    session: &Session,
) {
    while let Some(frame) = stream.next().await {
        if handle_frame(frame, controller, session).await.is_break() {
            break;
        }
    }
}

/// Dispatches one inbound frame. Malformed frames and failed appends are
/// logged and the message dropped; only a close frame or a transport error
/// ends the session loop.
async fn handle_frame(
    frame: Result<Message, axum::Error>,
    controller: &RelayController,
    session: &Session,
) -> ControlFlow<()> {
    match frame {
        Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
            Ok(ClientEvent::Publish { content }) => {
                if let Err(err) = controller.publish(session, content).await {
                    metrics::counter!("relay_messages_dropped_total").increment(1);
                    error!(
                        session = %session.id(),
                        error = %err,
                        "dropping message that failed to append"
                    );
                }
            }
            Err(err) => {
                debug!(session = %session.id(), error = %err, "ignoring malformed frame");
            }
        },
        Ok(Message::Close(_)) => {
            debug!(session = %session.id(), "client closed connection");
            return ControlFlow::Break(());
        }
        // ping/pong are answered by axum itself
        Ok(_) => {}
        Err(err) => {
            debug!(session = %session.id(), error = %err, "websocket error");
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MessageStore, StoreError};
    use crate::relay::RelayHub;
    use relay_shared::models::ChatMessage;
    use std::sync::Mutex;
    use tokio::sync::mpsc::error::TryRecvError;

    /// In-memory stand-in for the PostgreSQL log.
    #[derive(Default)]
    struct NullLog {
        appended: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl MessageStore for NullLog {
        async fn ensure_schema(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn append(&self, content: &str, _author: &str) -> Result<i64, StoreError> {
            let mut appended = self.appended.lock().unwrap();
            appended.push(content.to_string());
            Ok(appended.len() as i64)
        }

        async fn scan_after(&self, _offset: i64) -> Result<Vec<ChatMessage>, StoreError> {
            Ok(Vec::new())
        }
    }

    async fn active_session(
        store: Arc<NullLog>,
    ) -> (RelayController, crate::relay::ConnectedSession) {
        let controller = RelayController::new(store, Arc::new(RelayHub::new(8)));
        let mut connected = controller.connect(&Handshake::default()).await;
        controller.replay(&mut connected.session).await;
        (controller, connected)
    }

    #[tokio::test]
    async fn test_malformed_frame_publishes_nothing_and_loop_continues() {
        let store = Arc::new(NullLog::default());
        let (controller, mut connected) = active_session(store.clone()).await;

        let flow = handle_frame(
            Ok(Message::Text("not json".into())),
            &controller,
            &connected.session,
        )
        .await;

        assert_eq!(flow, ControlFlow::Continue(()));
        assert!(store.appended.lock().unwrap().is_empty());
        assert_eq!(connected.events.try_recv(), Err(TryRecvError::Empty));

        // the session is still usable afterwards
        let flow = handle_frame(
            Ok(Message::Text(r#"{"type":"publish","content":"hi"}"#.into())),
            &controller,
            &connected.session,
        )
        .await;

        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(store.appended.lock().unwrap().as_slice(), ["hi"]);
        assert!(connected.events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_close_frame_ends_the_session_loop() {
        let store = Arc::new(NullLog::default());
        let (controller, connected) = active_session(store).await;

        let flow = handle_frame(Ok(Message::Close(None)), &controller, &connected.session).await;

        assert_eq!(flow, ControlFlow::Break(()));
    }

    #[tokio::test]
    async fn test_ping_frame_is_ignored() {
        let store = Arc::new(NullLog::default());
        let (controller, connected) = active_session(store.clone()).await;

        let flow = handle_frame(
            Ok(Message::Ping(Vec::new().into())),
            &controller,
            &connected.session,
        )
        .await;

        assert_eq!(flow, ControlFlow::Continue(()));
        assert!(store.appended.lock().unwrap().is_empty());
    }

    #[test]
    fn test_connect_params_map_onto_handshake_defaults() {
        let handshake: Handshake = ConnectParams {
            username: None,
            server_offset: None,
            recovered: None,
        }
        .into();

        assert_eq!(handshake.author(), "anonymous");
        assert_eq!(handshake.declared_offset(), 0);
        assert!(!handshake.recovered);
    }

    #[test]
    fn test_connect_params_parse_from_query_string() {
        let params: ConnectParams =
            serde_urlencoded::from_str("username=ada&server_offset=12&recovered=true").unwrap();
        let handshake: Handshake = params.into();

        assert_eq!(handshake.author(), "ada");
        assert_eq!(handshake.declared_offset(), 12);
        assert!(handshake.recovered);
    }
}
