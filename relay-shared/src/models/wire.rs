use serde::{Deserialize, Serialize};

use super::message::ChatMessage;

/// Author label used when the client does not supply a username.
pub const DEFAULT_AUTHOR: &str = "anonymous";

/// Connection handshake, resolved from the upgrade request.
///
/// `username` and `server_offset` are client-supplied and untrusted;
/// `recovered` is set by the transport wrapper on a state-preserving
/// reconnect and is trusted as supplied; the relay does not independently
/// verify continuity.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Handshake {
    /// Unverified author label for everything this session publishes.
    pub username: Option<String>,

    /// Highest message id the client claims to have already seen.
    pub server_offset: Option<i64>,

    /// True iff no events were missed between disconnect and reconnect.
    #[serde(default)]
    pub recovered: bool,
}

impl Handshake {
    /// Resolved author label, defaulting to [`DEFAULT_AUTHOR`].
    #[must_use]
    pub fn author(&self) -> String {
        match self.username.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => DEFAULT_AUTHOR.to_string(),
        }
    }

    /// Resolved declared offset, defaulting to 0 ("replay everything").
    #[must_use]
    pub fn declared_offset(&self) -> i64 {
        self.server_offset.unwrap_or(0)
    }
}

/// Events a client may send over the event channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Publish a message to every connected session.
    Publish {
        /// Opaque message payload; no size limit is enforced here.
        content: String,
    },
}

/// Events the relay sends to clients, both for live broadcast and replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A durably recorded message. `id` is serialized as a string to avoid
    /// numeric-precision ambiguity across heterogeneous clients.
    Message {
        /// Message payload.
        content: String,
        /// Store-assigned identity, stringified.
        id: String,
        /// Author label recorded at publish time.
        author: String,
    },
}

impl From<ChatMessage> for ServerEvent {
    fn from(record: ChatMessage) -> Self {
        ServerEvent::Message {
            content: record.content,
            id: record.id.to_string(),
            author: record.author,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_defaults_apply() {
        let handshake = Handshake::default();
        assert_eq!(handshake.author(), "anonymous");
        assert_eq!(handshake.declared_offset(), 0);
        assert!(!handshake.recovered);
    }

    #[test]
    fn test_handshake_empty_username_falls_back_to_anonymous() {
        let handshake = Handshake {
            username: Some(String::new()),
            server_offset: Some(7),
            recovered: true,
        };
        assert_eq!(handshake.author(), "anonymous");
        assert_eq!(handshake.declared_offset(), 7);
        assert!(handshake.recovered);
    }

    #[test]
    fn test_publish_event_deserializes_from_wire_json() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"publish","content":"hi"}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::Publish {
                content: "hi".to_string()
            }
        );
    }

    #[test]
    fn test_server_event_serializes_id_as_string() {
        let event = ServerEvent::from(ChatMessage {
            id: 9007199254740993,
            content: "big".to_string(),
            author: "ada".to_string(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["id"], "9007199254740993");
        assert_eq!(json["content"], "big");
        assert_eq!(json["author"], "ada");
    }
}
