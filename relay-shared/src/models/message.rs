use serde::{Deserialize, Serialize};

/// A durably recorded chat message.
///
/// `id` is assigned by the store on insert, strictly increasing and never
/// reused; insertion order equals id order. Records are never mutated or
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Store-assigned identity.
    pub id: i64,

    /// Opaque message payload.
    pub content: String,

    /// Unverified author label, `"anonymous"` when the client supplied none.
    pub author: String,
}
