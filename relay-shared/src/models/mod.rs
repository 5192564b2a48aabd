//! # Models
//!
//! Shared data structures: the durable message record and the event-channel
//! wire protocol spoken over the WebSocket.

pub mod message;
pub mod wire;

pub use message::ChatMessage;
pub use wire::{ClientEvent, Handshake, ServerEvent, DEFAULT_AUTHOR};
