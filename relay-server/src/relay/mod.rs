//! The relay core: connection-state recovery and replay.
//!
//! [`hub::RelayHub`] owns the live-session membership set and fans published
//! events out to it. [`session::Session`] tracks one connection's recovery
//! state and lifecycle. [`controller::RelayController`] orchestrates the two
//! against the durable message log: append-then-broadcast on publish, and
//! scan-and-deliver replay on non-recovered connects.

pub mod controller;
pub mod hub;
pub mod session;

pub use controller::{ConnectedSession, RelayController};
pub use hub::{RelayHub, SessionId};
pub use session::{Session, SessionPhase};
