#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings)]

//! Relay server library: durable message log, recovery-aware replay, and
//! live broadcast over WebSocket.

pub mod app_state;
pub mod db;
pub mod handlers;
pub mod relay;
pub mod routes;
pub mod server;
pub mod tracer;
