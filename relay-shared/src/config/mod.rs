//! # Configuration
//!
//! Configuration structures and loading logic for the relay server.

pub mod server;
