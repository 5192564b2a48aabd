#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings)]

//! Shared models and configuration for the Relay chat server.

pub mod config;
pub mod models;
