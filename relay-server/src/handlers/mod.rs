//! Request handlers.

pub mod socket;
