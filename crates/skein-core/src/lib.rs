//! Core functionality shared across all Skein components.
//!
//! This crate holds the configuration snapshot, the operator diagnostics
//! (`doctor`) engine, and UDP socket buffer negotiation used at gateway
//! socket setup.

pub mod buffers;
pub mod config;
pub mod doctor;
pub mod test_support;
