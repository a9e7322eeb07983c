//! Shared plumbing for Tessera services: tracing setup, request ids, health
//! probes and wire formats.

pub mod health;
pub mod middleware;
pub mod serde;
pub mod tracing;
