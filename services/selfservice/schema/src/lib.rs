//! sea-orm entities for the self-service tables.
//!
//! The per-kind code tables (`recovery_codes`, `verification_codes`) share one
//! layout and are addressed by table name from the repository, so they have no
//! entity here; see the migrations for their definition.

pub mod identities;
pub mod identity_addresses;
pub mod outbox_events;
pub mod selfservice_flows;
