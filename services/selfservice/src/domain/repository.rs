#![allow(async_fn_in_trait)]

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::template::Template;
use crate::domain::types::{
    Address, Channel, Code, CreateCodeParams, Flow, FlowKind, FlowState, Identity, IssuedCode,
};
use crate::error::SelfServiceError;

/// Persistent store of one-time codes, scoped to one network.
pub trait CodeRepository: Send + Sync {
    /// Generate, digest and persist a code. Storage faults surface as
    /// `CodeCreationFailed`.
    async fn create_code(
        &self,
        kind: FlowKind,
        params: &CreateCodeParams,
    ) -> Result<IssuedCode, SelfServiceError>;

    /// Redeem `raw` against the flow's codes.
    ///
    /// Every call counts as one submission on the flow, whatever its outcome.
    /// Once the flow has seen more than five, this fails with
    /// `CodeSubmittedTooOften` without looking at the codes. An expired match
    /// reports when it expired.
    async fn use_code(
        &self,
        kind: FlowKind,
        flow_id: Uuid,
        raw: &str,
    ) -> Result<Code, SelfServiceError>;

    /// Remove all codes of a flow. Idempotent.
    async fn delete_codes_of_flow(&self, kind: FlowKind, flow_id: Uuid)
    -> Result<(), SelfServiceError>;

    async fn count_codes_of_flow(&self, kind: FlowKind, flow_id: Uuid)
    -> Result<u64, SelfServiceError>;
}

/// Persistent store of recovery and verification flows.
pub trait FlowRepository: Send + Sync {
    async fn create(&self, flow: &Flow) -> Result<(), SelfServiceError>;

    /// Fails with `InvalidFlowState` when the stored state is not recognized.
    async fn find(&self, kind: FlowKind, id: Uuid) -> Result<Option<Flow>, SelfServiceError>;

    /// Persist state and UI, provided the stored state is still `expected`.
    /// Fails with `FlowStateConflict` otherwise. The submission counter is
    /// left untouched.
    async fn update(&self, flow: &Flow, expected: FlowState) -> Result<(), SelfServiceError>;

    async fn delete(&self, kind: FlowKind, id: Uuid) -> Result<(), SelfServiceError>;

    /// Kind and id of every flow whose `expires_at` is not after `now`.
    async fn list_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(FlowKind, Uuid)>, SelfServiceError>;
}

/// Lookup and update of identities and their addresses.
pub trait IdentityPort: Send + Sync {
    async fn find_address(
        &self,
        kind: FlowKind,
        via: Channel,
        value: &str,
    ) -> Result<Option<Address>, SelfServiceError>;

    async fn find_address_by_id(&self, id: Uuid) -> Result<Option<Address>, SelfServiceError>;

    async fn get_identity(&self, id: Uuid) -> Result<Identity, SelfServiceError>;

    async fn update_address(&self, address: &Address) -> Result<(), SelfServiceError>;
}

/// A delivery provider. Returns the id of the queued message.
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, template: &Template) -> Result<Uuid, SelfServiceError>;
}
