use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use url::Url;
use uuid::Uuid;

use tessera_selfservice::config::FlowSettings;
use tessera_selfservice::domain::code::{CodeGenerator, submissions_exhausted};
use tessera_selfservice::domain::repository::{
    CodeRepository, Dispatcher, FlowRepository, IdentityPort,
};
use tessera_selfservice::domain::template::Template;
use tessera_selfservice::domain::types::{
    Address, AddressKind, AddressStatus, Channel, Code, CreateCodeParams, Flow, FlowKind,
    FlowState, FlowType, Identity, IssuedCode, SubmitPayload,
};
use tessera_selfservice::error::SelfServiceError;
use tessera_selfservice::usecase::flow::{
    CreateFlowInput, CreateFlowUseCase, GetFlowUseCase, PrefillCodeUseCase, SubmitFlowInput,
    SubmitFlowUseCase, SubmitOutcome, SweepExpiredFlowsUseCase,
};
use tessera_selfservice::usecase::sender::CodeSender;

// ── Shared in-memory world ───────────────────────────────────────────────────

/// Everything the mocks persist. Flows carry their submission counter the
/// same way the flow table does.
#[derive(Default)]
pub struct World {
    pub flows: HashMap<Uuid, Flow>,
    pub codes: Vec<Code>,
    pub identities: Vec<Identity>,
    pub addresses: Vec<Address>,
    /// Flows whose stored state no longer parses.
    pub corrupted: Vec<Uuid>,
}

pub type SharedWorld = Arc<Mutex<World>>;

// ── MockCodeRepo ─────────────────────────────────────────────────────────────

pub struct MockCodeRepo {
    pub world: SharedWorld,
    pub nid: Uuid,
    pub generator: Arc<CodeGenerator>,
}

impl CodeRepository for MockCodeRepo {
    async fn create_code(
        &self,
        kind: FlowKind,
        params: &CreateCodeParams,
    ) -> Result<IssuedCode, SelfServiceError> {
        let raw = self.generator.generate();
        let now = Utc::now();
        let code = Code {
            id: Uuid::new_v4(),
            nid: self.nid,
            kind,
            flow_id: params.flow_id,
            identity_id: params.identity_id,
            address_id: params.address_id,
            code_hmac: self.generator.digest(&raw)?,
            expires_at: now + params.expires_in,
            used_at: None,
            created_at: now,
        };
        self.world.lock().unwrap().codes.push(code.clone());
        Ok(IssuedCode { code, raw })
    }

    async fn use_code(
        &self,
        kind: FlowKind,
        flow_id: Uuid,
        raw: &str,
    ) -> Result<Code, SelfServiceError> {
        let mut world = self.world.lock().unwrap();
        let nid = self.nid;
        let Some(flow) = world
            .flows
            .get_mut(&flow_id)
            .filter(|f| f.nid == nid && f.kind == kind)
        else {
            return Err(SelfServiceError::CodeNotFound);
        };
        flow.submit_count += 1;
        if submissions_exhausted(flow.submit_count) {
            return Err(SelfServiceError::CodeSubmittedTooOften);
        }

        let candidates: Vec<Code> = world
            .codes
            .iter()
            .filter(|c| c.nid == nid && c.kind == kind && c.flow_id == flow_id)
            .cloned()
            .collect();
        let now = Utc::now();
        let id = self.generator.redeem(&candidates, raw, now)?.id;
        let code = world.codes.iter_mut().find(|c| c.id == id).unwrap();
        if code.used_at.is_some() {
            return Err(SelfServiceError::CodeAlreadyUsed);
        }
        code.used_at = Some(now);
        Ok(code.clone())
    }

    async fn delete_codes_of_flow(
        &self,
        kind: FlowKind,
        flow_id: Uuid,
    ) -> Result<(), SelfServiceError> {
        let nid = self.nid;
        self.world
            .lock()
            .unwrap()
            .codes
            .retain(|c| !(c.nid == nid && c.kind == kind && c.flow_id == flow_id));
        Ok(())
    }

    async fn count_codes_of_flow(
        &self,
        kind: FlowKind,
        flow_id: Uuid,
    ) -> Result<u64, SelfServiceError> {
        let nid = self.nid;
        Ok(self
            .world
            .lock()
            .unwrap()
            .codes
            .iter()
            .filter(|c| c.nid == nid && c.kind == kind && c.flow_id == flow_id)
            .count() as u64)
    }
}

// ── MockFlowRepo ─────────────────────────────────────────────────────────────

pub struct MockFlowRepo {
    pub world: SharedWorld,
    pub nid: Uuid,
}

impl FlowRepository for MockFlowRepo {
    async fn create(&self, flow: &Flow) -> Result<(), SelfServiceError> {
        let mut flow = flow.clone();
        flow.nid = self.nid;
        flow.submit_count = 0;
        self.world.lock().unwrap().flows.insert(flow.id, flow);
        Ok(())
    }

    async fn find(&self, kind: FlowKind, id: Uuid) -> Result<Option<Flow>, SelfServiceError> {
        let world = self.world.lock().unwrap();
        if world.corrupted.contains(&id) {
            return Err(SelfServiceError::InvalidFlowState);
        }
        Ok(world
            .flows
            .get(&id)
            .filter(|f| f.nid == self.nid && f.kind == kind)
            .cloned())
    }

    async fn update(&self, flow: &Flow, expected: FlowState) -> Result<(), SelfServiceError> {
        let mut world = self.world.lock().unwrap();
        let stored = world
            .flows
            .get_mut(&flow.id)
            .filter(|f| f.nid == self.nid && f.state == expected)
            .ok_or(SelfServiceError::FlowStateConflict)?;
        let submit_count = stored.submit_count;
        *stored = flow.clone();
        stored.submit_count = submit_count;
        Ok(())
    }

    async fn delete(&self, kind: FlowKind, id: Uuid) -> Result<(), SelfServiceError> {
        let mut world = self.world.lock().unwrap();
        if world
            .flows
            .get(&id)
            .is_some_and(|f| f.nid == self.nid && f.kind == kind)
        {
            world.flows.remove(&id);
        }
        Ok(())
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(FlowKind, Uuid)>, SelfServiceError> {
        Ok(self
            .world
            .lock()
            .unwrap()
            .flows
            .values()
            .filter(|f| f.nid == self.nid && f.expires_at <= now)
            .map(|f| (f.kind, f.id))
            .collect())
    }
}

// ── StaleFlowRepo ────────────────────────────────────────────────────────────

/// Reads of one flow return a snapshot taken earlier, the way a request that
/// loaded the flow before a concurrent write sees it. Writes go through.
pub struct StaleFlowRepo {
    pub inner: MockFlowRepo,
    pub snapshot: Flow,
}

impl FlowRepository for StaleFlowRepo {
    async fn create(&self, flow: &Flow) -> Result<(), SelfServiceError> {
        self.inner.create(flow).await
    }

    async fn find(&self, kind: FlowKind, id: Uuid) -> Result<Option<Flow>, SelfServiceError> {
        if id == self.snapshot.id {
            return Ok(Some(self.snapshot.clone()));
        }
        self.inner.find(kind, id).await
    }

    async fn update(&self, flow: &Flow, expected: FlowState) -> Result<(), SelfServiceError> {
        self.inner.update(flow, expected).await
    }

    async fn delete(&self, kind: FlowKind, id: Uuid) -> Result<(), SelfServiceError> {
        self.inner.delete(kind, id).await
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(FlowKind, Uuid)>, SelfServiceError> {
        self.inner.list_expired(now).await
    }
}

// ── MockIdentityRepo ─────────────────────────────────────────────────────────

pub struct MockIdentityRepo {
    pub world: SharedWorld,
    pub nid: Uuid,
}

impl IdentityPort for MockIdentityRepo {
    async fn find_address(
        &self,
        kind: FlowKind,
        via: Channel,
        value: &str,
    ) -> Result<Option<Address>, SelfServiceError> {
        Ok(self
            .world
            .lock()
            .unwrap()
            .addresses
            .iter()
            .find(|a| {
                a.nid == self.nid
                    && a.kind == kind.address_kind()
                    && a.via == via.as_str()
                    && a.value.eq_ignore_ascii_case(value)
            })
            .cloned())
    }

    async fn find_address_by_id(&self, id: Uuid) -> Result<Option<Address>, SelfServiceError> {
        Ok(self
            .world
            .lock()
            .unwrap()
            .addresses
            .iter()
            .find(|a| a.id == id && a.nid == self.nid)
            .cloned())
    }

    async fn get_identity(&self, id: Uuid) -> Result<Identity, SelfServiceError> {
        self.world
            .lock()
            .unwrap()
            .identities
            .iter()
            .find(|i| i.id == id && i.nid == self.nid)
            .cloned()
            .ok_or_else(|| SelfServiceError::Internal(anyhow::anyhow!("identity {id} not found")))
    }

    async fn update_address(&self, address: &Address) -> Result<(), SelfServiceError> {
        let mut world = self.world.lock().unwrap();
        if let Some(stored) = world
            .addresses
            .iter_mut()
            .find(|a| a.id == address.id && a.nid == self.nid)
        {
            *stored = address.clone();
        }
        Ok(())
    }
}

// ── MockDispatcher ───────────────────────────────────────────────────────────

pub struct MockDispatcher {
    pub sent: Arc<Mutex<Vec<Template>>>,
}

impl Dispatcher for MockDispatcher {
    async fn dispatch(&self, template: &Template) -> Result<Uuid, SelfServiceError> {
        self.sent.lock().unwrap().push(template.clone());
        Ok(Uuid::new_v4())
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

pub type MockSender = CodeSender<MockCodeRepo, MockIdentityRepo, MockDispatcher, MockDispatcher>;

/// Wires mocks over one shared world for a single network.
pub struct Harness {
    pub world: SharedWorld,
    pub nid: Uuid,
    pub generator: Arc<CodeGenerator>,
    pub emails: Arc<Mutex<Vec<Template>>>,
    pub sms: Arc<Mutex<Vec<Template>>>,
    pub settings: FlowSettings,
}

pub fn test_settings() -> FlowSettings {
    FlowSettings {
        flow_lifespan: StdDuration::from_secs(3600),
        code_lifespan: StdDuration::from_secs(3600),
        public_url: Url::parse("https://id.example.com/").unwrap(),
        verification_ui_url: Url::parse("https://ui.example.com/verification").unwrap(),
        recovery_ui_url: Url::parse("https://ui.example.com/recovery").unwrap(),
        return_to_url: None,
    }
}

impl Harness {
    pub fn new() -> Self {
        Self {
            world: Arc::new(Mutex::new(World::default())),
            nid: Uuid::new_v4(),
            generator: Arc::new(CodeGenerator::new(["test-secret"]).unwrap()),
            emails: Arc::new(Mutex::new(vec![])),
            sms: Arc::new(Mutex::new(vec![])),
            settings: test_settings(),
        }
    }

    /// Same storage seen from another network.
    pub fn with_nid(&self, nid: Uuid) -> Self {
        Self {
            world: Arc::clone(&self.world),
            nid,
            generator: Arc::clone(&self.generator),
            emails: Arc::clone(&self.emails),
            sms: Arc::clone(&self.sms),
            settings: self.settings.clone(),
        }
    }

    pub fn code_repo(&self) -> MockCodeRepo {
        MockCodeRepo {
            world: Arc::clone(&self.world),
            nid: self.nid,
            generator: Arc::clone(&self.generator),
        }
    }

    pub fn flow_repo(&self) -> MockFlowRepo {
        MockFlowRepo {
            world: Arc::clone(&self.world),
            nid: self.nid,
        }
    }

    pub fn identity_repo(&self) -> MockIdentityRepo {
        MockIdentityRepo {
            world: Arc::clone(&self.world),
            nid: self.nid,
        }
    }

    pub fn sender(&self) -> MockSender {
        CodeSender {
            codes: self.code_repo(),
            identities: self.identity_repo(),
            email: MockDispatcher {
                sent: Arc::clone(&self.emails),
            },
            sms: MockDispatcher {
                sent: Arc::clone(&self.sms),
            },
            settings: self.settings.clone(),
        }
    }

    pub async fn create_flow(&self, kind: FlowKind, flow_type: FlowType) -> Flow {
        CreateFlowUseCase {
            flows: self.flow_repo(),
            nid: self.nid,
            settings: self.settings.clone(),
        }
        .execute(CreateFlowInput {
            kind,
            flow_type,
            request_url: format!("https://id.example.com/self-service/{kind}/api"),
        })
        .await
        .unwrap()
    }

    pub async fn submit(
        &self,
        kind: FlowKind,
        flow_id: Uuid,
        payload: SubmitPayload,
    ) -> Result<SubmitOutcome, SelfServiceError> {
        self.submit_via(self.flow_repo(), kind, flow_id, payload)
            .await
    }

    /// Submit through a caller-supplied flow store.
    pub async fn submit_via<F: FlowRepository>(
        &self,
        flows: F,
        kind: FlowKind,
        flow_id: Uuid,
        payload: SubmitPayload,
    ) -> Result<SubmitOutcome, SelfServiceError> {
        SubmitFlowUseCase {
            flows,
            sender: self.sender(),
            nid: self.nid,
        }
        .execute(SubmitFlowInput {
            kind,
            flow_id,
            payload,
        })
        .await
    }

    pub async fn get_flow(&self, kind: FlowKind, id: Uuid) -> Result<Flow, SelfServiceError> {
        GetFlowUseCase {
            flows: self.flow_repo(),
        }
        .execute(kind, id)
        .await
    }

    pub async fn prefill(&self, flow_id: Uuid, code: &str) -> Result<Flow, SelfServiceError> {
        PrefillCodeUseCase {
            flows: self.flow_repo(),
        }
        .execute(flow_id, code)
        .await
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, SelfServiceError> {
        SweepExpiredFlowsUseCase {
            flows: self.flow_repo(),
            codes: self.code_repo(),
        }
        .execute(now)
        .await
    }

    /// Store an identity with one address and return both.
    pub fn add_address(&self, kind: AddressKind, via: Channel, value: &str) -> (Identity, Address) {
        let now = Utc::now();
        let identity = Identity {
            id: Uuid::new_v4(),
            nid: self.nid,
            traits: serde_json::json!({ "email": value }),
            created_at: now,
        };
        let address = Address {
            id: Uuid::new_v4(),
            nid: self.nid,
            identity_id: identity.id,
            kind,
            via: via.as_str().to_owned(),
            value: value.to_owned(),
            verified: false,
            status: AddressStatus::Pending,
            verified_at: None,
            created_at: now,
            updated_at: now,
        };
        let mut world = self.world.lock().unwrap();
        world.identities.push(identity.clone());
        world.addresses.push(address.clone());
        (identity, address)
    }

    pub fn address(&self, id: Uuid) -> Address {
        self.world
            .lock()
            .unwrap()
            .addresses
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .unwrap()
    }

    pub fn stored_flow(&self, id: Uuid) -> Option<Flow> {
        self.world.lock().unwrap().flows.get(&id).cloned()
    }

    pub fn expire_flow(&self, id: Uuid) {
        let mut world = self.world.lock().unwrap();
        let flow = world.flows.get_mut(&id).unwrap();
        flow.expires_at = Utc::now() - Duration::minutes(10);
    }

    /// Move the expiry of every code of the flow to `at`.
    pub fn expire_codes(&self, flow_id: Uuid, at: DateTime<Utc>) {
        let mut world = self.world.lock().unwrap();
        for code in world.codes.iter_mut().filter(|c| c.flow_id == flow_id) {
            code.expires_at = at;
        }
    }

    pub fn corrupt_flow(&self, id: Uuid) {
        self.world.lock().unwrap().corrupted.push(id);
    }

    pub fn code_count(&self, kind: FlowKind, flow_id: Uuid) -> usize {
        self.world
            .lock()
            .unwrap()
            .codes
            .iter()
            .filter(|c| c.kind == kind && c.flow_id == flow_id)
            .count()
    }

    pub fn sent_emails(&self) -> Vec<Template> {
        self.emails.lock().unwrap().clone()
    }

    pub fn sent_sms(&self) -> Vec<Template> {
        self.sms.lock().unwrap().clone()
    }

    /// Raw code carried by the most recent email, if it carried one.
    pub fn last_emailed_code(&self) -> Option<String> {
        match self.emails.lock().unwrap().last()? {
            Template::RecoveryCodeValid { recovery_code, .. } => Some(recovery_code.clone()),
            Template::VerificationCodeValid {
                verification_code, ..
            } => Some(verification_code.clone()),
            _ => None,
        }
    }

    pub fn code_params(&self, flow_id: Uuid, address: &Address, expires_in: Duration) -> CreateCodeParams {
        CreateCodeParams {
            flow_id,
            identity_id: address.identity_id,
            address_id: address.id,
            expires_in,
        }
    }
}

pub fn request_code(email: &str) -> SubmitPayload {
    SubmitPayload {
        method: "code".to_owned(),
        email: Some(email.to_owned()),
        ..Default::default()
    }
}

pub fn submit_code(code: &str) -> SubmitPayload {
    SubmitPayload {
        method: "code".to_owned(),
        code: Some(code.to_owned()),
        ..Default::default()
    }
}

/// A code that differs from `code` in its last digit.
pub fn wrong_code(code: &str) -> String {
    let mut digits: Vec<u8> = code.bytes().collect();
    if let Some(last) = digits.last_mut() {
        *last = if *last == b'9' { b'0' } else { *last + 1 };
    }
    String::from_utf8(digits).unwrap()
}
