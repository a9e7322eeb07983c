use anyhow::Context as _;
use chrono::{DateTime, Duration, Utc};
use rand::RngExt;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::FlowSettings;
use crate::domain::repository::{CodeRepository, Dispatcher, FlowRepository, IdentityPort};
use crate::domain::text::{self, Message};
use crate::domain::types::{
    AddressStatus, CODE_METHOD, Channel, Flow, FlowKind, FlowState, FlowType, NewFlow,
    SubmitPayload, append_path,
};
use crate::error::SelfServiceError;
use crate::usecase::sender::CodeSender;

const CSRF_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const CSRF_TOKEN_LEN: usize = 32;

fn generate_csrf_token() -> String {
    let mut rng = rand::rng();
    (0..CSRF_TOKEN_LEN)
        .map(|_| CSRF_CHARSET[rng.random_range(0..CSRF_CHARSET.len())] as char)
        .collect()
}

fn lifespan(settings: &FlowSettings) -> Result<Duration, SelfServiceError> {
    Ok(Duration::from_std(settings.flow_lifespan).context("flow lifespan out of range")?)
}

fn new_flow(
    nid: Uuid,
    kind: FlowKind,
    flow_type: FlowType,
    request_url: String,
    return_to: Option<String>,
    settings: &FlowSettings,
    now: DateTime<Utc>,
) -> Result<Flow, SelfServiceError> {
    let mut flow = Flow::new(
        NewFlow {
            nid,
            kind,
            flow_type,
            lifespan: lifespan(settings)?,
            csrf_token: generate_csrf_token(),
            request_url,
            public_url: &settings.public_url,
        },
        now,
    );
    flow.return_to = return_to;
    Ok(flow)
}

// ── Create ───────────────────────────────────────────────────────────────────

pub struct CreateFlowInput {
    pub kind: FlowKind,
    pub flow_type: FlowType,
    pub request_url: String,
}

pub struct CreateFlowUseCase<F: FlowRepository> {
    pub flows: F,
    pub nid: Uuid,
    pub settings: FlowSettings,
}

impl<F: FlowRepository> CreateFlowUseCase<F> {
    pub async fn execute(&self, input: CreateFlowInput) -> Result<Flow, SelfServiceError> {
        let flow = new_flow(
            self.nid,
            input.kind,
            input.flow_type,
            input.request_url,
            self.settings.return_to_url.as_ref().map(ToString::to_string),
            &self.settings,
            Utc::now(),
        )?;
        self.flows.create(&flow).await?;
        tracing::info!(flow_id = %flow.id, kind = %flow.kind, flow_type = flow.flow_type.as_str(), "flow created");
        Ok(flow)
    }
}

// ── Get ──────────────────────────────────────────────────────────────────────

pub struct GetFlowUseCase<F: FlowRepository> {
    pub flows: F,
}

impl<F: FlowRepository> GetFlowUseCase<F> {
    pub async fn execute(&self, kind: FlowKind, id: Uuid) -> Result<Flow, SelfServiceError> {
        let flow = self
            .flows
            .find(kind, id)
            .await?
            .ok_or(SelfServiceError::FlowNotFound)?;
        if flow.is_expired(Utc::now()) {
            return Err(SelfServiceError::FlowExpired);
        }
        Ok(flow)
    }
}

// ── Prefill from a verification link ─────────────────────────────────────────

pub struct PrefillCodeUseCase<F: FlowRepository> {
    pub flows: F,
}

impl<F: FlowRepository> PrefillCodeUseCase<F> {
    /// Put the code from a clicked link into the flow's UI and hand the
    /// opening browser a fresh CSRF token. Finished flows are left alone;
    /// submitting them reissues anyway.
    pub async fn execute(&self, flow_id: Uuid, code: &str) -> Result<Flow, SelfServiceError> {
        let mut flow = self
            .flows
            .find(FlowKind::Verification, flow_id)
            .await?
            .ok_or(SelfServiceError::FlowNotFound)?;
        if flow.state != FlowState::PassedChallenge {
            flow.ui.code = Some(code.to_owned());
            flow.csrf_token = generate_csrf_token();
            flow.updated_at = Utc::now();
            self.flows.update(&flow, flow.state).await?;
        }
        Ok(flow)
    }
}

// ── Submit ───────────────────────────────────────────────────────────────────

/// Why a submission abandoned its flow for a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    AlreadySucceeded,
    StateFailure,
    Expired,
    TooManyAttempts,
    Forbidden,
    InvalidPayload,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    /// The submitted flow, updated and persisted.
    Continue(Flow),
    /// A fresh flow of the same kind and type, persisted, carrying a message.
    Reissued { flow: Flow, reason: RetryReason },
}

pub struct SubmitFlowInput {
    pub kind: FlowKind,
    pub flow_id: Uuid,
    pub payload: SubmitPayload,
}

pub struct SubmitFlowUseCase<F, C, I, E, S>
where
    F: FlowRepository,
    C: CodeRepository,
    I: IdentityPort,
    E: Dispatcher,
    S: Dispatcher,
{
    pub flows: F,
    pub sender: CodeSender<C, I, E, S>,
    pub nid: Uuid,
}

impl<F, C, I, E, S> SubmitFlowUseCase<F, C, I, E, S>
where
    F: FlowRepository,
    C: CodeRepository,
    I: IdentityPort,
    E: Dispatcher,
    S: Dispatcher,
{
    pub async fn execute(&self, input: SubmitFlowInput) -> Result<SubmitOutcome, SelfServiceError> {
        let SubmitFlowInput {
            kind,
            flow_id,
            payload,
        } = input;
        let now = Utc::now();

        let flow = match self.flows.find(kind, flow_id).await {
            Ok(Some(flow)) => flow,
            Ok(None) => return Err(SelfServiceError::FlowNotFound),
            Err(SelfServiceError::InvalidFlowState) => {
                tracing::warn!(%flow_id, %kind, "stored flow state unrecognized");
                let request_url =
                    append_path(&self.settings().public_url, &["self-service", kind.as_str(), "browser"]);
                let fresh = new_flow(
                    self.nid,
                    kind,
                    FlowType::Browser,
                    request_url.to_string(),
                    None,
                    self.settings(),
                    now,
                )?;
                return self
                    .reissue(fresh, RetryReason::StateFailure, text::state_failure(kind))
                    .await;
            }
            Err(e) => return Err(e),
        };

        if payload.code().is_none() && payload.method != CODE_METHOD {
            let message = text::invalid_method(&payload.method);
            return self
                .reissue_from(&flow, RetryReason::InvalidPayload, message, now)
                .await;
        }

        if flow.is_expired(now) {
            self.sender.codes.delete_codes_of_flow(kind, flow.id).await?;
            let message = text::flow_expired(kind, flow.expires_at, now);
            return self
                .reissue_from(&flow, RetryReason::Expired, message, now)
                .await;
        }

        if flow.state == FlowState::PassedChallenge {
            return self
                .reissue_from(
                    &flow,
                    RetryReason::AlreadySucceeded,
                    text::retry_success(kind),
                    now,
                )
                .await;
        }

        match payload.code() {
            Some(code) => self.redeem(flow, code, now).await,
            None => self.issue(flow, &payload, now).await,
        }
    }

    async fn redeem(
        &self,
        mut flow: Flow,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, SelfServiceError> {
        let kind = flow.kind;
        let loaded = flow.state;
        let redeemed = match self.sender.codes.use_code(kind, flow.id, code).await {
            Ok(code) => code,
            Err(SelfServiceError::CodeNotFound | SelfServiceError::CodeAlreadyUsed) => {
                tracing::debug!(flow_id = %flow.id, %kind, "code rejected");
                flow.set_message(text::code_invalid_or_used(kind));
                flow.updated_at = now;
                return self.commit(flow, loaded, now).await;
            }
            Err(SelfServiceError::CodeSubmittedTooOften) => {
                tracing::info!(flow_id = %flow.id, %kind, "flow exhausted its submissions");
                self.sender.codes.delete_codes_of_flow(kind, flow.id).await?;
                return self
                    .reissue_from(
                        &flow,
                        RetryReason::TooManyAttempts,
                        text::submitted_too_often(),
                        now,
                    )
                    .await;
            }
            Err(SelfServiceError::CodeExpired { expired_at }) => {
                self.sender.codes.delete_codes_of_flow(kind, flow.id).await?;
                let message = text::flow_expired(kind, expired_at, now);
                return self
                    .reissue_from(&flow, RetryReason::Expired, message, now)
                    .await;
            }
            Err(e) => return Err(e),
        };

        let mut address = self
            .sender
            .identities
            .find_address_by_id(redeemed.address_id)
            .await?
            .ok_or_else(|| {
                SelfServiceError::Internal(anyhow::anyhow!(
                    "address {} of code {} is gone",
                    redeemed.address_id,
                    redeemed.id
                ))
            })?;
        address.verified = true;
        address.verified_at = Some(now);
        address.status = AddressStatus::Completed;
        address.updated_at = now;
        self.sender.identities.update_address(&address).await?;

        let return_to = flow
            .return_to
            .clone()
            .unwrap_or_else(|| self.ui_url(kind).to_string());
        flow.state = FlowState::PassedChallenge;
        flow.ui.action = return_to;
        flow.ui.method = "GET".to_owned();
        flow.ui.code = None;
        flow.set_message(text::flow_successful(kind));
        flow.updated_at = now;

        tracing::info!(
            flow_id = %flow.id,
            %kind,
            identity_id = %redeemed.identity_id,
            code_id = %redeemed.id,
            "flow passed challenge"
        );
        self.commit(flow, loaded, now).await
    }

    async fn issue(
        &self,
        mut flow: Flow,
        payload: &SubmitPayload,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, SelfServiceError> {
        let kind = flow.kind;
        let loaded = flow.state;
        let Some(email) = payload.email() else {
            flow.set_message(text::required("email"));
            flow.updated_at = now;
            return self.commit(flow, loaded, now).await;
        };

        if flow.flow_type == FlowType::Browser && !csrf_matches(&flow, payload) {
            tracing::warn!(flow_id = %flow.id, %kind, "csrf token mismatch");
            return self
                .reissue_from(&flow, RetryReason::Forbidden, text::csrf_violation(), now)
                .await;
        }

        let sent = match kind {
            FlowKind::Recovery => {
                self.sender
                    .send_recovery_code(&flow, Channel::Email, email)
                    .await
            }
            FlowKind::Verification => {
                self.sender
                    .send_verification_code(&flow, Channel::Email, email)
                    .await
            }
        };
        match sent {
            Ok(()) | Err(SelfServiceError::UnknownAddress) => {}
            Err(e) => return Err(e),
        }

        flow.state = FlowState::Sent;
        flow.set_message(text::code_sent(kind));
        flow.ui.email = Some(email.to_owned());
        flow.updated_at = now;
        self.commit(flow, loaded, now).await
    }

    /// Store `flow` over the state it was loaded in. A flow that another
    /// request moved on in the meantime is abandoned for a fresh one.
    async fn commit(
        &self,
        flow: Flow,
        loaded: FlowState,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, SelfServiceError> {
        match self.flows.update(&flow, loaded).await {
            Ok(()) => Ok(SubmitOutcome::Continue(flow)),
            Err(SelfServiceError::FlowStateConflict) => {
                tracing::warn!(flow_id = %flow.id, kind = %flow.kind, "flow changed concurrently");
                let message = text::state_failure(flow.kind);
                self.reissue_from(&flow, RetryReason::StateFailure, message, now)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    async fn reissue_from(
        &self,
        old: &Flow,
        reason: RetryReason,
        message: Message,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, SelfServiceError> {
        let fresh = new_flow(
            self.nid,
            old.kind,
            old.flow_type,
            old.request_url.clone(),
            old.return_to.clone(),
            self.settings(),
            now,
        )?;
        tracing::info!(flow_id = %old.id, new_flow_id = %fresh.id, kind = %old.kind, ?reason, "reissuing flow");
        self.reissue(fresh, reason, message).await
    }

    async fn reissue(
        &self,
        fresh: Flow,
        reason: RetryReason,
        message: Message,
    ) -> Result<SubmitOutcome, SelfServiceError> {
        let flow = fresh.with_message(message);
        self.flows.create(&flow).await?;
        Ok(SubmitOutcome::Reissued { flow, reason })
    }

    fn settings(&self) -> &FlowSettings {
        &self.sender.settings
    }

    fn ui_url(&self, kind: FlowKind) -> &url::Url {
        match kind {
            FlowKind::Recovery => &self.settings().recovery_ui_url,
            FlowKind::Verification => &self.settings().verification_ui_url,
        }
    }
}

fn csrf_matches(flow: &Flow, payload: &SubmitPayload) -> bool {
    payload
        .csrf_token
        .as_deref()
        .is_some_and(|token| token.as_bytes().ct_eq(flow.csrf_token.as_bytes()).into())
}

// ── Sweep ────────────────────────────────────────────────────────────────────

pub struct SweepExpiredFlowsUseCase<F, C>
where
    F: FlowRepository,
    C: CodeRepository,
{
    pub flows: F,
    pub codes: C,
}

impl<F, C> SweepExpiredFlowsUseCase<F, C>
where
    F: FlowRepository,
    C: CodeRepository,
{
    /// Delete every flow past its expiry together with its codes.
    pub async fn execute(&self, now: DateTime<Utc>) -> Result<usize, SelfServiceError> {
        let expired = self.flows.list_expired(now).await?;
        for &(kind, id) in &expired {
            self.codes.delete_codes_of_flow(kind, id).await?;
            self.flows.delete(kind, id).await?;
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "swept expired flows");
        }
        Ok(expired.len())
    }
}
