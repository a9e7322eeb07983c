use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::types::{Flow, FlowKind, FlowType, SubmitPayload, append_path, ui_url};
use crate::error::SelfServiceError;
use crate::state::AppState;
use crate::usecase::flow::{
    CreateFlowInput, CreateFlowUseCase, GetFlowUseCase, PrefillCodeUseCase, RetryReason,
    SubmitFlowInput, SubmitFlowUseCase, SubmitOutcome,
};

fn parse_kind(raw: &str) -> Result<FlowKind, SelfServiceError> {
    FlowKind::parse(raw).ok_or(SelfServiceError::FlowNotFound)
}

fn ui_base(state: &AppState, kind: FlowKind) -> &url::Url {
    match kind {
        FlowKind::Recovery => &state.settings.recovery_ui_url,
        FlowKind::Verification => &state.settings.verification_ui_url,
    }
}

fn redirect_to_ui(state: &AppState, flow: &Flow) -> Response {
    Redirect::to(ui_url(ui_base(state, flow.kind), flow.id).as_str()).into_response()
}

async fn create_flow(
    state: &AppState,
    kind: FlowKind,
    flow_type: FlowType,
) -> Result<Flow, SelfServiceError> {
    let request_url = append_path(
        &state.settings.public_url,
        &["self-service", kind.as_str(), flow_type.as_str()],
    );
    let usecase = CreateFlowUseCase {
        flows: state.flow_repo(),
        nid: state.nid,
        settings: state.settings.clone(),
    };
    usecase
        .execute(CreateFlowInput {
            kind,
            flow_type,
            request_url: request_url.to_string(),
        })
        .await
}

// ── POST /self-service/{kind}/api ─────────────────────────────────────────────

pub async fn create_api_flow(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<impl IntoResponse, SelfServiceError> {
    let flow = create_flow(&state, parse_kind(&kind)?, FlowType::Api).await?;
    Ok((StatusCode::CREATED, Json(flow)))
}

// ── GET /self-service/{kind}/browser ──────────────────────────────────────────

pub async fn create_browser_flow(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Response, SelfServiceError> {
    let flow = create_flow(&state, parse_kind(&kind)?, FlowType::Browser).await?;
    Ok(redirect_to_ui(&state, &flow))
}

// ── GET /self-service/{kind}/flows?id= ────────────────────────────────────────

#[derive(Deserialize)]
pub struct GetFlowQuery {
    pub id: Uuid,
}

pub async fn get_flow(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<GetFlowQuery>,
) -> Result<Json<Flow>, SelfServiceError> {
    let usecase = GetFlowUseCase {
        flows: state.flow_repo(),
    };
    let flow = usecase.execute(parse_kind(&kind)?, query.id).await?;
    Ok(Json(flow))
}

// ── POST /self-service/{kind}?flow= ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct SubmitQuery {
    pub flow: Uuid,
}

/// Body of a 410 telling API clients to continue with a replacement flow.
#[derive(Serialize)]
pub struct FlowReplacedResponse {
    pub kind: &'static str,
    pub message: String,
    pub use_flow_id: Uuid,
    pub flow: Flow,
}

fn reason_kind(reason: RetryReason) -> &'static str {
    match reason {
        RetryReason::AlreadySucceeded => "FLOW_ALREADY_SUCCEEDED",
        RetryReason::StateFailure => "FLOW_STATE_FAILURE",
        RetryReason::Expired => "FLOW_EXPIRED",
        RetryReason::TooManyAttempts => "CODE_SUBMITTED_TOO_OFTEN",
        RetryReason::Forbidden => "CSRF_VIOLATION",
        RetryReason::InvalidPayload => "INVALID_PAYLOAD",
    }
}

pub async fn submit_flow(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<SubmitQuery>,
    Json(payload): Json<SubmitPayload>,
) -> Result<Response, SelfServiceError> {
    let usecase = SubmitFlowUseCase {
        flows: state.flow_repo(),
        sender: state.code_sender(),
        nid: state.nid,
    };
    let outcome = usecase
        .execute(SubmitFlowInput {
            kind: parse_kind(&kind)?,
            flow_id: query.flow,
            payload,
        })
        .await?;

    let response = match outcome {
        SubmitOutcome::Continue(flow) => match flow.flow_type {
            FlowType::Api => (StatusCode::OK, Json(flow)).into_response(),
            FlowType::Browser => redirect_to_ui(&state, &flow),
        },
        SubmitOutcome::Reissued { flow, reason } => match flow.flow_type {
            FlowType::Api => {
                let message = flow
                    .ui
                    .messages
                    .last()
                    .map(|m| m.text.clone())
                    .unwrap_or_default();
                let body = FlowReplacedResponse {
                    kind: reason_kind(reason),
                    message,
                    use_flow_id: flow.id,
                    flow,
                };
                (StatusCode::GONE, Json(body)).into_response()
            }
            FlowType::Browser => redirect_to_ui(&state, &flow),
        },
    };
    Ok(response)
}

// ── GET /self-service/verification?flow=&code= ────────────────────────────────

#[derive(Deserialize)]
pub struct LinkQuery {
    pub flow: Uuid,
    pub code: String,
}

/// Verification link landing: prefill the code and hand over to the UI.
pub async fn open_link(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<LinkQuery>,
) -> Result<Response, SelfServiceError> {
    if parse_kind(&kind)? != FlowKind::Verification {
        return Err(SelfServiceError::FlowNotFound);
    }
    let usecase = PrefillCodeUseCase {
        flows: state.flow_repo(),
    };
    let flow = usecase.execute(query.flow, &query.code).await?;
    Ok(redirect_to_ui(&state, &flow))
}
