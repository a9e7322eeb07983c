use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};

/// Self-service domain error variants.
///
/// The code redemption variants stay distinct internally; the flow engine
/// folds not-found and already-used into one user-facing message.
#[derive(Debug, thiserror::Error)]
pub enum SelfServiceError {
    #[error("flow not found")]
    FlowNotFound,
    #[error("flow expired")]
    FlowExpired,
    #[error("flow is in an unrecognized state")]
    InvalidFlowState,
    #[error("flow was changed by another request")]
    FlowStateConflict,
    #[error("code not found")]
    CodeNotFound,
    #[error("code already used")]
    CodeAlreadyUsed,
    #[error("code expired")]
    CodeExpired { expired_at: DateTime<Utc> },
    #[error("code submitted too often")]
    CodeSubmittedTooOften,
    #[error("unknown address")]
    UnknownAddress,
    #[error("unsupported channel: {0}")]
    UnsupportedChannel(String),
    #[error("no code secret configured")]
    MissingCodeSecret,
    #[error("code creation failed")]
    CodeCreationFailed(anyhow::Error),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl SelfServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FlowNotFound => "FLOW_NOT_FOUND",
            Self::FlowExpired => "FLOW_EXPIRED",
            Self::InvalidFlowState => "INVALID_FLOW_STATE",
            Self::FlowStateConflict => "FLOW_STATE_CONFLICT",
            Self::CodeNotFound => "CODE_NOT_FOUND",
            Self::CodeAlreadyUsed => "CODE_ALREADY_USED",
            Self::CodeExpired { .. } => "CODE_EXPIRED",
            Self::CodeSubmittedTooOften => "CODE_SUBMITTED_TOO_OFTEN",
            Self::UnknownAddress => "UNKNOWN_ADDRESS",
            Self::UnsupportedChannel(_) => "UNSUPPORTED_CHANNEL",
            Self::MissingCodeSecret => "MISSING_CODE_SECRET",
            Self::CodeCreationFailed(_) => "CODE_CREATION_FAILED",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for SelfServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::FlowNotFound | Self::UnknownAddress => StatusCode::NOT_FOUND,
            Self::FlowExpired | Self::CodeExpired { .. } => StatusCode::GONE,
            Self::FlowStateConflict => StatusCode::CONFLICT,
            Self::CodeNotFound | Self::CodeAlreadyUsed | Self::UnsupportedChannel(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::CodeSubmittedTooOften => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidFlowState
            | Self::MissingCodeSecret
            | Self::CodeCreationFailed(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // 4xx are expected client outcomes and already visible in the TraceLayer span.
        match &self {
            Self::Internal(e) | Self::CodeCreationFailed(e) => {
                tracing::error!(error = ?e, kind = self.kind(), "internal error");
            }
            Self::InvalidFlowState | Self::MissingCodeSecret => {
                tracing::error!(kind = self.kind(), "internal error");
            }
            _ => {}
        }
        let body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}
