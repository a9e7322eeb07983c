//! User-facing messages attached to a flow's UI. Ids are stable; clients
//! translate on them rather than on the English text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::types::FlowKind;

pub const INFO_RECOVERY_SUCCESSFUL: u32 = 1060001;
pub const INFO_RECOVERY_CODE_SENT: u32 = 1060003;
pub const INFO_VERIFICATION_SUCCESSFUL: u32 = 1080002;
pub const INFO_VERIFICATION_CODE_SENT: u32 = 1080003;

pub const ERROR_VALIDATION_GENERIC: u32 = 4000001;
pub const ERROR_VALIDATION_REQUIRED: u32 = 4000002;

pub const ERROR_RECOVERY_RETRY_SUCCESS: u32 = 4060001;
pub const ERROR_RECOVERY_STATE_FAILURE: u32 = 4060002;
pub const ERROR_RECOVERY_FLOW_EXPIRED: u32 = 4060005;
pub const ERROR_RECOVERY_CODE_INVALID_OR_USED: u32 = 4060006;

pub const ERROR_VERIFICATION_RETRY_SUCCESS: u32 = 4070002;
pub const ERROR_VERIFICATION_STATE_FAILURE: u32 = 4070003;
pub const ERROR_VERIFICATION_FLOW_EXPIRED: u32 = 4070005;
pub const ERROR_VERIFICATION_CODE_INVALID_OR_USED: u32 = 4070006;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u32,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
}

impl Message {
    fn info(id: u32, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            kind: MessageKind::Info,
            context: serde_json::Value::Null,
        }
    }

    fn error(id: u32, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            kind: MessageKind::Error,
            context: serde_json::Value::Null,
        }
    }

    fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

pub fn code_sent(kind: FlowKind) -> Message {
    match kind {
        FlowKind::Recovery => Message::info(
            INFO_RECOVERY_CODE_SENT,
            "An email containing a recovery code has been sent to the email address you provided. \
             If you have not received an email, check the spelling of the address and make sure \
             to use the address you registered with.",
        ),
        FlowKind::Verification => Message::info(
            INFO_VERIFICATION_CODE_SENT,
            "An email containing a verification code has been sent to the email address you \
             provided. If you have not received an email, check the spelling of the address and \
             make sure to use the address you registered with.",
        ),
    }
}

pub fn flow_successful(kind: FlowKind) -> Message {
    match kind {
        FlowKind::Recovery => Message::info(
            INFO_RECOVERY_SUCCESSFUL,
            "You successfully recovered your account.",
        ),
        FlowKind::Verification => Message::info(
            INFO_VERIFICATION_SUCCESSFUL,
            "You successfully verified your email address.",
        ),
    }
}

pub fn retry_success(kind: FlowKind) -> Message {
    let id = match kind {
        FlowKind::Recovery => ERROR_RECOVERY_RETRY_SUCCESS,
        FlowKind::Verification => ERROR_VERIFICATION_RETRY_SUCCESS,
    };
    Message::error(
        id,
        "The request was already completed successfully and can not be retried.",
    )
}

pub fn state_failure(kind: FlowKind) -> Message {
    let id = match kind {
        FlowKind::Recovery => ERROR_RECOVERY_STATE_FAILURE,
        FlowKind::Verification => ERROR_VERIFICATION_STATE_FAILURE,
    };
    Message::error(
        id,
        format!("The {kind} flow reached a failure state and must be retried."),
    )
}

pub fn flow_expired(kind: FlowKind, expired_at: DateTime<Utc>, now: DateTime<Utc>) -> Message {
    let id = match kind {
        FlowKind::Recovery => ERROR_RECOVERY_FLOW_EXPIRED,
        FlowKind::Verification => ERROR_VERIFICATION_FLOW_EXPIRED,
    };
    let minutes = (now - expired_at).num_seconds().max(0) as f64 / 60.0;
    Message::error(
        id,
        format!("The {kind} flow expired {minutes:.2} minutes ago, please try again."),
    )
    .with_context(serde_json::json!({ "expired_at": expired_at }))
}

pub fn code_invalid_or_used(kind: FlowKind) -> Message {
    let id = match kind {
        FlowKind::Recovery => ERROR_RECOVERY_CODE_INVALID_OR_USED,
        FlowKind::Verification => ERROR_VERIFICATION_CODE_INVALID_OR_USED,
    };
    Message::error(
        id,
        format!("The {kind} code is invalid or has already been used. Please try again."),
    )
}

pub fn required(property: &str) -> Message {
    Message::error(
        ERROR_VALIDATION_REQUIRED,
        format!("Property {property} is missing."),
    )
    .with_context(serde_json::json!({ "property": property }))
}

pub fn submitted_too_often() -> Message {
    Message::error(
        ERROR_VALIDATION_GENERIC,
        "The code was submitted too often. Please request another code.",
    )
}

pub fn csrf_violation() -> Message {
    Message::error(
        ERROR_VALIDATION_GENERIC,
        "The request was rejected to protect you from Cross-Site-Request-Forgery (CSRF).",
    )
}

pub fn invalid_method(method: &str) -> Message {
    Message::error(
        ERROR_VALIDATION_GENERIC,
        format!("Method \"{method}\" is not supported by this flow."),
    )
    .with_context(serde_json::json!({ "method": method }))
}
