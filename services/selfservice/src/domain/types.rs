use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use tessera_core::serde::{to_rfc3339_ms, to_rfc3339_ms_opt};

use crate::domain::text::Message;
use crate::error::SelfServiceError;

/// Number of digits in an issued code.
pub const CODE_LEN: usize = 8;

/// Redemption attempts allowed per flow before it is exhausted.
pub const MAX_SUBMISSIONS: i32 = 5;

/// The only submission method this strategy accepts.
pub const CODE_METHOD: &str = "code";

// ── Flow kinds, types, states ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Recovery,
    Verification,
}

impl FlowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recovery => "recovery",
            Self::Verification => "verification",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recovery" => Some(Self::Recovery),
            "verification" => Some(Self::Verification),
            _ => None,
        }
    }

    /// Table holding this kind's codes.
    pub fn code_table(self) -> &'static str {
        match self {
            Self::Recovery => "recovery_codes",
            Self::Verification => "verification_codes",
        }
    }

    /// Kind of address a flow of this kind proves ownership of.
    pub fn address_kind(self) -> AddressKind {
        match self {
            Self::Recovery => AddressKind::Recovery,
            Self::Verification => AddressKind::Verifiable,
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Browser,
    Api,
}

impl FlowType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Api => "api",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "browser" => Some(Self::Browser),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

/// `ChooseMethod` → `Sent` → `PassedChallenge`. Expiry can end a flow in any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    ChooseMethod,
    Sent,
    PassedChallenge,
}

impl FlowState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChooseMethod => "choose_method",
            Self::Sent => "sent",
            Self::PassedChallenge => "passed_challenge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "choose_method" => Some(Self::ChooseMethod),
            "sent" => Some(Self::Sent),
            "passed_challenge" => Some(Self::PassedChallenge),
            _ => None,
        }
    }
}

// ── Channels and addresses ───────────────────────────────────────────────────

/// Delivery channel of a code. Email goes to the email courier, phone to SMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Phone,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
        }
    }
}

impl FromStr for Channel {
    type Err = SelfServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "phone" => Ok(Self::Phone),
            other => Err(SelfServiceError::UnsupportedChannel(other.to_owned())),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    Recovery,
    Verifiable,
}

impl AddressKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recovery => "recovery",
            Self::Verifiable => "verifiable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recovery" => Some(Self::Recovery),
            "verifiable" => Some(Self::Verifiable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressStatus {
    Pending,
    Sent,
    Completed,
}

impl AddressStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Identity as far as code delivery is concerned.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub nid: Uuid,
    pub traits: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    /// Public profile handed to message templates.
    pub fn projection(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "traits": self.traits,
        })
    }
}

/// Recovery or verifiable address, owned by an identity.
#[derive(Debug, Clone, Serialize)]
pub struct Address {
    pub id: Uuid,
    #[serde(skip)]
    pub nid: Uuid,
    pub identity_id: Uuid,
    pub kind: AddressKind,
    /// Channel as stored; parsed with [`Address::channel`] at delivery time.
    pub via: String,
    pub value: String,
    pub verified: bool,
    pub status: AddressStatus,
    #[serde(serialize_with = "to_rfc3339_ms_opt")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub updated_at: DateTime<Utc>,
}

impl Address {
    pub fn channel(&self) -> Result<Channel, SelfServiceError> {
        self.via.parse()
    }
}

// ── Codes ────────────────────────────────────────────────────────────────────

/// Persisted record of an issued code. Only the keyed digest is stored.
#[derive(Debug, Clone)]
pub struct Code {
    pub id: Uuid,
    pub nid: Uuid,
    pub kind: FlowKind,
    pub flow_id: Uuid,
    pub identity_id: Uuid,
    pub address_id: Uuid,
    pub code_hmac: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Code {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A freshly created code together with its raw value. The raw value exists
/// only here; it cannot be recovered from storage.
pub struct IssuedCode {
    pub code: Code,
    pub raw: String,
}

impl fmt::Debug for IssuedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCode")
            .field("code", &self.code)
            .field("raw", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CreateCodeParams {
    pub flow_id: Uuid,
    pub identity_id: Uuid,
    pub address_id: Uuid,
    /// Negative values produce an already-expired code.
    pub expires_in: Duration,
}

// ── Flows ────────────────────────────────────────────────────────────────────

/// Render state of a flow: where to submit, and what to tell the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowUi {
    pub action: String,
    pub method: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Address to offer for "resend code".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Code prefilled from a verification link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Flow {
    pub id: Uuid,
    #[serde(skip)]
    pub nid: Uuid,
    pub kind: FlowKind,
    #[serde(rename = "type")]
    pub flow_type: FlowType,
    pub state: FlowState,
    pub csrf_token: String,
    pub request_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_to: Option<String>,
    pub ui: FlowUi,
    /// Per-flow redemption counter; owned by the code store.
    #[serde(skip)]
    pub submit_count: i32,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub issued_at: DateTime<Utc>,
    #[serde(serialize_with = "to_rfc3339_ms")]
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

/// Inputs of [`Flow::new`].
pub struct NewFlow<'a> {
    pub nid: Uuid,
    pub kind: FlowKind,
    pub flow_type: FlowType,
    pub lifespan: Duration,
    pub csrf_token: String,
    pub request_url: String,
    pub public_url: &'a Url,
}

impl Flow {
    /// Build a fresh flow in `ChooseMethod`. Used for initial creation and for
    /// every fail-forward reissue; never mutates an existing flow.
    pub fn new(params: NewFlow<'_>, now: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            nid: params.nid,
            kind: params.kind,
            flow_type: params.flow_type,
            state: FlowState::ChooseMethod,
            csrf_token: params.csrf_token,
            request_url: params.request_url,
            return_to: None,
            ui: FlowUi {
                action: submit_url(params.public_url, params.kind, id).to_string(),
                method: "POST".to_owned(),
                messages: Vec::new(),
                email: None,
                code: None,
            },
            submit_count: 0,
            issued_at: now,
            expires_at: now + params.lifespan,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.ui.messages.push(message);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Replace all messages with a single one.
    pub fn set_message(&mut self, message: Message) {
        self.ui.messages.clear();
        self.ui.messages.push(message);
    }
}

/// Transport-agnostic submission body.
/// A request carrying `code` redeems; one without requests a code for `email`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitPayload {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub csrf_token: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl SubmitPayload {
    /// Submitted code, if any non-empty one was sent.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }
}

// ── URLs ─────────────────────────────────────────────────────────────────────

/// Append path segments to a base URL, keeping its existing path.
pub fn append_path(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// `<public>/self-service/<kind>?flow=<id>`
pub fn submit_url(public_url: &Url, kind: FlowKind, flow_id: Uuid) -> Url {
    let mut url = append_path(public_url, &["self-service", kind.as_str()]);
    url.query_pairs_mut()
        .append_pair("flow", &flow_id.to_string());
    url
}

/// `<base>?flow=<id>` for redirecting browsers to a flow's UI.
pub fn ui_url(ui_base: &Url, flow_id: Uuid) -> Url {
    let mut url = ui_base.clone();
    url.query_pairs_mut()
        .append_pair("flow", &flow_id.to_string());
    url
}
