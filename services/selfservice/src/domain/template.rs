use serde::Serialize;

/// Message handed to a courier. Serialized into the outbox payload with its
/// variant name under `template_type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "template_type", rename_all = "snake_case")]
pub enum Template {
    RecoveryCodeValid {
        to: String,
        recovery_code: String,
        identity: serde_json::Value,
    },
    /// Sent to addresses that belong to no identity.
    RecoveryCodeInvalid { to: String },
    VerificationCodeValid {
        to: String,
        verification_code: String,
        verification_url: String,
        identity: serde_json::Value,
    },
    VerificationCodeInvalid { to: String },
    VerificationCodeSms {
        to: String,
        code: String,
        identity: serde_json::Value,
    },
}

impl Template {
    pub fn recipient(&self) -> &str {
        match self {
            Self::RecoveryCodeValid { to, .. }
            | Self::RecoveryCodeInvalid { to }
            | Self::VerificationCodeValid { to, .. }
            | Self::VerificationCodeInvalid { to }
            | Self::VerificationCodeSms { to, .. } => to,
        }
    }

    pub fn template_type(&self) -> &'static str {
        match self {
            Self::RecoveryCodeValid { .. } => "recovery_code_valid",
            Self::RecoveryCodeInvalid { .. } => "recovery_code_invalid",
            Self::VerificationCodeValid { .. } => "verification_code_valid",
            Self::VerificationCodeInvalid { .. } => "verification_code_invalid",
            Self::VerificationCodeSms { .. } => "verification_code_sms",
        }
    }
}
