use std::time::Duration;

use url::Url;
use uuid::Uuid;

/// Self-service configuration loaded from environment variables.
#[derive(Debug)]
pub struct SelfServiceConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// TCP port to listen on (default 4433). Env var: `SELFSERVICE_PORT`.
    pub port: u16,
    /// Network (tenant) every row written by this process belongs to. Env var: `NETWORK_ID`.
    pub network_id: Uuid,
    /// HMAC secrets for code digests, comma separated. The first one signs new
    /// codes; the rest are only accepted on redemption. Env var: `CODE_SECRETS`.
    pub code_secrets: Vec<String>,
    /// How long an issued code stays redeemable. Env var: `CODE_LIFESPAN_SECS`.
    pub code_lifespan: Duration,
    /// How long a flow stays usable. Env var: `FLOW_LIFESPAN_SECS`.
    pub flow_lifespan: Duration,
    /// Period of the expired-flow sweep. Env var: `SWEEP_INTERVAL_SECS`.
    pub sweep_interval: Duration,
    /// Public base URL of this service, used for verification links. Env var: `PUBLIC_URL`.
    pub public_url: Url,
    /// UI that renders verification flows. Env var: `VERIFICATION_UI_URL`.
    pub verification_ui_url: Url,
    /// UI that renders recovery flows. Env var: `RECOVERY_UI_URL`.
    pub recovery_ui_url: Url,
    /// Where a finished flow sends the user. Env var: `RETURN_TO_URL`.
    pub return_to_url: Option<Url>,
}

impl SelfServiceConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL"),
            port: std::env::var("SELFSERVICE_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4433),
            network_id: std::env::var("NETWORK_ID")
                .expect("NETWORK_ID")
                .parse()
                .expect("NETWORK_ID must be a UUID"),
            code_secrets: parse_secrets(&std::env::var("CODE_SECRETS").expect("CODE_SECRETS")),
            code_lifespan: secs_from_env("CODE_LIFESPAN_SECS", 3600),
            flow_lifespan: secs_from_env("FLOW_LIFESPAN_SECS", 3600),
            sweep_interval: secs_from_env("SWEEP_INTERVAL_SECS", 300),
            public_url: url_from_env("PUBLIC_URL"),
            verification_ui_url: url_from_env("VERIFICATION_UI_URL"),
            recovery_ui_url: url_from_env("RECOVERY_UI_URL"),
            return_to_url: std::env::var("RETURN_TO_URL")
                .ok()
                .map(|v| Url::parse(&v).expect("invalid RETURN_TO_URL")),
        }
    }

    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings {
            flow_lifespan: self.flow_lifespan,
            code_lifespan: self.code_lifespan,
            public_url: self.public_url.clone(),
            verification_ui_url: self.verification_ui_url.clone(),
            recovery_ui_url: self.recovery_ui_url.clone(),
            return_to_url: self.return_to_url.clone(),
        }
    }
}

/// The part of the configuration the use cases read on every request.
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub flow_lifespan: Duration,
    pub code_lifespan: Duration,
    pub public_url: Url,
    pub verification_ui_url: Url,
    pub recovery_ui_url: Url,
    pub return_to_url: Option<Url>,
}

fn parse_secrets(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn secs_from_env(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

fn url_from_env(key: &str) -> Url {
    let raw = std::env::var(key).unwrap_or_else(|_| panic!("{key}"));
    Url::parse(&raw).unwrap_or_else(|e| panic!("invalid {key}: {e}"))
}
