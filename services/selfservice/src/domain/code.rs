use std::fmt;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngExt;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::types::{CODE_LEN, Code, MAX_SUBMISSIONS};
use crate::error::SelfServiceError;

type HmacSha256 = Hmac<Sha256>;

const DIGITS: &[u8] = b"0123456789";

/// Generates one-time codes and checks submissions against stored digests.
///
/// Holds the ordered list of HMAC secrets: the first signs new codes, every
/// one of them is accepted on redemption so secrets can be rotated without
/// invalidating codes already in flight.
pub struct CodeGenerator {
    secrets: Vec<Vec<u8>>,
}

impl fmt::Debug for CodeGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeGenerator")
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

impl CodeGenerator {
    pub fn new<I, S>(secrets: I) -> Result<Self, SelfServiceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let secrets: Vec<Vec<u8>> = secrets
            .into_iter()
            .map(|s| s.as_ref().to_vec())
            .filter(|s| !s.is_empty())
            .collect();
        if secrets.is_empty() {
            return Err(SelfServiceError::MissingCodeSecret);
        }
        Ok(Self { secrets })
    }

    /// Fresh `CODE_LEN`-digit code, uniformly random.
    pub fn generate(&self) -> String {
        let mut rng = rand::rng();
        (0..CODE_LEN)
            .map(|_| DIGITS[rng.random_range(0..DIGITS.len())] as char)
            .collect()
    }

    /// Keyed digest of `raw` under the current secret, hex encoded.
    pub fn digest(&self, raw: &str) -> Result<String, SelfServiceError> {
        let secret = self
            .secrets
            .first()
            .ok_or(SelfServiceError::MissingCodeSecret)?;
        digest_with(secret, raw)
    }

    /// Find the code `raw` matches among the flow's codes.
    ///
    /// Matching tries every secret against every candidate in constant time.
    /// A match that was already used or has expired is reported as such.
    pub fn redeem<'a>(
        &self,
        codes: &'a [Code],
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<&'a Code, SelfServiceError> {
        if codes.is_empty() {
            return Err(SelfServiceError::CodeNotFound);
        }

        let mut matched = None;
        'secrets: for secret in &self.secrets {
            let candidate = digest_with(secret, raw)?;
            for code in codes {
                let equal: bool = code.code_hmac.as_bytes().ct_eq(candidate.as_bytes()).into();
                if equal {
                    matched = Some(code);
                    break 'secrets;
                }
            }
        }

        let code = matched.ok_or(SelfServiceError::CodeNotFound)?;
        if code.used_at.is_some() {
            return Err(SelfServiceError::CodeAlreadyUsed);
        }
        if code.is_expired(now) {
            return Err(SelfServiceError::CodeExpired {
                expired_at: code.expires_at,
            });
        }
        Ok(code)
    }
}

/// Whether a flow that has seen `submit_count` redemption attempts (including
/// the current one) must reject further attempts.
pub fn submissions_exhausted(submit_count: i32) -> bool {
    submit_count > MAX_SUBMISSIONS
}

fn digest_with(secret: &[u8], raw: &str) -> Result<String, SelfServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| SelfServiceError::Internal(anyhow::anyhow!("invalid code secret: {e}")))?;
    mac.update(raw.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
