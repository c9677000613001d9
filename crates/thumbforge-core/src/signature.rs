//! HMAC-SHA256 URL signatures.
//!
//! The signature token is the first 16 hex characters of
//! `HMAC_SHA256(secret, payload)` where the payload is the canonical form
//! `/{size}/[filters:{flist}/]{path}[/as/{alias.ext}]`: the raw request
//! path with the signature segment stripped. Hashing the raw path keeps
//! verification independent of parsing details.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::SignatureError;
use crate::plan::RequestPlan;

type HmacSha256 = Hmac<Sha256>;

/// Number of hex characters kept from the HMAC digest (64-bit token).
const SIGNATURE_LEN: usize = 16;

/// Signs and verifies request URLs. An empty secret disables validation.
#[derive(Debug, Clone)]
pub struct Signer {
    secret: String,
}

impl Signer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// True when a secret is configured and signatures are required.
    pub fn is_enabled(&self) -> bool {
        !self.secret.is_empty()
    }

    /// Compute the signature token for a canonical payload.
    pub fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        let digest = mac.finalize().into_bytes();
        hex::encode(digest)[..SIGNATURE_LEN].to_string()
    }

    /// Verify a parsed plan against the configured secret.
    ///
    /// - no secret, no signature: OK (validation disabled)
    /// - no secret, signature present: reject (server not configured for it)
    /// - secret, no signature: reject (signature required)
    /// - otherwise: constant-time compare against the expected token
    pub fn verify(&self, plan: &RequestPlan) -> Result<(), SignatureError> {
        if !self.is_enabled() {
            if plan.provided_signature.is_empty() {
                return Ok(());
            }
            return Err(SignatureError::NotConfigured);
        }

        if plan.provided_signature.is_empty() {
            return Err(SignatureError::Missing);
        }

        let expected = self.sign(&plan.signature_payload);
        let matches: bool = expected
            .as_bytes()
            .ct_eq(plan.provided_signature.as_bytes())
            .into();
        if !matches {
            return Err(SignatureError::Mismatch);
        }
        Ok(())
    }

    /// Build a request URL for the given parameters, signed when a secret is
    /// configured. Intended for programmatic clients and tests.
    pub fn generate_url(&self, size_segment: &str, filter_string: &str, path: &str) -> String {
        let payload = if filter_string.is_empty() {
            format!("/{size_segment}/{path}")
        } else {
            format!("/{size_segment}/filters:{filter_string}/{path}")
        };

        if !self.is_enabled() {
            return format!("/thumbs{payload}");
        }
        format!("/thumbs/{}{payload}", self.sign(&payload))
    }
}
