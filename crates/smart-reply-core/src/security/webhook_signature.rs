use crate::utils::error::ApiError;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Checks `X-Webhook-Signature: [sha256=]<hex HMAC-SHA256 of the raw body>`
/// on gateway callbacks.
#[derive(Clone)]
pub struct WebhookSignatureValidator {
    secret: String,
}

impl WebhookSignatureValidator {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// `None` when no secret is configured (callbacks accepted unsigned).
    pub fn from_secret(secret: Option<&str>) -> Option<Self> {
        secret
            .filter(|s| !s.trim().is_empty())
            .map(|s| Self::new(s.to_string()))
    }

    pub fn validate(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), ApiError> {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ApiError::Unauthorized(format!("Missing {} header", SIGNATURE_HEADER))
            })?;

        let hex_digest = signature.trim().trim_start_matches("sha256=");
        let provided = hex::decode(hex_digest).map_err(|_| {
            warn!("Webhook signature is not valid hex");
            ApiError::Unauthorized("Invalid signature".to_string())
        })?;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| ApiError::InternalError(format!("HMAC error: {}", e)))?;
        mac.update(body);

        mac.verify_slice(&provided).map_err(|_| {
            warn!("Webhook signature mismatch");
            ApiError::Unauthorized("Invalid signature".to_string())
        })?;

        debug!("Webhook signature verified");
        Ok(())
    }

    pub fn sign(&self, body: &[u8]) -> Result<String, ApiError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| ApiError::InternalError(format!("HMAC error: {}", e)))?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
