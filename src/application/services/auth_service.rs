//! Authentication service for collaborator API tokens.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AppError;
use serde_json::json;

type HmacSha256 = Hmac<Sha256>;

/// Authenticates Bearer tokens against the configured `API_TOKEN`.
///
/// Only the HMAC-SHA256 of the token (keyed by `signing_secret`) is kept in
/// memory. Presented tokens are hashed the same way and compared in constant
/// time.
pub struct AuthService {
    expected_mac: Vec<u8>,
    signing_secret: String,
}

impl AuthService {
    /// Creates a new authentication service.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] if the signing secret cannot key an HMAC.
    pub fn new(api_token: &str, signing_secret: String) -> Result<Self, AppError> {
        let mut service = Self {
            expected_mac: Vec::new(),
            signing_secret,
        };
        service.expected_mac = service.mac(api_token)?.finalize().into_bytes().to_vec();
        Ok(service)
    }

    fn mac(&self, token: &str) -> Result<HmacSha256, AppError> {
        let mut mac = HmacSha256::new_from_slice(self.signing_secret.as_bytes()).map_err(|e| {
            AppError::internal("Invalid token signing secret", json!({ "reason": e.to_string() }))
        })?;
        mac.update(token.as_bytes());
        Ok(mac)
    }

    /// Hashes a raw token. Returns a 64-character lowercase hex MAC.
    pub fn hash_token(&self, token: &str) -> Result<String, AppError> {
        Ok(hex::encode(self.mac(token)?.finalize().into_bytes()))
    }

    /// # Errors
    ///
    /// Returns [`AppError::Unauthorized`] if the token does not match.
    pub fn authenticate(&self, token: &str) -> Result<(), AppError> {
        self.mac(token)?.verify_slice(&self.expected_mac).map_err(|_| {
            AppError::unauthorized("Unauthorized", json!({"reason": "Invalid token"}))
        })
    }
}
