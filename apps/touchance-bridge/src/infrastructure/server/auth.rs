//! Connection token check.
//!
//! Clients pass `?token=<value>` when opening the socket. The value is
//! reduced to URL-safe base64 form (padding cut, `+` and `/` mapped to `-`
//! and `_`) and compared with the configured access token. Rejection
//! happens before the upgrade with `401 Invalid token`.

use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Body of the rejection response.
pub const INVALID_TOKEN_BODY: &str = "Invalid token\n";

/// Query string of an upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    /// Presented token.
    pub token: Option<String>,
}

/// Reduce a token to URL-safe base64 form without padding.
#[must_use]
pub fn normalize_token(raw: &str) -> String {
    let unpadded = raw.split('=').next().unwrap_or_default();
    unpadded.replace('+', "-").replace('/', "_")
}

/// Derive an access token from a plain-text secret.
///
/// SHA-256 of the secret, URL-safe base64 without padding.
#[must_use]
pub fn hash_token(plain: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(plain.as_bytes()))
}

/// Configured access token.
#[derive(Clone)]
pub struct AccessToken(Arc<str>);

impl AccessToken {
    /// Wrap the expected token.
    #[must_use]
    pub fn new(expected: impl Into<Arc<str>>) -> Self {
        Self(expected.into())
    }

    /// Whether `presented` grants access.
    #[must_use]
    pub fn verify(&self, presented: Option<&str>) -> bool {
        presented.is_some_and(|token| normalize_token(token) == *self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// `401` response for a rejected upgrade.
#[must_use]
pub fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, INVALID_TOKEN_BODY).into_response()
}
