//! Session tokens as seen by the sync engine.
//!
//! Sign-in and token storage live elsewhere; the engine only needs the raw
//! token for the socket URL and a way to tell when it stops being usable.

use std::fmt;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use time::{Duration, OffsetDateTime};

pub mod bridge;

pub use bridge::spawn_token_bridge;

/// Sentinel used when the server runs without authentication.
pub const PUBLIC_TOKEN: &str = "public";

/// How long before expiry a token is reported as due for refresh.
pub const REFRESH_THRESHOLD: Duration = Duration::minutes(5);

#[derive(Clone, PartialEq, Eq)]
pub enum SessionToken {
    Public,
    Bearer {
        token: String,
        expires_at: Option<OffsetDateTime>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Valid,
    RefreshDue,
    Expired,
}

#[derive(Deserialize)]
struct ExpiryClaims {
    exp: Option<i64>,
}

impl SessionToken {
    /// Interprets a token handed over by the auth provider. Blank input yields
    /// `None`. JWTs contribute their `exp` claim; opaque tokens never expire.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw == PUBLIC_TOKEN {
            return Some(SessionToken::Public);
        }
        Some(SessionToken::Bearer {
            token: raw.to_string(),
            expires_at: jwt_expiry(raw),
        })
    }

    pub fn bearer(token: impl Into<String>, expires_at: Option<OffsetDateTime>) -> Self {
        SessionToken::Bearer {
            token: token.into(),
            expires_at,
        }
    }

    /// Value appended to the socket URL as `?token=`.
    pub fn as_str(&self) -> &str {
        match self {
            SessionToken::Public => PUBLIC_TOKEN,
            SessionToken::Bearer { token, .. } => token,
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, SessionToken::Public)
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        match self {
            SessionToken::Public => None,
            SessionToken::Bearer { expires_at, .. } => *expires_at,
        }
    }

    pub fn status(&self, now: OffsetDateTime) -> TokenStatus {
        match self.expires_at() {
            Some(exp) if now >= exp => TokenStatus::Expired,
            Some(exp) if now + REFRESH_THRESHOLD >= exp => TokenStatus::RefreshDue,
            _ => TokenStatus::Valid,
        }
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionToken::Public => f.write_str("SessionToken::Public"),
            SessionToken::Bearer { expires_at, .. } => f
                .debug_struct("SessionToken::Bearer")
                .field("token", &"<redacted>")
                .field("expires_at", expires_at)
                .finish(),
        }
    }
}

/// Reads `exp` without checking the signature; the server does that.
fn jwt_expiry(token: &str) -> Option<OffsetDateTime> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    let data =
        jsonwebtoken::decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .ok()?;
    OffsetDateTime::from_unix_timestamp(data.claims.exp?).ok()
}
