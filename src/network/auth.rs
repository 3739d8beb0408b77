//! Resume Tokens
//!
//! HS256 JWTs that let a participant rejoin the session it dropped out of.
//! The server issues a token when a participant attaches and validates it on
//! `Resume`. Subject is the participant id, `sid` pins the session.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::core::{ParticipantId, SessionId};
use crate::error::{AuthenticationFault, ErrorKind, SecurityFault};

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Issuer written into tokens when none is configured.
pub const DEFAULT_ISSUER: &str = "relic-session";

/// Resume-token configuration.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// HS256 secret. Tokens can be neither issued nor validated without it.
    pub secret: Option<String>,
    /// Issuer claim written and expected.
    pub issuer: String,
    /// Token lifetime.
    pub ttl: Duration,
    /// Whether to skip expiry validation (for testing only).
    pub skip_expiry: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: None,
            issuer: DEFAULT_ISSUER.to_string(),
            ttl: DEFAULT_TOKEN_TTL,
            skip_expiry: false,
        }
    }
}

impl AuthConfig {
    /// Config with a secret and default issuer/lifetime.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            ..Default::default()
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            secret: std::env::var("RELIC_AUTH_SECRET").ok(),
            issuer: std::env::var("RELIC_AUTH_ISSUER").unwrap_or(defaults.issuer),
            ttl: std::env::var("RELIC_AUTH_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.ttl),
            skip_expiry: std::env::var("RELIC_AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Check if a secret is configured.
    pub fn is_configured(&self) -> bool {
        self.secret.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Claims carried by a resume token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeClaims {
    /// Participant id (UUID string).
    pub sub: String,
    /// Session id (hex).
    pub sid: String,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at timestamp.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
}

impl ResumeClaims {
    /// Participant named by the token.
    pub fn participant(&self) -> Result<ParticipantId, AuthError> {
        ParticipantId::from_uuid_str(&self.sub).ok_or_else(|| AuthError::MissingClaim("sub".into()))
    }

    /// Session named by the token.
    pub fn session(&self) -> Result<SessionId, AuthError> {
        let bytes = hex::decode(&self.sid).map_err(|_| AuthError::MissingClaim("sid".into()))?;
        bytes
            .try_into()
            .map_err(|_| AuthError::MissingClaim("sid".into()))
    }
}

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No secret configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// No token supplied.
    #[error("missing resume token")]
    MissingToken,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer claim doesn't match.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Token belongs to another participant or session.
    #[error("token does not match {0}")]
    Mismatch(&'static str),
    /// Required claim is missing or unreadable.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// JWT encoding or decoding error.
    #[error("token error: {0}")]
    Token(String),
}

impl AuthError {
    /// Taxonomy kind.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            AuthError::Expired => ErrorKind::Authentication(AuthenticationFault::Expired),
            AuthError::InvalidSignature | AuthError::Mismatch(_) => {
                ErrorKind::Security(SecurityFault::Authentication)
            }
            AuthError::NotConfigured | AuthError::MissingToken => {
                ErrorKind::Authentication(AuthenticationFault::Missing)
            }
            _ => ErrorKind::Authentication(AuthenticationFault::InvalidCredentials),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Issue a resume token for `participant` in `session`.
pub fn issue_resume_token(
    participant: &ParticipantId,
    session: &SessionId,
    config: &AuthConfig,
) -> Result<String, AuthError> {
    let secret = config.secret.as_deref().filter(|s| !s.is_empty()).ok_or(AuthError::NotConfigured)?;
    let now = unix_now();
    let claims = ResumeClaims {
        sub: participant.to_uuid_string(),
        sid: hex::encode(session),
        exp: now + config.ttl.as_secs(),
        iat: now,
        iss: Some(config.issuer.clone()),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Token(e.to_string()))
}

/// Validate a resume token and extract its claims.
pub fn validate_resume_token(token: &str, config: &AuthConfig) -> Result<ResumeClaims, AuthError> {
    let secret = config.secret.as_deref().filter(|s| !s.is_empty()).ok_or(AuthError::NotConfigured)?;
    if token.trim().is_empty() {
        return Err(AuthError::MissingToken);
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims = std::collections::HashSet::new();
    validation.set_issuer(&[config.issuer.as_str()]);
    validation.validate_aud = false;
    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let key = DecodingKey::from_secret(secret.as_bytes());
    let token_data: TokenData<ResumeClaims> = decode(token, &key, &validation).map_err(map_jwt_error)?;
    let claims = token_data.claims;

    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }
    if claims.sid.is_empty() {
        return Err(AuthError::MissingClaim("sid".into()));
    }

    // Library leeway is 60s; resume tokens expire on the second.
    if !config.skip_expiry && claims.exp > 0 && unix_now() > claims.exp {
        return Err(AuthError::Expired);
    }

    Ok(claims)
}

/// Validate a token and check it names `participant` in `session`.
pub fn authorize_resume(
    token: &str,
    participant: &ParticipantId,
    session: &SessionId,
    config: &AuthConfig,
) -> Result<ResumeClaims, AuthError> {
    let claims = validate_resume_token(token, config)?;
    if claims.participant()? != *participant {
        return Err(AuthError::Mismatch("participant"));
    }
    if claims.session()? != *session {
        return Err(AuthError::Mismatch("session"));
    }
    Ok(claims)
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            AuthError::InvalidFormat
        }
        _ => AuthError::Token(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
