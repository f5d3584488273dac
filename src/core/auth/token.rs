//! Signed token codec
//!
//! Issues and verifies compact HS256 tokens carrying a subject identifier and a
//! token kind. Verification tries the current signing secret first and then
//! falls back through the retired secrets in their configured order, so the
//! signing key can be rotated without invalidating tokens already handed out.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};

use crate::core::config::AuthConfig;

/// Algorithm used for every token this codec issues or accepts
pub const TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

/// Token codec errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Signing configuration error: {0}")]
    Configuration(String),

    #[error("Token subject identifier is empty")]
    EmptySubject,

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Unknown token kind: {0}")]
    UnknownTokenKind(String),

    #[error("Token encoding failed: {0}")]
    Encoding(String),
}

impl TokenError {
    /// Short stable label for logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::Configuration(_) => "configuration",
            TokenError::EmptySubject => "empty_subject",
            TokenError::MalformedToken(_) => "malformed_token",
            TokenError::InvalidSignature => "invalid_signature",
            TokenError::UnknownTokenKind(_) => "unknown_token_kind",
            TokenError::Encoding(_) => "encoding",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            _ => TokenError::MalformedToken(err.to_string()),
        }
    }
}

// ============================================================================
// Claims
// ============================================================================

/// Kind of credential a token stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenKind {
    /// Interactive login session; the subject is a session identifier
    Session,
    /// Long-lived API credential; the subject is a credential identifier
    Api,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Session => "SESSION",
            TokenKind::Api => "API",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SESSION" => Ok(TokenKind::Session),
            "API" => Ok(TokenKind::Api),
            _ => Err(TokenError::UnknownTokenKind(s.to_string())),
        }
    }
}

/// Claims carried by a signed token
///
/// Fields are private: a `TokenClaims` value always has a non-empty subject
/// and a defined kind, whether it was built locally or decoded from a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    subject_id: String,
    kind: TokenKind,
}

impl TokenClaims {
    pub fn new(subject_id: impl Into<String>, kind: TokenKind) -> Result<Self, TokenError> {
        let subject_id = subject_id.into();
        if subject_id.is_empty() {
            return Err(TokenError::EmptySubject);
        }
        Ok(Self { subject_id, kind })
    }

    /// Claims for a session token
    pub fn session(session_id: impl Into<String>) -> Result<Self, TokenError> {
        Self::new(session_id, TokenKind::Session)
    }

    /// Claims for an API token
    pub fn api(credential_id: impl Into<String>) -> Result<Self, TokenError> {
        Self::new(credential_id, TokenKind::Api)
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }
}

/// Payload as it appears inside the signed token
///
/// `token_type` is decoded loosely so that a signed token with a missing or
/// non-string kind is reported as an unknown kind rather than a malformed token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireClaims {
    jti: String,
    #[serde(default)]
    token_type: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<i64>,
}

impl WireClaims {
    fn issue(claims: &TokenClaims) -> Self {
        Self {
            jti: claims.subject_id.clone(),
            token_type: Some(serde_json::Value::from(claims.kind.as_str())),
            iat: Some(Utc::now().timestamp()),
        }
    }

    fn into_claims(self) -> Result<TokenClaims, TokenError> {
        if self.jti.is_empty() {
            return Err(TokenError::MalformedToken(
                "missing subject identifier".to_string(),
            ));
        }
        let kind = match self.token_type {
            Some(serde_json::Value::String(kind)) => kind.parse::<TokenKind>()?,
            Some(other) => return Err(TokenError::UnknownTokenKind(other.to_string())),
            None => return Err(TokenError::UnknownTokenKind(String::new())),
        };
        Ok(TokenClaims {
            subject_id: self.jti,
            kind,
        })
    }
}

// ============================================================================
// Secrets
// ============================================================================

/// Current signing secret plus the retired secrets still accepted for verification
#[derive(Clone, PartialEq, Eq)]
pub struct SigningSecrets {
    current: String,
    past: Vec<String>,
}

impl SigningSecrets {
    /// Build a secret set
    ///
    /// Blank past entries and copies of the current secret are dropped; the
    /// remaining past secrets keep their order.
    pub fn new<I, S>(current: impl Into<String>, past: I) -> Result<Self, TokenError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let current = current.into();
        if current.trim().is_empty() {
            return Err(TokenError::Configuration(
                "no current signing secret configured".to_string(),
            ));
        }

        let mut kept = Vec::new();
        for secret in past.into_iter().map(Into::into) {
            if secret.trim().is_empty() {
                continue;
            }
            if secret == current {
                tracing::warn!("Dropping past signing secret identical to the current secret");
                continue;
            }
            kept.push(secret);
        }

        Ok(Self {
            current,
            past: kept,
        })
    }

    /// Secret set with no retired secrets
    pub fn single(current: impl Into<String>) -> Result<Self, TokenError> {
        Self::new(current, Vec::<String>::new())
    }

    /// Make `next` the current secret and demote the old one to the front of
    /// the past list
    pub fn rotate(&self, next: impl Into<String>) -> Result<Self, TokenError> {
        let past = std::iter::once(self.current.clone()).chain(self.past.iter().cloned());
        Self::new(next, past.collect::<Vec<_>>())
    }

    /// Stop accepting a retired secret
    pub fn retire(&self, secret: &str) -> Self {
        Self {
            current: self.current.clone(),
            past: self.past.iter().filter(|s| *s != secret).cloned().collect(),
        }
    }

    pub fn past_len(&self) -> usize {
        self.past.len()
    }
}

impl fmt::Debug for SigningSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningSecrets")
            .field("current", &"<redacted>")
            .field("past", &format_args!("<{} redacted>", self.past.len()))
            .finish()
    }
}

/// Keys derived from one `SigningSecrets` snapshot
struct KeyRing {
    secrets: SigningSecrets,
    encoding_key: EncodingKey,
    /// Current secret first, then past secrets in configured order
    decoding_keys: Vec<DecodingKey>,
}

impl KeyRing {
    fn new(secrets: SigningSecrets) -> Self {
        let encoding_key = EncodingKey::from_secret(secrets.current.as_bytes());
        let decoding_keys = std::iter::once(&secrets.current)
            .chain(secrets.past.iter())
            .map(|secret| DecodingKey::from_secret(secret.as_bytes()))
            .collect();

        Self {
            secrets,
            encoding_key,
            decoding_keys,
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Token codec with rotation support
///
/// The key ring is an immutable snapshot. `replace_secrets` swaps in a whole
/// new snapshot; operations already running keep the one they loaded.
pub struct TokenCodec {
    keys: ArcSwap<KeyRing>,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(secrets: SigningSecrets) -> Self {
        let mut validation = Validation::new(TOKEN_ALGORITHM);
        // Tokens carry no expiry; the session and credential stores decide liveness.
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;

        Self {
            keys: ArcSwap::from_pointee(KeyRing::new(secrets)),
            validation,
        }
    }

    /// Build the codec from auth configuration
    pub fn from_config(config: &AuthConfig) -> Result<Self, TokenError> {
        let current = config.secret.as_deref().ok_or_else(|| {
            TokenError::Configuration("KL_AUTH_SECRET is not set".to_string())
        })?;
        let secrets = SigningSecrets::new(current, config.past_secrets.iter().cloned())?;
        Ok(Self::new(secrets))
    }

    /// Sign claims with the current secret
    pub fn sign(&self, claims: &TokenClaims) -> Result<String, TokenError> {
        let keys = self.keys.load();
        encode(
            &Header::new(TOKEN_ALGORITHM),
            &WireClaims::issue(claims),
            &keys.encoding_key,
        )
        .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Verify a token and return its claims
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        if token.is_empty() {
            return Err(TokenError::MalformedToken("empty token".to_string()));
        }

        let keys = self.keys.load();
        for (slot, key) in keys.decoding_keys.iter().enumerate() {
            match decode::<WireClaims>(token, key, &self.validation) {
                Ok(data) => {
                    if slot > 0 {
                        tracing::debug!("Token verified with past signing secret #{}", slot);
                    }
                    return data.claims.into_claims();
                }
                Err(err) if matches!(err.kind(), ErrorKind::InvalidSignature) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(TokenError::InvalidSignature)
    }

    /// Atomically replace the secret snapshot
    pub fn replace_secrets(&self, secrets: SigningSecrets) {
        tracing::info!(
            "Signing secrets replaced ({} past secret(s) accepted)",
            secrets.past_len()
        );
        self.keys.store(Arc::new(KeyRing::new(secrets)));
    }

    /// Copy of the active secret snapshot
    pub fn secrets(&self) -> SigningSecrets {
        self.keys.load().secrets.clone()
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &TOKEN_ALGORITHM)
            .field("secrets", &self.keys.load().secrets)
            .finish()
    }
}
