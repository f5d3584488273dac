//! Request authentication
//!
//! Turns the credentials on an incoming request into an
//! [`AuthenticatedIdentity`]:
//!
//! 1. Read `Authorization: Bearer <token>` (or, when configured and no header
//!    is present, a session cookie)
//! 2. Verify the token with the [`TokenCodec`]
//! 3. Resolve the subject through the session or credential resolver
//! 4. Attach the identity to the request extensions
//!
//! Every failure is answered with the same 401; the specific reason only goes
//! to the logs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;

use super::resolver::{CallerId, IdentityResolver, ResolveError};
use super::token::{TokenClaims, TokenCodec, TokenError, TokenKind};
use crate::core::api::ApiError;
use crate::core::config::{AuthConfig, DEFAULT_RESOLVE_TIMEOUT_MS};

/// Authorization scheme accepted in the header, including the separator
const BEARER_PREFIX: &str = "Bearer ";

// ============================================================================
// Identity
// ============================================================================

/// Caller identity attached to an authenticated request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedIdentity {
    caller_id: CallerId,
    subject_id: String,
    kind: TokenKind,
}

impl AuthenticatedIdentity {
    pub fn caller_id(&self) -> &CallerId {
        &self.caller_id
    }

    /// Session or credential identifier carried by the token
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }
}

/// Reads the identity placed on the request by [`require_auth`]
impl<S> FromRequestParts<S> for AuthenticatedIdentity
where
    S: Send + Sync,
{
    type Rejection = AuthFailure;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedIdentity>()
            .cloned()
            .ok_or(AuthFailure::MissingCredentials)
    }
}

// ============================================================================
// Failures
// ============================================================================

/// Point in the authentication flow a request had reached
///
/// Stages are ordered along the flow. Failures are only ever reported from
/// the first three; `IdentityResolved` and `Authenticated` have no failure
/// exit and only show up in success logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthStage {
    Unauthenticated,
    HeaderParsed,
    TokenVerified,
    IdentityResolved,
    Authenticated,
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthStage::Unauthenticated => "unauthenticated",
            AuthStage::HeaderParsed => "header_parsed",
            AuthStage::TokenVerified => "token_verified",
            AuthStage::IdentityResolved => "identity_resolved",
            AuthStage::Authenticated => "authenticated",
        };
        f.write_str(name)
    }
}

/// Reason a request was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("No credentials supplied")]
    MissingCredentials,

    #[error("Malformed Authorization header")]
    MalformedHeader,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Token kind {0} is not accepted here")]
    InvalidTokenKind(TokenKind),

    #[error("Identity not found")]
    IdentityNotFound,

    #[error("Identity resolution failed: {0}")]
    ResolverUnavailable(String),

    #[error("Identity resolution timed out")]
    ResolutionTimedOut,
}

impl From<ResolveError> for AuthFailure {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound => AuthFailure::IdentityNotFound,
            ResolveError::Unavailable(message) => AuthFailure::ResolverUnavailable(message),
        }
    }
}

impl AuthFailure {
    /// Short stable label for logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            AuthFailure::MissingCredentials => "missing_credentials",
            AuthFailure::MalformedHeader => "malformed_header",
            AuthFailure::Token(err) => err.reason(),
            AuthFailure::InvalidTokenKind(_) => "invalid_token_kind",
            AuthFailure::IdentityNotFound => "identity_not_found",
            AuthFailure::ResolverUnavailable(_) => "resolver_unavailable",
            AuthFailure::ResolutionTimedOut => "resolution_timed_out",
        }
    }

    /// Last state reached before the rejection
    pub fn stage(&self) -> AuthStage {
        match self {
            AuthFailure::MissingCredentials | AuthFailure::MalformedHeader => {
                AuthStage::Unauthenticated
            }
            AuthFailure::Token(_) => AuthStage::HeaderParsed,
            AuthFailure::InvalidTokenKind(_)
            | AuthFailure::IdentityNotFound
            | AuthFailure::ResolverUnavailable(_)
            | AuthFailure::ResolutionTimedOut => AuthStage::TokenVerified,
        }
    }
}

/// Every failure looks the same to the client
impl IntoResponse for AuthFailure {
    fn into_response(self) -> Response {
        let body = ApiError::new("Unauthorized", "UNAUTHORIZED");
        let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        response
    }
}

// ============================================================================
// Header Parsing
// ============================================================================

/// Extract the token from an `Authorization` header value
///
/// Only `Bearer <token>` is accepted: case-sensitive scheme, one space, and a
/// non-empty token without whitespace.
pub fn parse_bearer(value: &str) -> Result<&str, AuthFailure> {
    let token = value
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthFailure::MalformedHeader)?;

    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(AuthFailure::MalformedHeader);
    }

    Ok(token)
}

// ============================================================================
// Authenticator
// ============================================================================

/// Authenticates requests against the token codec and identity resolvers
#[derive(Clone)]
pub struct Authenticator {
    codec: Arc<TokenCodec>,
    sessions: Arc<dyn IdentityResolver>,
    credentials: Arc<dyn IdentityResolver>,
    session_cookie: Option<String>,
    resolve_timeout: Duration,
}

impl Authenticator {
    /// Create an authenticator
    ///
    /// `sessions` resolves session tokens, `credentials` resolves API tokens.
    pub fn new(
        codec: Arc<TokenCodec>,
        sessions: Arc<dyn IdentityResolver>,
        credentials: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            codec,
            sessions,
            credentials,
            session_cookie: None,
            resolve_timeout: Duration::from_millis(DEFAULT_RESOLVE_TIMEOUT_MS),
        }
    }

    /// Apply cookie and timeout settings from configuration
    pub fn configure(self, config: &AuthConfig) -> Self {
        let auth = self.with_resolve_timeout(config.resolve_timeout);
        match &config.session_cookie_name {
            Some(name) => auth.with_session_cookie(name.clone()),
            None => auth,
        }
    }

    /// Accept session tokens from this cookie when no header is sent
    pub fn with_session_cookie(mut self, name: impl Into<String>) -> Self {
        self.session_cookie = Some(name.into());
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Authenticate a raw `Authorization` header value
    pub async fn authenticate(
        &self,
        header: Option<&str>,
    ) -> Result<AuthenticatedIdentity, AuthFailure> {
        let header = header.ok_or(AuthFailure::MissingCredentials)?;
        let token = parse_bearer(header)?;
        let claims = self.codec.verify(token)?;
        self.resolve(claims).await
    }

    /// Authenticate from request headers, falling back to the session cookie
    /// only when no `Authorization` header is present
    pub async fn authenticate_headers(
        &self,
        headers: &HeaderMap,
    ) -> Result<AuthenticatedIdentity, AuthFailure> {
        if let Some(value) = headers.get(header::AUTHORIZATION) {
            let value = value.to_str().map_err(|_| AuthFailure::MalformedHeader)?;
            return self.authenticate(Some(value)).await;
        }

        match self.cookie_token(headers) {
            Some(token) => {
                let claims = self.codec.verify(&token)?;
                if claims.kind() != TokenKind::Session {
                    return Err(AuthFailure::InvalidTokenKind(claims.kind()));
                }
                self.resolve(claims).await
            }
            None => Err(AuthFailure::MissingCredentials),
        }
    }

    fn cookie_token(&self, headers: &HeaderMap) -> Option<String> {
        let name = self.session_cookie.as_deref()?;
        CookieJar::from_headers(headers)
            .get(name)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty())
    }

    async fn resolve(&self, claims: TokenClaims) -> Result<AuthenticatedIdentity, AuthFailure> {
        let resolver = match claims.kind() {
            TokenKind::Session => &self.sessions,
            TokenKind::Api => &self.credentials,
        };

        let caller_id = tokio::time::timeout(
            self.resolve_timeout,
            resolver.resolve(claims.subject_id(), claims.kind()),
        )
        .await
        .map_err(|_| AuthFailure::ResolutionTimedOut)??;

        tracing::debug!(
            stage = %AuthStage::IdentityResolved,
            "Resolved {} token subject to caller {}",
            claims.kind(),
            caller_id
        );

        Ok(AuthenticatedIdentity {
            caller_id,
            subject_id: claims.subject_id().to_string(),
            kind: claims.kind(),
        })
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("codec", &self.codec)
            .field("session_cookie", &self.session_cookie)
            .field("resolve_timeout", &self.resolve_timeout)
            .finish_non_exhaustive()
    }
}

/// Middleware guarding protected routes
///
/// On success the [`AuthenticatedIdentity`] is inserted into the request
/// extensions for the rest of the request.
pub async fn require_auth(
    State(auth): State<Authenticator>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    match auth.authenticate_headers(&parts.headers).await {
        Ok(identity) => {
            tracing::debug!(
                stage = %AuthStage::Authenticated,
                "Authenticated caller {} via {} token",
                identity.caller_id(),
                identity.kind()
            );
            parts.extensions.insert(identity);
            next.run(Request::from_parts(parts, body)).await
        }
        Err(failure) => {
            tracing::warn!(
                reason = failure.reason(),
                stage = %failure.stage(),
                "Request rejected: {}",
                failure
            );
            failure.into_response()
        }
    }
}
