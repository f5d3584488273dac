//! Token authentication for Kitledger
//!
//! This module provides:
//! - Signed session and API tokens with signing-secret rotation
//! - The identity resolver seam used to map token subjects to callers
//! - Request authentication middleware for protected routes

pub mod authenticator;
pub mod resolver;
pub mod token;

pub use authenticator::{
    AuthFailure, AuthStage, AuthenticatedIdentity, Authenticator, parse_bearer, require_auth,
};
pub use resolver::{CallerId, IdentityResolver, ResolveError, StaticResolver};
pub use token::{SigningSecrets, TokenClaims, TokenCodec, TokenError, TokenKind};
