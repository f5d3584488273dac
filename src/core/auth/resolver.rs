//! Identity resolution seam
//!
//! The authenticator turns a verified token into a caller through an
//! [`IdentityResolver`]. Session and credential stores live outside this crate
//! and plug in here; [`StaticResolver`] is a fixed lookup table for wiring and
//! tests.

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::token::TokenKind;

/// Identifier of the caller a token resolves to (usually a user id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerId(String);

impl CallerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity resolution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("No identity found for subject")]
    NotFound,

    #[error("Identity store unavailable: {0}")]
    Unavailable(String),
}

/// Resolves a token subject to a caller
///
/// Called with the subject identifier and the kind of token it came from.
/// Implementations return [`ResolveError::NotFound`] for unknown, revoked, or
/// expired subjects.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, subject_id: &str, kind: TokenKind) -> Result<CallerId, ResolveError>;
}

/// Resolver backed by an in-process table
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: DashMap<String, CallerId>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a subject to a caller, replacing any previous mapping
    pub fn insert(&self, subject_id: impl Into<String>, caller: CallerId) {
        self.entries.insert(subject_id.into(), caller);
    }

    /// Remove a subject; later lookups report `NotFound`
    pub fn revoke(&self, subject_id: &str) -> bool {
        self.entries.remove(subject_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, CallerId)> for StaticResolver {
    fn from_iter<T: IntoIterator<Item = (K, CallerId)>>(iter: T) -> Self {
        let resolver = Self::new();
        for (subject_id, caller) in iter {
            resolver.insert(subject_id, caller);
        }
        resolver
    }
}

#[async_trait]
impl IdentityResolver for StaticResolver {
    async fn resolve(&self, subject_id: &str, _kind: TokenKind) -> Result<CallerId, ResolveError> {
        self.entries
            .get(subject_id)
            .map(|entry| entry.value().clone())
            .ok_or(ResolveError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver_lookup() {
        let resolver: StaticResolver = [("sess-1", CallerId::new("user-1"))].into_iter().collect();

        let caller = resolver.resolve("sess-1", TokenKind::Session).await.unwrap();
        assert_eq!(caller, CallerId::new("user-1"));

        let missing = resolver.resolve("sess-2", TokenKind::Session).await;
        assert_eq!(missing, Err(ResolveError::NotFound));
    }

    #[tokio::test]
    async fn test_static_resolver_revoke() {
        let resolver = StaticResolver::new();
        resolver.insert("cred-1", CallerId::new("user-7"));
        assert_eq!(resolver.len(), 1);

        assert!(resolver.revoke("cred-1"));
        assert!(!resolver.revoke("cred-1"));
        assert!(resolver.is_empty());
        assert_eq!(
            resolver.resolve("cred-1", TokenKind::Api).await,
            Err(ResolveError::NotFound)
        );
    }

    #[test]
    fn test_caller_id_serializes_as_string() {
        let json = serde_json::to_string(&CallerId::new("user-1")).unwrap();
        assert_eq!(json, r#""user-1""#);
    }
}
