//! Application configuration from environment variables.
//!
//! Load configuration using `Config::from_env()` after calling `dotenvy::dotenv()`.
//! All variables use the `KL_` prefix.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_AUTH_SECRET: &str = "KL_AUTH_SECRET";
pub const ENV_AUTH_PAST_SECRETS: &str = "KL_AUTH_PAST_SECRETS";
pub const ENV_SESSION_COOKIE_NAME: &str = "KL_SESSION_COOKIE_NAME";
pub const ENV_AUTH_RESOLVE_TIMEOUT_MS: &str = "KL_AUTH_RESOLVE_TIMEOUT_MS";
pub const ENV_SERVER_PORT: &str = "KL_SERVER_PORT";
pub const ENV_CORS_ALLOWED_ORIGINS: &str = "KL_CORS_ALLOWED_ORIGINS";
pub const ENV_CORS_ALLOWED_HEADERS: &str = "KL_CORS_ALLOWED_HEADERS";
pub const ENV_CORS_MAX_AGE: &str = "KL_CORS_MAX_AGE";

/// Default HTTP port
pub const DEFAULT_SERVER_PORT: u16 = 8888;

/// Default identity resolution timeout (5 seconds)
pub const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 5000;

/// Default CORS preflight cache lifetime (1 day)
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 86400;

/// Headers always allowed by CORS
pub const CORS_DEFAULT_HEADERS: [&str; 3] = ["Content-Type", "Authorization", "X-Requested-With"];

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub auth: AuthConfig,
    pub server: ServerConfig,
}

/// Token signing and request authentication settings
#[derive(Clone)]
pub struct AuthConfig {
    /// Current signing secret; required to start the server
    pub secret: Option<String>,
    /// Retired secrets still accepted for verification, in order
    pub past_secrets: Vec<String>,
    /// Cookie consulted for a session token when no Authorization header is sent
    pub session_cookie_name: Option<String>,
    /// Upper bound for a single identity lookup
    pub resolve_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: None,
            past_secrets: Vec::new(),
            session_cookie_name: None,
            resolve_timeout: Duration::from_millis(DEFAULT_RESOLVE_TIMEOUT_MS),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("past_secrets", &self.past_secrets.len())
            .field("session_cookie_name", &self.session_cookie_name)
            .field("resolve_timeout", &self.resolve_timeout)
            .finish()
    }
}

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVER_PORT,
            cors: CorsConfig::default(),
        }
    }
}

/// CORS settings for the API router
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins; `None` allows any origin
    pub allowed_origins: Option<Vec<String>>,
    /// Allowed request headers (defaults plus configured extras, deduplicated)
    pub allowed_headers: Vec<String>,
    pub max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: None,
            allowed_headers: CORS_DEFAULT_HEADERS.iter().map(|h| h.to_string()).collect(),
            max_age: Duration::from_secs(DEFAULT_CORS_MAX_AGE_SECS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` before this to load from `.env` file.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let auth = AuthConfig {
            secret: get(ENV_AUTH_SECRET),
            past_secrets: get(ENV_AUTH_PAST_SECRETS)
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            session_cookie_name: get(ENV_SESSION_COOKIE_NAME).map(|v| v.trim().to_string()),
            resolve_timeout: Duration::from_millis(parse_or_default(
                ENV_AUTH_RESOLVE_TIMEOUT_MS,
                get(ENV_AUTH_RESOLVE_TIMEOUT_MS),
                DEFAULT_RESOLVE_TIMEOUT_MS,
            )),
        };

        let mut allowed_headers: Vec<String> =
            CORS_DEFAULT_HEADERS.iter().map(|h| h.to_string()).collect();
        for header in get(ENV_CORS_ALLOWED_HEADERS)
            .map(|v| split_list(&v))
            .unwrap_or_default()
        {
            if !allowed_headers
                .iter()
                .any(|h| h.eq_ignore_ascii_case(&header))
            {
                allowed_headers.push(header);
            }
        }

        let server = ServerConfig {
            port: parse_or_default(ENV_SERVER_PORT, get(ENV_SERVER_PORT), DEFAULT_SERVER_PORT),
            cors: CorsConfig {
                allowed_origins: get(ENV_CORS_ALLOWED_ORIGINS)
                    .map(|v| split_list(&v))
                    .filter(|origins| !origins.iter().any(|o| o == "*")),
                allowed_headers,
                max_age: Duration::from_secs(parse_or_default(
                    ENV_CORS_MAX_AGE,
                    get(ENV_CORS_MAX_AGE),
                    DEFAULT_CORS_MAX_AGE_SECS,
                )),
            },
        };

        Self { auth, server }
    }

    /// Check if a signing secret is configured
    pub fn has_secret(&self) -> bool {
        self.auth.secret.is_some()
    }
}

/// Split a comma-separated value, dropping blank entries
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a numeric setting, falling back to the default when it is unparseable
fn parse_or_default<T>(key: &str, value: Option<String>, default: T) -> T
where
    T: FromStr + fmt::Display + Copy,
{
    match value {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}, using default {}", key, raw, default);
            default
        }),
    }
}
