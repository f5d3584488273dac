//! HTTP API
//!
//! - GET /health     - Liveness probe (public)
//! - GET /api/v1     - API welcome message
//! - GET /api/v1/me  - Identity of the authenticated caller
//!
//! Everything under /api/v1 passes through [`require_auth`] and the CORS layer.

use axum::{
    Json, Router,
    http::{HeaderName, HeaderValue, Method},
    middleware,
    routing::get,
};
use serde::Serialize;
use tower_http::cors::{AllowHeaders, AllowOrigin, Any, CorsLayer};

use crate::core::auth::{AuthenticatedIdentity, Authenticator, require_auth};
use crate::core::config::CorsConfig;

/// Path prefix of the versioned API
pub const API_V1_PREFIX: &str = "/api/v1";

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Create the application router
pub fn app_router(auth: Authenticator, cors: &CorsConfig) -> Router {
    let api_v1 = Router::new()
        .route("/", get(index_handler))
        .route("/me", get(me_handler))
        .layer(middleware::from_fn_with_state(auth, require_auth))
        .layer(cors_layer(cors));

    Router::new()
        .route("/health", get(health_handler))
        .nest(API_V1_PREFIX, api_v1)
}

/// Build the CORS layer for the API router
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let headers: Vec<HeaderName> = config
        .allowed_headers
        .iter()
        .filter_map(|name| match name.parse::<HeaderName>() {
            Ok(header) => Some(header),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS header name: {}", name);
                None
            }
        })
        .collect();

    let origin = match &config.allowed_origins {
        None => AllowOrigin::from(Any),
        Some(origins) => AllowOrigin::list(origins.iter().filter_map(|origin| {
            match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                    None
                }
            }
        })),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::list(headers))
        .max_age(config.max_age)
}

/// GET /health
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /api/v1
async fn index_handler() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Welcome to the Kitledger API!".to_string(),
    })
}

/// GET /api/v1/me
async fn me_handler(identity: AuthenticatedIdentity) -> Json<AuthenticatedIdentity> {
    Json(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::{CallerId, SigningSecrets, StaticResolver, TokenClaims, TokenCodec};
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    fn create_test_app() -> (Router, Arc<TokenCodec>) {
        let codec = Arc::new(TokenCodec::new(SigningSecrets::single("k1").unwrap()));
        let sessions: StaticResolver = [("sess-1", CallerId::new("user-42"))].into_iter().collect();
        let credentials = StaticResolver::new();
        let auth = Authenticator::new(codec.clone(), Arc::new(sessions), Arc::new(credentials));

        (app_router(auth, &CorsConfig::default()), codec)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_api_requires_auth() {
        let (app, _) = create_test_app();

        for uri in ["/api/v1", "/api/v1/me"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_me_returns_identity() {
        let (app, codec) = create_test_app();
        let token = codec.sign(&TokenClaims::session("sess-1").unwrap()).unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/me")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["caller_id"], "user-42");
        assert_eq!(json["subject_id"], "sess-1");
        assert_eq!(json["kind"], "SESSION");
    }

    #[tokio::test]
    async fn test_index_with_token() {
        let (app, codec) = create_test_app();
        let token = codec.sign(&TokenClaims::session("sess-1").unwrap()).unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await["message"],
            "Welcome to the Kitledger API!"
        );
    }

    #[tokio::test]
    async fn test_unknown_api_token_is_unauthorized() {
        let (app, codec) = create_test_app();
        let token = codec.sign(&TokenClaims::api("cred-unknown").unwrap()).unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/me")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Unauthorized");
    }

    #[tokio::test]
    async fn test_cors_preflight_skips_auth() {
        let (app, _) = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/v1/me")
                    .header(header::ORIGIN, "https://app.example")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[test]
    fn test_api_error_serialization() {
        let error = ApiError::new("Unauthorized", "UNAUTHORIZED");
        let json = serde_json::to_string(&error).unwrap();

        assert_eq!(json, r#"{"error":"Unauthorized","code":"UNAUTHORIZED"}"#);
    }
}
