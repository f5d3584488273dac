use std::net::SocketAddr;
use std::sync::Arc;

use kitledger::core::api::app_router;
use kitledger::core::auth::{Authenticator, StaticResolver, TokenCodec};
use kitledger::core::config::Config;

#[tokio::main]
async fn main() {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load application config from environment variables
    let config = Config::from_env();

    // Log config status (without revealing secrets)
    tracing::info!(
        "Config loaded: secret={}, past_secrets={}, session_cookie={}",
        config.has_secret(),
        config.auth.past_secrets.len(),
        config.auth.session_cookie_name.is_some()
    );

    // Without a signing secret nobody can be authenticated; refuse to start
    let codec = match TokenCodec::from_config(&config.auth) {
        Ok(codec) => Arc::new(codec),
        Err(e) => {
            tracing::error!("Cannot start: {}", e);
            std::process::exit(1);
        }
    };

    // Session and credential stores are not wired in yet
    tracing::warn!("No session or credential store configured; every token will be rejected");
    let auth = Authenticator::new(
        codec,
        Arc::new(StaticResolver::new()),
        Arc::new(StaticResolver::new()),
    )
    .configure(&config.auth);

    let app = app_router(auth, &config.server.cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
