use axum::http::HeaderValue;
use axum::{
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod constants;
mod crypto;
mod db;
mod error;
mod models;
mod services;
mod utils;

use config::Config;
use constants::API_VERSION;
use db::{Database, LedgerStore, MemoryStore};
use services::{MemorySessionStore, RedisSessionStore, SessionStore, WithdrawalAuditLog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nebulachest_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    config.validate()?;

    tracing::info!("Starting NebulaChest Backend Server");
    tracing::info!("Environment: {}", config.environment);
    tracing::info!("API Version: {}", API_VERSION);

    // Initialize store
    let store: Arc<dyn LedgerStore> = if config.database_url.is_some() {
        let db = Database::new(&config).await?;
        tracing::info!("Running database migrations...");
        db.run_migrations().await?;
        Arc::new(db)
    } else {
        Arc::new(MemoryStore::new())
    };

    // Initialize sessions
    let sessions: Arc<dyn SessionStore> = match config.redis_url.as_deref() {
        Some(url) => Arc::new(RedisSessionStore::connect(url, config.session_ttl_hours).await?),
        None => Arc::new(MemorySessionStore::new(config.session_ttl_hours)),
    };

    let verifier = services::ledger_verifier::build_verifier(&config)?;
    let audit_log = Arc::new(WithdrawalAuditLog::new(&config.withdrawal_log_path));
    audit_log.init().await?;

    let app_state = api::AppState::new(
        config.clone(),
        store.clone(),
        sessions,
        verifier.clone(),
        audit_log.clone(),
    );

    // Build router
    let app = build_router(app_state);

    // Start background services
    let background = services::start_background_services(store, verifier, audit_log, &config);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    background.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn build_router(state: api::AppState) -> Router {
    // CORS configuration
    let cors = cors_from_config(&state.config);

    Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        // Authentication
        .route("/api/auth/telegram", post(api::auth::telegram_login))
        .route("/api/validate-token", get(api::auth::validate_token))
        .route("/api/auth/logout", post(api::auth::logout))
        // Profile
        .route("/api/user", get(api::profile::get_user))
        .route(
            "/api/save-wallet-address",
            post(api::profile::save_wallet_address),
        )
        // Deposits
        .route("/api/deposit/register", post(api::deposit::register_deposit))
        .route("/api/deposit/direct", post(api::deposit::direct_deposit))
        .route("/api/deposit/verify", post(api::deposit::verify_deposit))
        .route(
            "/api/ton/check/{tx_hash}",
            get(api::ton::check_transaction),
        )
        // Withdrawals
        .route("/api/withdraw", post(api::wallet::withdraw))
        .route(
            "/api/withdrawal-history",
            get(api::wallet::withdrawal_history),
        )
        // Admin
        .route("/withdrawal-logs", get(api::admin::withdrawal_logs))
        .route(
            "/api/admin/adjust-balance",
            post(api::admin::adjust_balance),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_from_config(config: &Config) -> CorsLayer {
    let raw = config.cors_allowed_origins.trim();
    if raw.is_empty() || raw == "*" {
        return CorsLayer::very_permissive();
    }

    let allowed: Vec<HeaderValue> = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<HeaderValue>().ok())
        .collect();

    if allowed.is_empty() {
        tracing::warn!("No valid CORS origins parsed; falling back to permissive");
        return CorsLayer::very_permissive();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::TestApp;
    use serde_json::{json, Value};

    async fn serve(app: &TestApp) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(app.state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn assert_bad_request(response: reqwest::Response) {
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn malformed_bodies_get_the_error_envelope() {
        let app = TestApp::new();
        let (user, headers) = app.login("alice", 1_000_000_000).await;
        let base = serve(&app).await;
        let client = reqwest::Client::new();

        let missing_amount = client
            .post(format!("{}/api/withdraw", base))
            .headers(headers.clone())
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_bad_request(missing_amount).await;
        assert_eq!(app.store.balance_of(user.id).await, 1_000_000_000);

        let register = client
            .post(format!("{}/api/deposit/register", base))
            .headers(headers.clone())
            .json(&json!({ "txHash": "abc123", "fromAddress": "UQx" }))
            .send()
            .await
            .unwrap();
        assert_bad_request(register).await;

        let not_json = client
            .post(format!("{}/api/deposit/direct", base))
            .headers(headers)
            .header(axum::http::header::CONTENT_TYPE, "application/json")
            .body("not json")
            .send()
            .await
            .unwrap();
        assert_bad_request(not_json).await;

        let no_content_type = client
            .post(format!("{}/api/admin/adjust-balance", base))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_bad_request(no_content_type).await;
    }

    #[tokio::test]
    async fn health_is_served() {
        let app = TestApp::new();
        let base = serve(&app).await;
        let body: Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }
}
