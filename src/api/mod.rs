// src/api/mod.rs

pub mod admin;
pub mod auth;
pub mod deposit;
pub mod health;
pub mod profile;
pub mod ton;
pub mod wallet;

use axum::{
    extract::FromRequest,
    http::{header::AUTHORIZATION, HeaderMap},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    config::Config,
    db::LedgerStore,
    error::{AppError, Result},
    models::User,
    services::{
        BalanceMutator, DepositRegistrar, LedgerVerifier, Session, SessionStore, SystemClock,
        WithdrawalAuditLog, WithdrawalService,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub verifier: Arc<dyn LedgerVerifier>,
    pub deposits: Arc<DepositRegistrar>,
    pub withdrawals: Arc<WithdrawalService>,
    pub balances: BalanceMutator,
    pub audit_log: Arc<WithdrawalAuditLog>,
    pub config: Config,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn LedgerStore>,
        sessions: Arc<dyn SessionStore>,
        verifier: Arc<dyn LedgerVerifier>,
        audit_log: Arc<WithdrawalAuditLog>,
    ) -> Self {
        let deposits = Arc::new(DepositRegistrar::new(
            store.clone(),
            verifier.clone(),
            Arc::new(SystemClock),
            config.deposit_intent_ttl_hours,
        ));
        Self {
            withdrawals: Arc::new(WithdrawalService::new(store.clone())),
            balances: BalanceMutator::new(store.clone()),
            deposits,
            store,
            sessions,
            verifier,
            audit_log,
            config,
        }
    }
}

/// JSON body extractor; malformed or incomplete bodies become `400 BAD_REQUEST`
/// in the usual error envelope.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// `?token=` fallback accepted on GET endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Result<Option<String>> {
    let Some(auth_header) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let auth_str = auth_header
        .to_str()
        .map_err(|_| AppError::AuthError("Invalid Authorization header".to_string()))?;
    let token = auth_str
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::AuthError("Invalid Authorization scheme".to_string()))?;
    Ok(Some(token.to_string()))
}

/// Bearer header first, then the query token.
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Result<String> {
    if let Some(token) = bearer_token(headers)? {
        return Ok(token);
    }
    query_token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::AuthError("Missing Authorization header".to_string()))
}

pub async fn require_session(
    headers: &HeaderMap,
    query_token: Option<&str>,
    state: &AppState,
) -> Result<(String, Session)> {
    let token = extract_token(headers, query_token)?;
    let session = state
        .sessions
        .get(&token)
        .await?
        .ok_or_else(|| AppError::AuthError("Invalid or expired token".to_string()))?;
    Ok((token, session))
}

/// Resolves the caller to a stored user and touches `last_active`.
pub async fn require_user(
    headers: &HeaderMap,
    query_token: Option<&str>,
    state: &AppState,
) -> Result<User> {
    let (_, session) = require_session(headers, query_token, state).await?;
    let user = state
        .store
        .get_user(session.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    state.store.update_last_active(user.id).await?;
    Ok(user)
}
