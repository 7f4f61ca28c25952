use super::{ApiJson, AppState};
use crate::{
    error::{AppError, Result},
    models::ApiResponse,
    utils::{serialize_ton, ton_to_nano},
};
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, HeaderName},
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const ADMIN_KEY_HEADER: &str = "x-admin-key";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustBalanceRequest {
    pub user_id: i64,
    /// Signed TON amount.
    pub amount: Decimal,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustBalanceResponse {
    pub user_id: i64,
    #[serde(serialize_with = "serialize_ton")]
    pub old_balance: i64,
    #[serde(serialize_with = "serialize_ton")]
    pub new_balance: i64,
    #[serde(serialize_with = "serialize_ton")]
    pub adjustment_amount: i64,
    pub reason: String,
}

fn provided_admin_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(HeaderName::from_static(ADMIN_KEY_HEADER))
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn configured_admin_key(state: &AppState) -> Option<&str> {
    state
        .config
        .admin_manual_key
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn check_admin_key(headers: &HeaderMap, expected: &str) -> Result<()> {
    let provided = provided_admin_key(headers).ok_or_else(|| {
        AppError::AuthError(format!(
            "Missing admin key. Send header '{}' to access this endpoint.",
            ADMIN_KEY_HEADER
        ))
    })?;

    if provided != expected {
        return Err(AppError::AuthError("Invalid admin key".to_string()));
    }
    Ok(())
}

fn require_admin_key(headers: &HeaderMap, state: &AppState) -> Result<()> {
    let expected = configured_admin_key(state).ok_or_else(|| {
        AppError::BadRequest(
            "ADMIN_MANUAL_KEY is not configured on backend. Manual adjustment is disabled."
                .to_string(),
        )
    })?;
    check_admin_key(headers, expected)
}

/// POST /api/admin/adjust-balance
pub async fn adjust_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<AdjustBalanceRequest>,
) -> Result<Json<ApiResponse<AdjustBalanceResponse>>> {
    require_admin_key(&headers, &state)?;

    let delta = ton_to_nano(req.amount)?;
    let reason = req
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("manual adjustment")
        .to_string();

    let (old_balance, new_balance) = state.balances.adjust(req.user_id, delta).await?;
    tracing::warn!(
        "Admin adjusted balance of user {} by {} nanoTON: {}",
        req.user_id,
        delta,
        reason
    );

    Ok(Json(ApiResponse::success(AdjustBalanceResponse {
        user_id: req.user_id,
        old_balance,
        new_balance,
        adjustment_amount: delta,
        reason,
    })))
}

/// GET /withdrawal-logs
///
/// Open when no admin key is configured.
pub async fn withdrawal_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    if let Some(expected) = configured_admin_key(&state) {
        check_admin_key(&headers, expected)?;
    }

    let text = state.audit_log.read_all().await?;
    Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], text))
}
