use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    crypto::telegram::verify_init_data,
    error::{AppError, Result},
    models::{ApiResponse, User},
};

use super::{require_session, ApiJson, AppState, TokenQuery};

// ==================== REQUEST/RESPONSE TYPES ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramAuthRequest {
    #[serde(default)]
    pub init_data: String,
    pub referral_code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramAuthResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateTokenResponse {
    pub valid: bool,
    pub user: User,
    pub telegram_id: Option<i64>,
    pub telegram_username: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {}

// ==================== HANDLERS ====================

/// POST /api/auth/telegram
pub async fn telegram_login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<TelegramAuthRequest>,
) -> Result<Json<ApiResponse<TelegramAuthResponse>>> {
    if req.init_data.trim().is_empty() {
        return Err(AppError::BadRequest("initData is required".to_string()));
    }
    let bot_token = state
        .config
        .telegram_bot_token
        .as_deref()
        .ok_or_else(|| AppError::AuthError("Telegram login is not configured".to_string()))?;

    let init_data = verify_init_data(&req.init_data, bot_token, Utc::now().timestamp())?;

    let referral_code = req
        .referral_code
        .as_deref()
        .or(init_data.start_param.as_deref())
        .map(str::trim)
        .filter(|code| !code.is_empty());
    let user = state
        .store
        .upsert_telegram_user(
            init_data.user.id,
            &init_data.user.display_name(),
            referral_code,
        )
        .await?;

    let (token, session) = state
        .sessions
        .create(user.id, user.telegram_id, &user.username)
        .await?;
    tracing::info!("Telegram login for user {} ({})", user.id, user.username);

    Ok(Json(ApiResponse::success(TelegramAuthResponse {
        token,
        expires_at: session.expires_at,
        user,
    })))
}

/// GET /api/validate-token
pub async fn validate_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<ApiResponse<ValidateTokenResponse>>> {
    let (_, session) = require_session(&headers, query.token.as_deref(), &state).await?;
    let user = state
        .store
        .get_user(session.user_id)
        .await?
        .ok_or_else(|| AppError::AuthError("Invalid or expired token".to_string()))?;

    Ok(Json(ApiResponse::success(ValidateTokenResponse {
        valid: true,
        telegram_id: session.telegram_id,
        telegram_username: session.username,
        user,
    })))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<LogoutResponse>>> {
    let (token, session) = require_session(&headers, None, &state).await?;
    state.sessions.revoke(&token).await?;
    tracing::debug!("Session revoked for user {}", session.user_id);
    Ok(Json(ApiResponse::success(LogoutResponse {})))
}
