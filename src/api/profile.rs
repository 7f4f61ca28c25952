use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::{ApiResponse, User},
    utils::is_valid_ton_address,
};

use super::{require_user, ApiJson, AppState, TokenQuery};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveWalletRequest {
    pub wallet_address: String,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: User,
}

/// GET /api/user
pub async fn get_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<ApiResponse<ProfileResponse>>> {
    let user = require_user(&headers, query.token.as_deref(), &state).await?;
    Ok(Json(ApiResponse::success(ProfileResponse { user })))
}

/// POST /api/save-wallet-address
pub async fn save_wallet_address(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SaveWalletRequest>,
) -> Result<Json<ApiResponse<ProfileResponse>>> {
    let user = require_user(&headers, None, &state).await?;
    let address = req.wallet_address.trim();
    if !is_valid_ton_address(address) {
        return Err(AppError::BadRequest("Invalid TON wallet address".to_string()));
    }

    let user = state
        .store
        .save_wallet_address(user.id, address)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    tracing::info!("User {} saved wallet {}", user.id, address);

    Ok(Json(ApiResponse::success(ProfileResponse { user })))
}
