use axum::{extract::State, http::HeaderMap, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::{ApiResponse, DepositIntent, DepositStatus},
    utils::{serialize_ton, ton_to_nano},
};

use super::{require_user, ApiJson, AppState};

// ==================== REQUEST/RESPONSE TYPES ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDepositRequest {
    pub tx_hash: String,
    pub amount: Decimal,
    pub from_address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDepositResponse {
    pub tx_hash: String,
    #[serde(serialize_with = "serialize_ton")]
    pub amount: i64,
    pub status: DepositStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectDepositRequest {
    pub tx_hash: String,
    pub amount: Decimal,
    pub from_address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectDepositResponse {
    #[serde(serialize_with = "serialize_ton")]
    pub amount: i64,
    pub tx_hash: String,
    pub already_credited: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyDepositRequest {
    pub tx_hash: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyDepositResponse {
    pub transaction: DepositIntent,
    pub status: DepositStatus,
}

fn claimed_nano(amount: Decimal) -> Result<i64> {
    if amount.is_sign_negative() {
        return Err(AppError::BadRequest("Amount must be positive".to_string()));
    }
    ton_to_nano(amount)
}

// ==================== HANDLERS ====================

/// POST /api/deposit/register
pub async fn register_deposit(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<RegisterDepositRequest>,
) -> Result<Json<ApiResponse<RegisterDepositResponse>>> {
    let user = require_user(&headers, None, &state).await?;
    let amount = claimed_nano(req.amount)?;

    let intent = state
        .deposits
        .register(user.id, req.tx_hash.trim(), amount, req.from_address.trim())
        .await?;

    Ok(Json(ApiResponse::success(RegisterDepositResponse {
        tx_hash: intent.tx_hash,
        amount: intent.claimed_nano,
        status: intent.status,
    })))
}

/// POST /api/deposit/direct
pub async fn direct_deposit(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<DirectDepositRequest>,
) -> Result<Json<ApiResponse<DirectDepositResponse>>> {
    let user = require_user(&headers, None, &state).await?;
    let amount = claimed_nano(req.amount)?;
    let from_address = req
        .from_address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty());

    let result = state
        .deposits
        .process_direct(user.id, amount, req.tx_hash.trim(), from_address)
        .await?;

    Ok(Json(ApiResponse::success(DirectDepositResponse {
        amount: result.credited_nano,
        tx_hash: result.tx_hash,
        already_credited: result.already_credited,
    })))
}

/// POST /api/deposit/verify
pub async fn verify_deposit(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VerifyDepositRequest>,
) -> Result<Json<ApiResponse<VerifyDepositResponse>>> {
    let tx_hash = req.tx_hash.trim();
    if tx_hash.is_empty() {
        return Err(AppError::BadRequest("txHash is required".to_string()));
    }

    let intent = state.deposits.verify_intent(tx_hash).await?;
    Ok(Json(ApiResponse::success(VerifyDepositResponse {
        status: intent.status,
        transaction: intent,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::testing::TestApp, constants::GAME_WALLET_ADDRESS,
        services::deposit_service::testing::StubVerifier,
    };
    use axum::response::IntoResponse;
    use std::{str::FromStr, sync::Arc};

    fn ton(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn register_with_bad_address_is_400_and_changes_nothing() {
        let app = TestApp::new();
        let (user, headers) = app.login("alice", 0).await;

        let err = register_deposit(
            State(app.state.clone()),
            headers,
            ApiJson(RegisterDepositRequest {
                tx_hash: "abc123".to_string(),
                amount: ton("0.05"),
                from_address: "not-an-address".to_string(),
            }),
        )
        .await
        .unwrap_err();

        assert_eq!(err.into_response().status(), 400);
        assert_eq!(app.store.balance_of(user.id).await, 0);
        let verify = verify_deposit(
            State(app.state.clone()),
            ApiJson(VerifyDepositRequest {
                tx_hash: "abc123".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(verify.into_response().status(), 404);
    }

    #[tokio::test]
    async fn register_then_direct_credits_on_chain_amount_once() {
        let app = TestApp::with_verifier(Arc::new(StubVerifier::on_chain(80_000_000)));
        let (user, headers) = app.login("alice", 0).await;

        let Json(registered) = register_deposit(
            State(app.state.clone()),
            headers.clone(),
            ApiJson(RegisterDepositRequest {
                tx_hash: "abc123".to_string(),
                amount: ton("0.05"),
                from_address: GAME_WALLET_ADDRESS.to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(registered.data.status, DepositStatus::Pending);

        for attempt in 0..2 {
            let Json(direct) = direct_deposit(
                State(app.state.clone()),
                headers.clone(),
                ApiJson(DirectDepositRequest {
                    tx_hash: "abc123".to_string(),
                    amount: ton("0.05"),
                    from_address: None,
                }),
            )
            .await
            .unwrap();
            assert_eq!(direct.data.amount, 80_000_000);
            assert_eq!(direct.data.already_credited, attempt == 1);
        }
        assert_eq!(app.store.balance_of(user.id).await, 80_000_000);

        let Json(verified) = verify_deposit(
            State(app.state.clone()),
            ApiJson(VerifyDepositRequest {
                tx_hash: "abc123".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(verified.data.status, DepositStatus::Confirmed);

        let json = serde_json::to_value(&verified).unwrap();
        assert_eq!(json["transaction"]["creditedAmount"], serde_json::json!(0.08));
    }

    #[tokio::test]
    async fn direct_without_session_is_401() {
        let app = TestApp::new();
        let err = direct_deposit(
            State(app.state.clone()),
            HeaderMap::new(),
            ApiJson(DirectDepositRequest {
                tx_hash: "abc123".to_string(),
                amount: ton("0.05"),
                from_address: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), 401);
    }

    #[tokio::test]
    async fn unverifiable_direct_deposit_is_409() {
        let app = TestApp::with_verifier(Arc::new(StubVerifier::unverified()));
        let (user, headers) = app.login("alice", 0).await;
        let err = direct_deposit(
            State(app.state.clone()),
            headers,
            ApiJson(DirectDepositRequest {
                tx_hash: "abc123".to_string(),
                amount: ton("0.05"),
                from_address: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), 409);
        assert_eq!(app.store.balance_of(user.id).await, 0);
    }
}
