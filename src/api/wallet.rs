use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::{ApiResponse, WithdrawalStatus, WithdrawalTransaction},
    utils::{serialize_ton, ton_to_nano},
};

use super::{require_user, ApiJson, AppState, TokenQuery};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    pub amount: Decimal,
    /// Saved wallet is used when omitted.
    pub to_address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawResponse {
    #[serde(serialize_with = "serialize_ton")]
    pub withdrawal_amount: i64,
    #[serde(serialize_with = "serialize_ton")]
    pub new_balance: i64,
    /// Filled in by the monitor once the payout is sent.
    pub transaction_hash: Option<String>,
    pub transaction_id: i64,
    pub status: WithdrawalStatus,
}

#[derive(Debug, Serialize)]
pub struct WithdrawalHistoryResponse {
    pub transactions: Vec<WithdrawalTransaction>,
}

/// POST /api/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<WithdrawRequest>,
) -> Result<Json<ApiResponse<WithdrawResponse>>> {
    let user = require_user(&headers, None, &state).await?;
    if req.amount.is_sign_negative() || req.amount.is_zero() {
        return Err(AppError::BadRequest("Amount must be positive".to_string()));
    }
    let amount = ton_to_nano(req.amount)?;

    let receipt = state
        .withdrawals
        .request(user.id, amount, req.to_address.as_deref())
        .await?;

    Ok(Json(ApiResponse::success(WithdrawResponse {
        withdrawal_amount: receipt.withdrawal.amount_nano,
        new_balance: receipt.new_balance_nano,
        transaction_hash: receipt.withdrawal.tx_hash.clone(),
        transaction_id: receipt.withdrawal.id,
        status: receipt.withdrawal.status,
    })))
}

/// GET /api/withdrawal-history
pub async fn withdrawal_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<ApiResponse<WithdrawalHistoryResponse>>> {
    let user = require_user(&headers, query.token.as_deref(), &state).await?;
    let transactions = state.withdrawals.history(user.id).await?;
    Ok(Json(ApiResponse::success(WithdrawalHistoryResponse {
        transactions,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::testing::TestApp, constants::GAME_WALLET_ADDRESS};
    use axum::response::IntoResponse;
    use std::str::FromStr;

    fn request(amount: &str) -> WithdrawRequest {
        WithdrawRequest {
            amount: Decimal::from_str(amount).unwrap(),
            to_address: Some(GAME_WALLET_ADDRESS.to_string()),
        }
    }

    #[tokio::test]
    async fn withdrawing_ten_with_five_is_rejected() {
        let app = TestApp::new();
        let (user, headers) = app.login("alice", 5_000_000_000).await;

        let err = withdraw(State(app.state.clone()), headers, ApiJson(request("10")))
            .await
            .unwrap_err();

        assert_eq!(err.into_response().status(), 400);
        assert_eq!(app.store.balance_of(user.id).await, 5_000_000_000);
    }

    #[tokio::test]
    async fn withdrawal_debits_and_appears_in_history() {
        let app = TestApp::new();
        let (user, headers) = app.login("alice", 5_000_000_000).await;

        let Json(body) = withdraw(State(app.state.clone()), headers.clone(), ApiJson(request("1.5")))
            .await
            .unwrap();
        assert_eq!(body.data.new_balance, 3_500_000_000);
        assert_eq!(body.data.status, WithdrawalStatus::Pending);
        assert!(body.data.transaction_hash.is_none());
        assert_eq!(app.store.balance_of(user.id).await, 3_500_000_000);

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["withdrawalAmount"], serde_json::json!(1.5));
        assert_eq!(json["newBalance"], serde_json::json!(3.5));

        let Json(history) = withdrawal_history(
            State(app.state.clone()),
            headers,
            Query(TokenQuery::default()),
        )
        .await
        .unwrap();
        assert_eq!(history.data.transactions.len(), 1);
        assert_eq!(history.data.transactions[0].id, body.data.transaction_id);
    }

    #[tokio::test]
    async fn invalid_destination_is_400() {
        let app = TestApp::new();
        let (user, headers) = app.login("alice", 5_000_000_000).await;
        let mut req = request("1");
        req.to_address = Some("not-an-address".to_string());

        let err = withdraw(State(app.state.clone()), headers, ApiJson(req))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), 400);
        assert_eq!(app.store.balance_of(user.id).await, 5_000_000_000);
    }
}
