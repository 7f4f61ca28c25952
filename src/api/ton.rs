use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::{AppError, Result},
    models::ApiResponse,
    services::VerificationSource,
    utils::{is_hex_hash, serialize_opt_ton},
};

use super::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTransaction {
    pub hash: String,
    pub verified: bool,
    #[serde(serialize_with = "serialize_opt_ton")]
    pub amount: Option<i64>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub source: VerificationSource,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ChainCheckResponse {
    pub transaction: ChainTransaction,
}

/// GET /api/ton/check/{tx_hash}
pub async fn check_transaction(
    State(state): State<AppState>,
    Path(tx_hash): Path<String>,
) -> Result<Json<ApiResponse<ChainCheckResponse>>> {
    let tx_hash = tx_hash.trim();
    if !is_hex_hash(tx_hash) {
        return Err(AppError::BadRequest(
            "Transaction hash must be hexadecimal".to_string(),
        ));
    }

    let verification = state.verifier.verify(tx_hash).await;
    if !verification.verified {
        return Err(AppError::NotFound(
            "Transaction not found or not verified".to_string(),
        ));
    }

    Ok(Json(ApiResponse::success(ChainCheckResponse {
        transaction: ChainTransaction {
            hash: tx_hash.to_string(),
            verified: true,
            amount: verification.amount_nano,
            from_address: verification.from_address,
            to_address: verification.to_address,
            source: verification.source,
            verified_at: Utc::now(),
        },
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::testing::TestApp, services::deposit_service::testing::StubVerifier};
    use axum::response::IntoResponse;
    use std::sync::Arc;

    #[tokio::test]
    async fn non_hex_hash_is_400() {
        let app = TestApp::new();
        let err = check_transaction(State(app.state.clone()), Path("not-hex!".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), 400);
    }

    #[tokio::test]
    async fn unverified_hash_is_404() {
        let app = TestApp::with_verifier(Arc::new(StubVerifier::unverified()));
        let err = check_transaction(State(app.state.clone()), Path("abc123".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), 404);
    }

    #[tokio::test]
    async fn verified_hash_reports_amount_in_ton() {
        let app = TestApp::with_verifier(Arc::new(StubVerifier::on_chain(80_000_000)));
        let Json(body) = check_transaction(State(app.state.clone()), Path("abc123".to_string()))
            .await
            .unwrap();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["transaction"]["amount"], serde_json::json!(0.08));
        assert_eq!(json["transaction"]["fromAddress"], "UQsender");
        assert_eq!(json["transaction"]["source"], "chain");
    }
}
