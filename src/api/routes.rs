//! HTTP API
//!
//! Thin axum layer over the market engine. Identities travel in request
//! bodies (wallet-style hex strings); the aggregate read additionally
//! carries a signed capability in its query string. Timestamps come
//! from the server clock here — the engine itself is time-explicit.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::auth::AuthorizationToken;
use crate::market::{MarketError, PredictionMarket, StakeLedger};
use crate::models::{MarketParams, Prediction, SettlementRecord, Subscription};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub market: Arc<PredictionMarket>,
    pub ledger: Arc<dyn StakeLedger>,
}

/// Create the API router
pub fn create_router(market: Arc<PredictionMarket>, ledger: Arc<dyn StakeLedger>) -> Router {
    let state = AppState { market, ledger };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/predictions", post(submit_prediction))
        .route("/api/resolutions", post(resolve_epoch))
        .route("/api/claims", post(claim_payouts))
        .route("/api/subscriptions", post(purchase_subscription))
        .route("/api/epochs/:epoch/aggregate", get(read_aggregate))
        .route("/api/epochs/:epoch/stake", get(read_total_stake))
        .route(
            "/api/epochs/:epoch/predictions/:predictor",
            get(read_prediction),
        )
        .route("/api/admin/revenue/:epoch", post(redeem_revenue))
        .route("/api/admin/pause", post(toggle_pause))
        .route("/api/admin/params", post(update_params))
        .route("/api/ledger/deposits", post(deposit))
        .with_state(state)
}

fn now() -> i64 {
    Utc::now().timestamp()
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn submit_prediction(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<Prediction>, ApiError> {
    let prediction = state
        .market
        .submit_prediction(&req.predictor, req.epoch, req.direction, req.stake, now())
        .await?;
    Ok(Json(prediction))
}

async fn resolve_epoch(
    State(state): State<AppState>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cancel = req.cancel.unwrap_or(false);
    let truth = match (req.truth, cancel) {
        (Some(t), _) => t,
        (None, true) => false, // ignored on cancel
        (None, false) => {
            return Err(ApiError::BadRequest(
                "truth is required unless canceling".to_string(),
            ))
        }
    };
    let epoch = state
        .market
        .resolve(&req.caller, req.epoch, truth, cancel, now())
        .await?;
    Ok(Json(json!({
        "epoch": epoch.start,
        "status": epoch.status,
        "trueval": epoch.trueval,
    })))
}

async fn claim_payouts(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, ApiError> {
    let results = state
        .market
        .claim_many(&req.predictor, &req.epochs, now())
        .await?;
    Ok(Json(ClaimResponse {
        settlements: results
            .into_iter()
            .map(|(epoch, settled)| ClaimOutcome { epoch, settled })
            .collect(),
    }))
}

async fn purchase_subscription(
    State(state): State<AppState>,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription = state
        .market
        .purchase_subscription(&req.buyer, req.amount, now())
        .await?;
    Ok(Json(subscription))
}

async fn read_aggregate(
    State(state): State<AppState>,
    Path(epoch): Path<i64>,
    Query(query): Query<AggregateQuery>,
) -> Result<Json<AggregateResponse>, ApiError> {
    let token = AuthorizationToken {
        subject: query.caller.clone(),
        valid_until: query.valid_until,
        signature: query.signature,
    };
    let (true_stake, total_stake) = state
        .market
        .aggregate(epoch, &query.caller, &token, now())
        .await?;
    Ok(Json(AggregateResponse {
        epoch,
        true_stake,
        total_stake,
    }))
}

async fn read_total_stake(
    State(state): State<AppState>,
    Path(epoch): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let total_stake = state.market.total_stake(epoch, now()).await?;
    Ok(Json(json!({ "epoch": epoch, "total_stake": total_stake })))
}

async fn read_prediction(
    State(state): State<AppState>,
    Path((epoch, predictor)): Path<(i64, String)>,
    Query(query): Query<CallerQuery>,
) -> Result<Json<Prediction>, ApiError> {
    let prediction = state
        .market
        .prediction(epoch, &predictor, &query.caller, now())
        .await?;
    Ok(Json(prediction))
}

async fn redeem_revenue(
    State(state): State<AppState>,
    Path(epoch): Path<i64>,
    Json(req): Json<CallerRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let swept = state
        .market
        .redeem_unused_revenue(&req.caller, epoch, now())
        .await?;
    Ok(Json(json!({ "epoch": epoch, "swept": swept })))
}

async fn toggle_pause(
    State(state): State<AppState>,
    Json(req): Json<CallerRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let paused = state.market.pause_predictions(&req.caller).await?;
    Ok(Json(json!({ "paused": paused })))
}

async fn update_params(
    State(state): State<AppState>,
    Json(req): Json<ParamsRequest>,
) -> Result<Json<MarketParams>, ApiError> {
    let params = state
        .market
        .update_params(&req.caller, req.subscription_duration, req.trueval_timeout)
        .await?;
    Ok(Json(params))
}

/// Demo faucet for the in-memory staking ledger
async fn deposit(
    State(state): State<AppState>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.amount == 0 {
        return Err(ApiError::BadRequest("amount must be positive".to_string()));
    }
    state.ledger.credit(&req.account, req.amount).await?;
    let balance = state.ledger.balance(&req.account).await;
    Ok(Json(json!({ "account": req.account, "balance": balance })))
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct SubmitRequest {
    predictor: String,
    epoch: i64,
    direction: bool,
    stake: u64,
}

#[derive(Deserialize)]
struct ResolveRequest {
    caller: String,
    epoch: i64,
    truth: Option<bool>,
    cancel: Option<bool>,
}

#[derive(Deserialize)]
struct ClaimRequest {
    predictor: String,
    epochs: Vec<i64>,
}

#[derive(Serialize)]
struct ClaimOutcome {
    epoch: i64,
    settled: Option<SettlementRecord>,
}

#[derive(Serialize)]
struct ClaimResponse {
    settlements: Vec<ClaimOutcome>,
}

#[derive(Deserialize)]
struct PurchaseRequest {
    buyer: String,
    amount: u64,
}

#[derive(Deserialize)]
struct AggregateQuery {
    caller: String,
    valid_until: i64,
    signature: String,
}

#[derive(Deserialize)]
struct CallerQuery {
    caller: String,
}

#[derive(Deserialize)]
struct CallerRequest {
    caller: String,
}

#[derive(Deserialize)]
struct ParamsRequest {
    caller: String,
    subscription_duration: i64,
    trueval_timeout: i64,
}

#[derive(Deserialize)]
struct DepositRequest {
    account: String,
    amount: u64,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct AggregateResponse {
    epoch: i64,
    true_stake: u64,
    total_stake: u64,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    Market(MarketError),
    BadRequest(String),
}

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        ApiError::Market(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Market(err) => {
                let status = match &err {
                    MarketError::Input(_) | MarketError::InsufficientFunds { .. } => {
                        StatusCode::BAD_REQUEST
                    }
                    MarketError::Auth(_) => StatusCode::UNAUTHORIZED,
                    MarketError::State(_) => StatusCode::CONFLICT,
                    MarketError::UnknownPrediction { .. } => StatusCode::NOT_FOUND,
                    MarketError::Storage(inner) => {
                        tracing::error!("Storage error: {}", inner);
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
                    "Internal server error".to_string()
                } else {
                    err.to_string()
                };
                (status, message)
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_error_status_mapping() {
        let cases = [
            (MarketError::input("bad"), StatusCode::BAD_REQUEST),
            (MarketError::auth("no"), StatusCode::UNAUTHORIZED),
            (MarketError::state("twice"), StatusCode::CONFLICT),
            (
                MarketError::UnknownPrediction {
                    epoch: 900,
                    predictor: "alice".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
        ];
        for (err, expected) in cases {
            let response = ApiError::Market(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_bad_request_mapping() {
        let response = ApiError::BadRequest("nope".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
