use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use engine::{StatusReport, SummaryReport};

use crate::{error::ApiError, AppState};

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/summary", get(get_summary))
        .route("/api/trades", get(get_trades))
}

async fn get_status(State(state): State<AppState>) -> Result<Json<StatusReport>, ApiError> {
    Ok(Json(state.control.status().await?))
}

async fn get_summary(State(state): State<AppState>) -> Result<Json<SummaryReport>, ApiError> {
    Ok(Json(state.control.summary().await?))
}

#[derive(Deserialize)]
struct TradesQuery {
    limit: Option<usize>,
}

async fn get_trades(
    State(state): State<AppState>,
    Query(q): Query<TradesQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    let trades = state.control.trades(limit).await?;
    Ok(Json(json!({
        "trades": trades,
        "count": trades.len(),
        "limit": limit,
    })))
}
