use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::AppError;
use super::state::AppState;
use crate::error::Error;
use crate::search::SearchResponse;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
}

/// `GET /search?q=...`
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let query = params
        .q
        .ok_or_else(|| Error::InvalidQuery("missing 'q' parameter".to_string()))?;
    let response = state.search.search(&query).await?;
    Ok(Json(response))
}

/// `GET /health`
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "message": "Health check passed",
    }))
}
