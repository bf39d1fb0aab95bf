use crate::AppState;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

pub fn routes() -> Router<AppState> {
	Router::new().route("/health", get(health))
}

async fn health() -> impl IntoResponse {
	Json(json!({ "status": "healthy" }))
}
