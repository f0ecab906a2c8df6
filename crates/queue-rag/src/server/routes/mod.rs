//! API routes for the intake server

pub mod submit;

use axum::{
    routing::{get, post},
    Router,
};
use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/submit", post(submit::submit_text))
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "queue-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Intake for the queue-driven RAG pipeline",
        "endpoints": {
            "POST /api/submit": "Queue text for redaction, retrieval and generation",
            "GET /api/info": "This document",
            "GET /health": "Liveness probe"
        }
    }))
}
