//! Text submission endpoint

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::server::state::AppState;

/// Submission body, also the message envelope on the PII input queue
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub text: String,
}

/// Submission receipt
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    pub queue: String,
}

/// Publish the text to the PII stage. The answer is not returned here.
pub async fn submit_text(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>)> {
    if request.text.trim().is_empty() {
        return Err(Error::malformed(state.queue(), "text must not be empty"));
    }

    let body = serde_json::to_vec(&request)?;
    state.broker().publish(state.queue(), &body).await?;
    tracing::info!(queue = state.queue(), chars = request.text.len(), "Accepted submission");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            status: "queued".to_string(),
            queue: state.queue().to_string(),
        }),
    ))
}
