use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::{self, ChatTurn};
use crate::errors::AppError;
use crate::models::profile::CandidateProfile;
use crate::pipeline::handlers::find_profile;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
}

/// POST /api/v1/jobs/:id/chat
pub async fn handle_chat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let record = find_profile(&state, id).await?;
    let profile: CandidateProfile =
        serde_json::from_value(record.profile).map_err(|e| AppError::Internal(e.into()))?;

    let answer = chat::answer(
        state.llm.as_ref(),
        &profile,
        &req.question,
        &req.history,
        state.config.stage_timeout,
    )
    .await?;
    Ok(Json(ChatResponse { answer }))
}
