//! Follow-up questions answered from a finished profile.

pub mod handlers;
pub mod prompts;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::llm_client::{LlmBackend, LlmError, LlmRequest};
use crate::models::profile::CandidateProfile;

/// Only the most recent turns are sent along with the question.
pub const MAX_HISTORY_TURNS: usize = 10;
const CHAT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("no answer within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Backend(#[from] LlmError),
}

pub async fn answer(
    backend: &dyn LlmBackend,
    profile: &CandidateProfile,
    question: &str,
    history: &[ChatTurn],
    timeout: Duration,
) -> Result<String, ChatError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(ChatError::EmptyQuestion);
    }

    let request = build_request(profile, question, history);
    debug!("chat: {} history turns via {}", history.len().min(MAX_HISTORY_TURNS), backend.name());

    let reply = tokio::time::timeout(timeout, backend.complete(&request))
        .await
        .map_err(|_| ChatError::Timeout(timeout))??;
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(LlmError::EmptyContent.into());
    }
    Ok(reply.to_string())
}

pub fn build_request(profile: &CandidateProfile, question: &str, history: &[ChatTurn]) -> LlmRequest {
    let recent = &history[history.len().saturating_sub(MAX_HISTORY_TURNS)..];
    let history_block = if recent.is_empty() {
        String::new()
    } else {
        let turns: Vec<String> = recent
            .iter()
            .map(|turn| {
                let speaker = match turn.role {
                    ChatRole::User => "User",
                    ChatRole::Assistant => "Assistant",
                };
                format!("{speaker}: {}", turn.content.trim())
            })
            .collect();
        prompts::HISTORY_BLOCK_TEMPLATE.replace("{turns}", &turns.join("\n"))
    };

    let profile_json = serde_json::to_string_pretty(profile).unwrap_or_default();
    let prompt = prompts::CHAT_PROMPT_TEMPLATE
        .replace("{profile}", &profile_json)
        .replace("{history}", &history_block)
        .replace("{question}", question);

    LlmRequest {
        label: "chat".to_string(),
        system: prompts::CHAT_SYSTEM.to_string(),
        prompt,
        max_tokens: CHAT_MAX_TOKENS,
    }
}
