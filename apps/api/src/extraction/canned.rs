//! Deterministic stand-in for a model backend: canned replies keyed by request label.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm_client::{LlmBackend, LlmError, LlmRequest};

#[derive(Debug, Clone)]
pub enum CannedReply {
    Text(String),
    Fail(String),
    /// Never answers; exercises timeouts.
    Hang,
    /// Answers after a delay.
    Slow(Duration, String),
}

impl CannedReply {
    pub fn text(s: &str) -> Self {
        CannedReply::Text(s.to_string())
    }
}

/// Labels without a configured reply get `{}` (an empty but valid result).
#[derive(Debug, Default)]
pub struct CannedBackend {
    replies: HashMap<String, CannedReply>,
    calls: Mutex<HashMap<String, u32>>,
}

impl CannedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, label: &str, reply: CannedReply) -> Self {
        self.replies.insert(label.to_string(), reply);
        self
    }

    pub fn calls(&self, label: &str) -> u32 {
        self.calls.lock().unwrap().get(label).copied().unwrap_or(0)
    }
}

#[async_trait]
impl LlmBackend for CannedBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        *self.calls.lock().unwrap().entry(request.label.clone()).or_default() += 1;

        match self.replies.get(&request.label).cloned() {
            None => Ok("{}".to_string()),
            Some(CannedReply::Text(text)) => Ok(text),
            Some(CannedReply::Fail(message)) => Err(LlmError::Process(message)),
            Some(CannedReply::Hang) => std::future::pending().await,
            Some(CannedReply::Slow(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
        }
    }

    fn name(&self) -> &'static str {
        "canned"
    }
}
