//! Extraction Client: turns one stage into a model request, enforces the
//! stage's time budget, and parses the answer into a `ProfileFragment`.
//!
//! Retry policy: only timeouts are retried, at most `RetryPolicy::max_retries`
//! times after a short fixed delay. Parse and backend errors are final for the
//! stage; retrying an unparseable answer rarely helps and model calls are costly.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::llm_client::{LlmBackend, LlmRequest, DEFAULT_MAX_TOKENS};
use crate::pipeline::fragment::ProfileFragment;
use crate::pipeline::stages::{StageName, StageSpec};

#[cfg(test)]
pub mod canned;
pub mod parse;
pub mod prompts;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    #[error("model call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("could not parse model response: {0}")]
    Parse(String),

    #[error("model backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt, applied to timeouts only.
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            delay: Duration::from_millis(500),
        }
    }
}

/// Read-only input for one stage: the document plus what earlier stages found.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub filename: String,
    pub document: Arc<str>,
    pub prior: Vec<(StageName, ProfileFragment)>,
}

impl StageContext {
    pub fn prior(&self, stage: StageName) -> Option<&ProfileFragment> {
        self.prior.iter().find(|(name, _)| *name == stage).map(|(_, f)| f)
    }
}

/// Result of `extract`, including how many attempts it took.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub attempts: u32,
    pub result: Result<ProfileFragment, ExtractionError>,
}

#[derive(Clone)]
pub struct ExtractionClient {
    backend: Arc<dyn LlmBackend>,
    retry: RetryPolicy,
    max_tokens: u32,
}

impl ExtractionClient {
    pub fn new(backend: Arc<dyn LlmBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Runs one stage. `on_retry` is invoked with the upcoming attempt number
    /// and the error that caused the retry, before the retry delay.
    pub async fn extract(
        &self,
        stage: &StageSpec,
        context: &StageContext,
        on_retry: &(dyn Fn(u32, &ExtractionError) + Send + Sync),
    ) -> Extraction {
        let request = build_request(stage.name, context, self.max_tokens);
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(
                "{}: attempt {} via {} (budget {}s)",
                stage.name,
                attempts,
                self.backend.name(),
                stage.timeout.as_secs()
            );

            let result = match tokio::time::timeout(stage.timeout, self.backend.complete(&request)).await {
                Err(_) => Err(ExtractionError::Timeout(stage.timeout)),
                Ok(Err(e)) if e.is_timeout() => Err(ExtractionError::Timeout(stage.timeout)),
                Ok(Err(e)) => Err(ExtractionError::Backend(e.to_string())),
                Ok(Ok(text)) => parse::parse_fragment(&text),
            };

            match result {
                Err(err @ ExtractionError::Timeout(_)) if attempts <= self.retry.max_retries => {
                    warn!("{}: {err}; retrying", stage.name);
                    on_retry(attempts + 1, &err);
                    tokio::time::sleep(self.retry.delay).await;
                }
                result => return Extraction { attempts, result },
            }
        }
    }
}

/// Assembles the stage prompt. Referenced earlier stages contribute only the
/// fields they own, serialized as JSON.
pub fn build_request(stage: StageName, context: &StageContext, max_tokens: u32) -> LlmRequest {
    let prior: serde_json::Map<String, serde_json::Value> = stage
        .references()
        .iter()
        .filter_map(|referenced| {
            let fragment = context.prior(*referenced)?.owned_by(*referenced);
            let value = serde_json::to_value(fragment).ok()?;
            (value.as_object().is_some_and(|o| !o.is_empty())).then(|| (referenced.to_string(), value))
        })
        .collect();

    let context_block = if prior.is_empty() {
        String::new()
    } else {
        let rendered = serde_json::to_string_pretty(&prior).unwrap_or_default();
        prompts::CONTEXT_BLOCK_TEMPLATE.replace("{prior}", &rendered)
    };

    let rules = format!(
        "{}\n{}",
        prompts::rules(stage),
        crate::llm_client::prompts::NO_FABRICATION_INSTRUCTION
    );

    let prompt = prompts::EXTRACTION_PROMPT_TEMPLATE
        .replace("{focus}", prompts::focus(stage))
        .replace("{filename}", &context.filename)
        .replace("{schema}", prompts::schema(stage))
        .replace("{rules}", &rules)
        .replace("{context}", &context_block)
        .replace("{cv_text}", &context.document);

    LlmRequest {
        label: stage.to_string(),
        system: format!(
            "{} {}",
            prompts::EXTRACTION_ROLE,
            crate::llm_client::prompts::JSON_ONLY_SYSTEM
        ),
        prompt,
        max_tokens,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::extraction::canned::{CannedBackend, CannedReply};
    use crate::models::profile::ExperienceEntry;

    fn context() -> StageContext {
        StageContext {
            filename: "jane.txt".into(),
            document: Arc::from("Jane Roe\nGo, SQL"),
            prior: vec![],
        }
    }

    fn spec(name: StageName) -> StageSpec {
        StageSpec {
            name,
            timeout: Duration::from_secs(60),
        }
    }

    fn no_retry_hook() -> impl Fn(u32, &ExtractionError) + Send + Sync {
        |_, _| {}
    }

    #[tokio::test]
    async fn test_successful_extraction_takes_one_attempt() {
        let backend = CannedBackend::new().reply("skills", CannedReply::text(r#"{"skills": ["Go", "SQL"]}"#));
        let client = ExtractionClient::new(Arc::new(backend), RetryPolicy::default());

        let out = client.extract(&spec(StageName::Skills), &context(), &no_retry_hook()).await;

        assert_eq!(out.attempts, 1);
        assert_eq!(out.result.unwrap().skills, Some(vec!["Go".to_string(), "SQL".to_string()]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_exactly_once() {
        let backend = Arc::new(CannedBackend::new().reply("skills", CannedReply::Hang));
        let client = ExtractionClient::new(backend.clone(), RetryPolicy::default());
        let retries = AtomicU32::new(0);
        let hook = |attempt: u32, err: &ExtractionError| {
            assert_eq!(attempt, 2);
            assert!(matches!(err, ExtractionError::Timeout(_)));
            retries.fetch_add(1, Ordering::SeqCst);
        };

        let out = client.extract(&spec(StageName::Skills), &context(), &hook).await;

        assert_eq!(out.attempts, 2);
        assert_eq!(retries.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls("skills"), 2);
        assert_eq!(out.result.unwrap_err(), ExtractionError::Timeout(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_parse_error_is_not_retried() {
        let backend = Arc::new(CannedBackend::new().reply("skills", CannedReply::text("no idea, sorry")));
        let client = ExtractionClient::new(backend.clone(), RetryPolicy::default());

        let out = client.extract(&spec(StageName::Skills), &context(), &no_retry_hook()).await;

        assert_eq!(out.attempts, 1);
        assert_eq!(backend.calls("skills"), 1);
        assert!(matches!(out.result, Err(ExtractionError::Parse(_))));
    }

    #[tokio::test]
    async fn test_backend_error_is_not_retried() {
        let backend = Arc::new(CannedBackend::new().reply("skills", CannedReply::Fail("boom".into())));
        let client = ExtractionClient::new(backend.clone(), RetryPolicy::default());

        let out = client.extract(&spec(StageName::Skills), &context(), &no_retry_hook()).await;

        assert_eq!(backend.calls("skills"), 1);
        assert!(matches!(out.result, Err(ExtractionError::Backend(msg)) if msg.contains("boom")));
    }

    #[test]
    fn test_prompt_includes_referenced_prior_stage_only() {
        let mut ctx = context();
        ctx.prior = vec![
            (
                StageName::ContactInfo,
                ProfileFragment {
                    name: Some("Jane Roe".into()),
                    ..Default::default()
                },
            ),
            (
                StageName::Experience,
                ProfileFragment {
                    experience: Some(vec![ExperienceEntry {
                        company: "Globex".into(),
                        ..Default::default()
                    }]),
                    // Foreign field: must not leak into the projects prompt.
                    name: Some("Someone Else".into()),
                    ..Default::default()
                },
            ),
        ];

        let request = build_request(StageName::Projects, &ctx, 1000);

        assert_eq!(request.label, "projects");
        assert!(request.prompt.contains("Globex"));
        assert!(request.prompt.contains("ALREADY EXTRACTED"));
        assert!(!request.prompt.contains("Someone Else"));
        assert!(!request.prompt.contains("Jane Roe\"")); // contact-info is not referenced by projects
        assert!(request.prompt.contains("Jane Roe\nGo, SQL"));
    }

    #[test]
    fn test_prompt_without_prior_has_no_context_block() {
        let request = build_request(StageName::ContactInfo, &context(), 1000);
        assert!(!request.prompt.contains("ALREADY EXTRACTED"));
        assert!(!request.prompt.contains("{cv_text}"));
        assert!(!request.prompt.contains("{context}"));
    }
}
