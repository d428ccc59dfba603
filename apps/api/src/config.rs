use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::extraction::RetryPolicy;
use crate::llm_client::cli::DEFAULT_CLI_MODEL;
use crate::llm_client::DEFAULT_MODEL;
use crate::pipeline::stages::{stage_plan, StageName, DEFAULT_STAGE_TIMEOUT};
use crate::pipeline::{PipelineSettings, DEFAULT_PERSIST_TIMEOUT};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackendKind {
    Anthropic,
    ClaudeCli,
}

impl FromStr for LlmBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(LlmBackendKind::Anthropic),
            "claude-cli" | "cli" => Ok(LlmBackendKind::ClaudeCli),
            other => bail!("LLM_BACKEND must be 'anthropic' or 'claude-cli', got '{other}'"),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub llm_backend: LlmBackendKind,
    /// Required only for the Anthropic backend.
    pub anthropic_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub claude_cli_path: String,
    pub stage_timeout: Duration,
    pub stage_timeouts: Vec<(StageName, Duration)>,
    pub stage_retry_limit: u32,
    pub stage_retry_delay: Duration,
    pub core_stages: Vec<StageName>,
    pub core_failure_threshold: usize,
    pub event_buffer: usize,
    pub persist_timeout: Duration,
    pub job_grace: Duration,
    pub max_upload_bytes: usize,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let llm_backend: LlmBackendKind = optional_env("LLM_BACKEND")
            .as_deref()
            .unwrap_or("anthropic")
            .parse()?;
        let anthropic_api_key = optional_env("ANTHROPIC_API_KEY");
        if llm_backend == LlmBackendKind::Anthropic && anthropic_api_key.is_none() {
            bail!("Required environment variable 'ANTHROPIC_API_KEY' is not set (LLM_BACKEND=anthropic)");
        }

        let core_failure_threshold: usize = parse_env("CORE_FAILURE_THRESHOLD", 1)?;
        if core_failure_threshold == 0 {
            bail!("CORE_FAILURE_THRESHOLD must be at least 1");
        }

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            llm_backend,
            anthropic_api_key,
            llm_model: optional_env("LLM_MODEL"),
            claude_cli_path: optional_env("CLAUDE_CLI_PATH").unwrap_or_else(|| "claude".to_string()),
            stage_timeout: Duration::from_secs(parse_env("STAGE_TIMEOUT_SECS", DEFAULT_STAGE_TIMEOUT.as_secs())?),
            stage_timeouts: parse_stage_timeouts(optional_env("STAGE_TIMEOUTS").as_deref().unwrap_or(""))?,
            stage_retry_limit: parse_env("STAGE_RETRY_LIMIT", 1)?,
            stage_retry_delay: Duration::from_millis(parse_env("STAGE_RETRY_DELAY_MS", 500)?),
            core_stages: parse_stage_list(optional_env("CORE_STAGES").as_deref().unwrap_or("contact-info"))?,
            core_failure_threshold,
            event_buffer: parse_env("EVENT_BUFFER", 64)?,
            persist_timeout: Duration::from_secs(parse_env("PERSIST_TIMEOUT_SECS", DEFAULT_PERSIST_TIMEOUT.as_secs())?),
            job_grace: Duration::from_secs(parse_env("JOB_GRACE_SECS", 300)?),
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            port: parse_env("PORT", 8080)?,
            rust_log: optional_env("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Model name for the selected backend.
    pub fn model(&self) -> String {
        self.llm_model.clone().unwrap_or_else(|| match self.llm_backend {
            LlmBackendKind::Anthropic => DEFAULT_MODEL.to_string(),
            LlmBackendKind::ClaudeCli => DEFAULT_CLI_MODEL.to_string(),
        })
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            stages: stage_plan(self.stage_timeout, &self.stage_timeouts),
            core_stages: self.core_stages.clone(),
            core_failure_threshold: self.core_failure_threshold,
            event_buffer: self.event_buffer,
            persist_timeout: self.persist_timeout,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.stage_retry_limit,
            delay: self.stage_retry_delay,
        }
    }

    /// Defaults with placeholder connection settings; nothing here is dialled in tests.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            database_url: "postgres://localhost/cvparse_test".into(),
            s3_bucket: "cvparse-test".into(),
            s3_endpoint: "http://localhost:9000".into(),
            aws_access_key_id: "test".into(),
            aws_secret_access_key: "test".into(),
            llm_backend: LlmBackendKind::Anthropic,
            anthropic_api_key: None,
            llm_model: None,
            claude_cli_path: "claude".into(),
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
            stage_timeouts: Vec::new(),
            stage_retry_limit: 1,
            stage_retry_delay: Duration::from_millis(500),
            core_stages: vec![StageName::ContactInfo],
            core_failure_threshold: 1,
            event_buffer: 64,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
            job_grace: Duration::from_secs(300),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            port: 8080,
            rust_log: "info".into(),
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be a valid value, got '{raw}': {e}")),
    }
}

/// Parses `stage=secs,stage=secs`.
fn parse_stage_timeouts(raw: &str) -> Result<Vec<(StageName, Duration)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (stage, secs) = item
                .split_once('=')
                .with_context(|| format!("STAGE_TIMEOUTS entry '{item}' must look like stage=secs"))?;
            let stage: StageName = stage.parse().map_err(anyhow::Error::msg)?;
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("STAGE_TIMEOUTS entry '{item}' has an invalid number"))?;
            Ok((stage, Duration::from_secs(secs)))
        })
        .collect()
}

fn parse_stage_list(raw: &str) -> Result<Vec<StageName>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| item.parse::<StageName>().map_err(anyhow::Error::msg))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_timeouts_parse() {
        let parsed = parse_stage_timeouts("experience=180, projects = 90 ,").unwrap();
        assert_eq!(
            parsed,
            vec![
                (StageName::Experience, Duration::from_secs(180)),
                (StageName::Projects, Duration::from_secs(90)),
            ]
        );
        assert!(parse_stage_timeouts("").unwrap().is_empty());
    }

    #[test]
    fn test_bad_stage_timeouts_are_rejected() {
        assert!(parse_stage_timeouts("experience").is_err());
        assert!(parse_stage_timeouts("hobbies=10").is_err());
        assert!(parse_stage_timeouts("skills=soon").is_err());
    }

    #[test]
    fn test_stage_list_parse() {
        assert_eq!(
            parse_stage_list("contact-info, skills").unwrap(),
            vec![StageName::ContactInfo, StageName::Skills]
        );
        assert!(parse_stage_list("contact-info,nope").is_err());
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("Anthropic".parse::<LlmBackendKind>().unwrap(), LlmBackendKind::Anthropic);
        assert_eq!("claude-cli".parse::<LlmBackendKind>().unwrap(), LlmBackendKind::ClaudeCli);
        assert!("openai".parse::<LlmBackendKind>().is_err());
    }

    #[test]
    fn test_pipeline_settings_apply_overrides() {
        let mut config = Config::for_tests();
        config.stage_timeout = Duration::from_secs(60);
        config.stage_timeouts = vec![(StageName::Experience, Duration::from_secs(180))];

        let settings = config.pipeline_settings();
        assert_eq!(settings.stages[0].timeout, Duration::from_secs(60));
        assert_eq!(settings.stages[2].timeout, Duration::from_secs(180));
        assert_eq!(settings.core_stages, vec![StageName::ContactInfo]);
    }

    #[test]
    fn test_model_defaults_follow_backend() {
        let mut config = Config::for_tests();
        assert_eq!(config.model(), DEFAULT_MODEL);
        config.llm_backend = LlmBackendKind::ClaudeCli;
        assert_eq!(config.model(), DEFAULT_CLI_MODEL);
        config.llm_model = Some("opus".into());
        assert_eq!(config.model(), "opus");
    }
}
