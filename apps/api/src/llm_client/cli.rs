//! Claude CLI backend: runs `claude -p` as a subprocess, prompt on stdin, answer on stdout.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::llm_client::{LlmBackend, LlmError, LlmRequest};

pub const DEFAULT_CLI_MODEL: &str = "sonnet";

#[derive(Debug, Clone)]
pub struct ClaudeCliBackend {
    program: String,
    model: String,
}

impl ClaudeCliBackend {
    pub fn new(program: String, model: String) -> Self {
        Self { program, model }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-p")
            .arg("--dangerously-skip-permissions")
            .arg("--model")
            .arg(&self.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout must not leave the process behind.
            .kill_on_drop(true);
        cmd
    }
}

/// The CLI has no separate system channel, so the system prompt leads the input.
fn render_input(request: &LlmRequest) -> String {
    format!("{}\n\n{}", request.system, request.prompt)
}

#[async_trait]
impl LlmBackend for ClaudeCliBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        debug!("claude-cli: running {} for '{}'", self.program, request.label);

        let mut child = self
            .command()
            .spawn()
            .map_err(|e| LlmError::Process(format!("failed to spawn '{}': {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(render_input(request).as_bytes())
                .await
                .map_err(|e| LlmError::Process(format!("failed to write prompt: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| LlmError::Process(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LlmError::Process(format!(
                "claude exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() || stdout.starts_with("Execution error") {
            return Err(LlmError::EmptyContent);
        }
        Ok(stdout)
    }

    fn name(&self) -> &'static str {
        "claude-cli"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LlmRequest {
        LlmRequest {
            label: "skills".into(),
            system: "Return JSON only.".into(),
            prompt: "CV text".into(),
            max_tokens: 100,
        }
    }

    #[test]
    fn test_input_puts_system_prompt_first() {
        assert_eq!(render_input(&request()), "Return JSON only.\n\nCV text");
    }

    #[tokio::test]
    async fn test_missing_program_is_a_process_error() {
        let backend = ClaudeCliBackend::new("/nonexistent/claude".into(), DEFAULT_CLI_MODEL.into());
        let err = backend.complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Process(_)));
    }
}
