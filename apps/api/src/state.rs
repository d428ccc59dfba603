use std::sync::Arc;

use crate::config::Config;
use crate::llm_client::LlmBackend;
use crate::pipeline::sequencer::StageSequencer;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Owns the job registry and the profile store.
    pub sequencer: StageSequencer,
    /// Same backend the extraction stages use; chat talks to it directly.
    pub llm: Arc<dyn LlmBackend>,
    pub config: Config,
}
