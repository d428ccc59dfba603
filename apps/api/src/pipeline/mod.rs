//! Progressive parsing pipeline: jobs, stages, progress events and assembly.

pub mod assembler;
pub mod events;
pub mod fragment;
pub mod handlers;
pub mod job;
pub mod registry;
pub mod sequencer;
pub mod stages;

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::document::DocumentError;
use crate::pipeline::stages::{stage_plan, StageName, StageSpec, DEFAULT_STAGE_TIMEOUT};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job {0} not found")]
    NotFound(Uuid),
}

impl From<DocumentError> for PipelineError {
    fn from(err: DocumentError) -> Self {
        PipelineError::InvalidInput(err.to_string())
    }
}

/// Job-level policy shared by every job the sequencer runs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub stages: Vec<StageSpec>,
    /// Stages whose failure counts toward failing the whole job.
    pub core_stages: Vec<StageName>,
    /// A job fails once this many core stages have failed.
    pub core_failure_threshold: usize,
    pub event_buffer: usize,
    /// Upper bound on saving the finished profile.
    pub persist_timeout: Duration,
}

pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(30);

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stages: stage_plan(DEFAULT_STAGE_TIMEOUT, &[]),
            core_stages: vec![StageName::ContactInfo],
            core_failure_threshold: 1,
            event_buffer: 64,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
        }
    }
}

impl PipelineSettings {
    pub fn failed_core_stages(&self, failed: &[StageName]) -> usize {
        failed.iter().filter(|stage| self.core_stages.contains(*stage)).count()
    }
}
