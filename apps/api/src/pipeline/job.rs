use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::SourceDocument;
use crate::models::profile::CandidateProfile;
use crate::pipeline::assembler::Provenance;
use crate::pipeline::fragment::ProfileFragment;
use crate::pipeline::stages::{StageName, StageSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Done,
    Error,
}

/// One unit of extraction work within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: StageName,
    pub status: StageStatus,
    pub attempts: u32,
    pub partial: Option<ProfileFragment>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageRecord {
    fn pending(name: StageName) -> Self {
        Self {
            name,
            status: StageStatus::Pending,
            attempts: 0,
            partial: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// The final outcome attached to a job once it reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub profile: CandidateProfile,
    pub provenance: Provenance,
    pub failed_stages: Vec<StageName>,
    /// Set when assembly could not produce a name; the profile is then partial.
    pub assembly_error: Option<String>,
}

/// One in-flight (or recently finished) parse. Only the owning sequencer task writes to it.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub source: SourceDocument,
    pub stages: Vec<StageRecord>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub outcome: Option<JobOutcome>,
}

impl Job {
    pub fn new(source: SourceDocument, plan: &[StageSpec]) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            stages: plan.iter().map(|spec| StageRecord::pending(spec.name)).collect(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            finished_at: None,
            failure_reason: None,
            outcome: None,
        }
    }

    pub fn next_pending(&self) -> Option<usize> {
        self.stages.iter().position(|s| s.status == StageStatus::Pending)
    }

    pub fn failed_stages(&self) -> Vec<StageName> {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Error)
            .map(|s| s.name)
            .collect()
    }

    /// Completed fragments in stage-definition order.
    pub fn completed_fragments(&self) -> impl Iterator<Item = (StageName, &ProfileFragment)> {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Done)
            .filter_map(|s| s.partial.as_ref().map(|p| (s.name, p)))
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            filename: self.source.filename.clone(),
            status: self.status,
            created_at: self.created_at,
            finished_at: self.finished_at,
            failure_reason: self.failure_reason.clone(),
            stages: self.stages.clone(),
            failed_stages: self.failed_stages(),
            outcome: self.outcome.clone(),
        }
    }
}

/// Read-only view of a job returned by status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub filename: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub stages: Vec<StageRecord>,
    pub failed_stages: Vec<StageName>,
    pub outcome: Option<JobOutcome>,
}
