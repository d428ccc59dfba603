use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// A finished parse as persisted in `parsed_profiles`.
/// Append-only: a job is written once, when it reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ParsedProfileRecord {
    pub job_id: Uuid,
    pub filename: String,
    /// Terminal job status (`completed` or `failed`).
    pub status: String,
    /// `CandidateProfile` as JSON.
    pub profile: Value,
    /// Field name → stage name.
    pub provenance: Value,
    pub failed_stages: Vec<String>,
    pub assembly_warning: Option<String>,
    pub s3_key: String,
    pub created_at: DateTime<Utc>,
}
