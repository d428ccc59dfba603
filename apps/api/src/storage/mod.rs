//! Persistence for finished parses.
//!
//! The JSON artifact goes to object storage first, then the row is inserted,
//! so a row never points at a missing object.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::parsed::ParsedProfileRecord;
use crate::pipeline::job::{Job, JobOutcome};

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn save(&self, record: &ParsedProfileRecord) -> Result<()>;

    async fn load(&self, job_id: Uuid) -> Result<Option<ParsedProfileRecord>>;
}

/// Object key for a job's structured artifact.
pub fn artifact_key(job_id: Uuid, stem: &str) -> String {
    format!("parsed/{job_id}/{stem}_structured.json")
}

impl ParsedProfileRecord {
    pub fn from_outcome(job: &Job, outcome: &JobOutcome) -> Result<Self> {
        Ok(Self {
            job_id: job.id,
            filename: job.source.filename.clone(),
            status: job.status.as_str().to_string(),
            profile: serde_json::to_value(&outcome.profile).context("serializing profile")?,
            provenance: serde_json::to_value(&outcome.provenance).context("serializing provenance")?,
            failed_stages: outcome.failed_stages.iter().map(ToString::to_string).collect(),
            assembly_warning: outcome.assembly_error.clone(),
            s3_key: artifact_key(job.id, job.source.stem()),
            created_at: job.finished_at.unwrap_or_else(Utc::now),
        })
    }

    /// The document uploaded to object storage.
    pub fn artifact(&self) -> serde_json::Value {
        json!({
            "job_id": self.job_id,
            "filename": self.filename,
            "status": self.status,
            "profile": self.profile,
            "provenance": self.provenance,
            "failed_stages": self.failed_stages,
            "assembly_warning": self.assembly_warning,
            "created_at": self.created_at,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Postgres + S3
// ────────────────────────────────────────────────────────────────────────────

pub struct PgProfileStore {
    pool: PgPool,
    s3: aws_sdk_s3::Client,
    bucket: String,
}

impl PgProfileStore {
    pub fn new(pool: PgPool, s3: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { pool, s3, bucket }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn save(&self, record: &ParsedProfileRecord) -> Result<()> {
        let body = serde_json::to_vec_pretty(&record.artifact())?;
        self.s3
            .put_object()
            .bucket(&self.bucket)
            .key(&record.s3_key)
            .body(ByteStream::from(body))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("S3 upload failed: {e}"))?;

        info!("Uploaded parsed profile to s3://{}/{}", self.bucket, record.s3_key);

        sqlx::query(
            r#"
            INSERT INTO parsed_profiles
                (job_id, filename, status, profile, provenance,
                 failed_stages, assembly_warning, s3_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.job_id)
        .bind(&record.filename)
        .bind(&record.status)
        .bind(&record.profile)
        .bind(&record.provenance)
        .bind(&record.failed_stages)
        .bind(&record.assembly_warning)
        .bind(&record.s3_key)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("inserting parsed profile")?;

        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> Result<Option<ParsedProfileRecord>> {
        Ok(sqlx::query_as::<_, ParsedProfileRecord>(
            r#"
            SELECT job_id, filename, status, profile, provenance,
                   failed_stages, assembly_warning, s3_key, created_at
            FROM parsed_profiles
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory store for tests
// ────────────────────────────────────────────────────────────────────────────
