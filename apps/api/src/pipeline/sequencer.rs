//! Stage sequencer: owns the job lifecycle.
//!
//! `start` validates the upload and spawns one task per job. That task runs the
//! stages strictly in order, folds each result into the job record, publishes
//! progress, and finally assembles, persists and announces the profile. A stage
//! failure is recorded and the next stage still runs; only the core-failure
//! threshold decides whether the whole job fails.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::document::{self, UploadedFile};
use crate::extraction::{Extraction, ExtractionClient, ExtractionError, StageContext};
use crate::models::parsed::ParsedProfileRecord;
use crate::pipeline::assembler;
use crate::pipeline::events::{
    EventDraft, ProgressStatus, ProgressStream, CANCEL, FINALIZE, INITIALIZE, PERSIST,
};
use crate::pipeline::job::{Job, JobOutcome, JobSnapshot, JobStatus, StageStatus};
use crate::pipeline::registry::{JobEntry, JobRegistry};
use crate::pipeline::stages::{StageName, StageSpec, DEFAULT_STAGE_TIMEOUT};
use crate::pipeline::{PipelineError, PipelineSettings};
use crate::storage::ProfileStore;

/// Failure reason recorded on cancelled jobs.
pub const CANCELLED: &str = "cancelled";

#[derive(Clone)]
pub struct StageSequencer {
    registry: Arc<JobRegistry>,
    client: ExtractionClient,
    store: Arc<dyn ProfileStore>,
    settings: Arc<PipelineSettings>,
}

impl StageSequencer {
    pub fn new(
        registry: Arc<JobRegistry>,
        client: ExtractionClient,
        store: Arc<dyn ProfileStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            registry,
            client,
            store,
            settings: Arc::new(settings),
        }
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn store(&self) -> Arc<dyn ProfileStore> {
        Arc::clone(&self.store)
    }

    /// Loads the document, registers the job and spawns its stage loop.
    /// Invalid input is rejected before anything is registered or published.
    pub async fn start(&self, upload: UploadedFile) -> Result<Uuid, PipelineError> {
        let loaded = document::load(&upload).await?;
        let filename = loaded.source.filename.clone();
        let text_len = loaded.text.chars().count();

        let job = Job::new(loaded.source, &self.settings.stages);
        let entry = Arc::new(JobEntry::new(
            job,
            Arc::from(loaded.text),
            self.settings.event_buffer,
        ));
        let id = entry.id;
        self.registry.insert(Arc::clone(&entry));

        entry.job().status = JobStatus::Running;
        entry.events.publish(
            EventDraft::new(INITIALIZE, ProgressStatus::Running).with_log(format!(
                "Parsing {filename}: {text_len} characters, {} stages",
                self.settings.stages.len()
            )),
        );
        info!("Job {id}: started for {filename} ({text_len} chars)");

        let sequencer = self.clone();
        tokio::spawn(async move { sequencer.run(entry).await });

        Ok(id)
    }

    pub fn status(&self, id: Uuid) -> Result<JobSnapshot, PipelineError> {
        Ok(self.registry.get(id)?.snapshot())
    }

    /// Requests a cooperative stop. The stage in flight finishes; no further
    /// stage starts. Cancelling a finished job is a no-op.
    pub fn cancel(&self, id: Uuid) -> Result<JobSnapshot, PipelineError> {
        let entry = self.registry.get(id)?;
        if !entry.events.is_closed() && !entry.cancel.is_cancelled() {
            entry.cancel.cancel();
            entry.events.publish(
                EventDraft::new(CANCEL, ProgressStatus::Running)
                    .with_log("Cancellation requested; stopping after the current stage"),
            );
            info!("Job {id}: cancellation requested");
        }
        Ok(entry.snapshot())
    }

    pub fn subscribe(&self, id: Uuid) -> Result<ProgressStream, PipelineError> {
        let entry = self.registry.get(id)?;
        info!(
            "Job {id}: progress subscriber attached after event {}",
            entry.events.last_sequence()
        );
        Ok(entry.events.subscribe())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Job task
    // ────────────────────────────────────────────────────────────────────────

    async fn run(&self, entry: Arc<JobEntry>) {
        loop {
            if entry.cancel.is_cancelled() {
                info!("Job {}: cancelled before next stage", entry.id);
                break;
            }
            if self.advance(&entry).await.is_none() {
                break;
            }
        }
        self.finish(&entry).await;
    }

    /// Runs the next pending stage. Returns `None` when no stage is left.
    async fn advance(&self, entry: &JobEntry) -> Option<StageName> {
        let (index, name, context) = {
            let mut job = entry.job();
            let index = job.next_pending()?;
            let record = &mut job.stages[index];
            record.status = StageStatus::Running;
            record.started_at = Some(Utc::now());
            let name = record.name;

            let context = StageContext {
                filename: job.source.filename.clone(),
                document: Arc::clone(&entry.document),
                prior: job
                    .completed_fragments()
                    .map(|(name, fragment)| (name, fragment.clone()))
                    .collect(),
            };
            (index, name, context)
        };

        let spec = self.stage_spec(name);
        entry.events.publish(
            EventDraft::stage(name, ProgressStatus::Running)
                .with_log(format!("Extracting {name} (budget {}s)", spec.timeout.as_secs())),
        );

        let on_retry = |attempt: u32, err: &ExtractionError| {
            entry.events.publish(
                EventDraft::stage(name, ProgressStatus::Running)
                    .with_log(format!("{name}: {err}; retrying (attempt {attempt})")),
            );
        };
        let Extraction { attempts, result } = self.client.extract(&spec, &context, &on_retry).await;

        let draft = {
            let mut job = entry.job();
            let record = &mut job.stages[index];
            record.attempts = attempts;
            record.finished_at = Some(Utc::now());

            let (log, payload) = match result {
                Ok(fragment) => {
                    let log = fragment.describe(name);
                    debug!("Job {}: {name} populated {:?}", entry.id, fragment.populated_fields());
                    let payload = serde_json::to_value(&fragment).ok();
                    record.status = StageStatus::Done;
                    record.partial = Some(fragment);
                    info!("Job {}: {name} done after {attempts} attempt(s): {log}", entry.id);
                    (log, payload)
                }
                Err(err) => {
                    warn!("Job {}: {name} failed after {attempts} attempt(s): {err}", entry.id);
                    record.status = StageStatus::Error;
                    record.error = Some(err.to_string());
                    (format!("{name} failed after {attempts} attempt(s): {err}"), None)
                }
            };

            let draft = EventDraft::stage(name, record.status.into()).with_log(log);
            match payload {
                Some(payload) => draft.with_payload(payload),
                None => draft,
            }
        };
        entry.events.publish(draft);

        Some(name)
    }

    /// Saves under the persist budget so a stalled store cannot hold back the
    /// terminal event.
    async fn persist(&self, record: &ParsedProfileRecord) -> anyhow::Result<()> {
        match tokio::time::timeout(self.settings.persist_timeout, self.store.save(record)).await {
            Ok(saved) => saved,
            Err(_) => anyhow::bail!(
                "profile store did not answer within {}s",
                self.settings.persist_timeout.as_secs()
            ),
        }
    }

    fn stage_spec(&self, name: StageName) -> StageSpec {
        self.settings
            .stages
            .iter()
            .find(|spec| spec.name == name)
            .cloned()
            .unwrap_or(StageSpec {
                name,
                timeout: DEFAULT_STAGE_TIMEOUT,
            })
    }

    async fn finish(&self, entry: &JobEntry) {
        let cancelled = entry.cancel.is_cancelled();

        let (outcome, record, status, reason) = {
            let mut job = entry.job();

            let (profile, provenance, assembly_error) = match assembler::assemble(&job) {
                Ok(assembly) => (assembly.profile, assembly.provenance, None),
                Err(err) => {
                    let message = err.to_string();
                    warn!("Job {}: {message}", entry.id);
                    (err.partial.profile, err.partial.provenance, Some(message))
                }
            };

            let failed_stages = job.failed_stages();
            let failed_core = self.settings.failed_core_stages(&failed_stages);
            let (status, reason) = if cancelled {
                (JobStatus::Failed, Some(CANCELLED.to_string()))
            } else if failed_core >= self.settings.core_failure_threshold.max(1) {
                let names: Vec<_> = failed_stages
                    .iter()
                    .filter(|stage| self.settings.core_stages.contains(*stage))
                    .map(StageName::as_str)
                    .collect();
                (JobStatus::Failed, Some(format!("core stages failed: {}", names.join(", "))))
            } else {
                (JobStatus::Completed, None)
            };

            job.status = status;
            job.finished_at = Some(Utc::now());
            job.failure_reason = reason.clone();

            let outcome = JobOutcome {
                profile,
                provenance,
                failed_stages,
                assembly_error,
            };
            job.outcome = Some(outcome.clone());
            let record = ParsedProfileRecord::from_outcome(&job, &outcome);
            (outcome, record, status, reason)
        };

        let persisted = match record {
            Ok(record) => self.persist(&record).await.map(|_| record.s3_key),
            Err(e) => Err(e),
        };
        match persisted {
            Ok(key) => info!("Job {}: persisted parsed profile ({key})", entry.id),
            Err(e) => {
                error!("Job {}: failed to persist parsed profile: {e:?}", entry.id);
                entry.events.publish(
                    EventDraft::new(PERSIST, ProgressStatus::Error)
                        .with_log(format!("Could not save the parsed profile: {e}")),
                );
            }
        }

        let terminal = match status {
            JobStatus::Completed => ProgressStatus::Completed,
            _ => ProgressStatus::Failed,
        };
        let log = match &reason {
            Some(reason) => format!("Parsing failed ({reason})"),
            None if outcome.failed_stages.is_empty() => "Parsing complete".to_string(),
            None => format!(
                "Parsing complete; {} stage(s) failed: {}",
                outcome.failed_stages.len(),
                outcome
                    .failed_stages
                    .iter()
                    .map(StageName::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        };

        let mut draft = EventDraft::new(FINALIZE, terminal).with_log(log);
        if let Ok(payload) = serde_json::to_value(&outcome) {
            draft = draft.with_payload(payload);
        }
        entry.events.publish(draft);

        info!(
            "Job {}: {} ({} failed stages)",
            entry.id,
            status.as_str(),
            outcome.failed_stages.len()
        );
    }
}
