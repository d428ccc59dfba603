//! Job registry, the only shared mutable state in the pipeline.
//!
//! The map itself sits behind an `RwLock`; each job has its own mutex, written
//! only by the sequencer task that owns it. Neither lock is held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::pipeline::events::ProgressPublisher;
use crate::pipeline::job::{Job, JobSnapshot};
use crate::pipeline::PipelineError;

/// Everything the pipeline keeps for one job.
#[derive(Debug)]
pub struct JobEntry {
    pub id: Uuid,
    job: Mutex<Job>,
    pub document: Arc<str>,
    pub events: ProgressPublisher,
    pub cancel: CancellationToken,
}

impl JobEntry {
    pub fn new(job: Job, document: Arc<str>, event_buffer: usize) -> Self {
        Self {
            id: job.id,
            events: ProgressPublisher::new(job.id, event_buffer),
            job: Mutex::new(job),
            document,
            cancel: CancellationToken::new(),
        }
    }

    pub fn job(&self) -> MutexGuard<'_, Job> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.job().snapshot()
    }

    fn expired(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        let job = self.job();
        job.status.is_terminal() && job.finished_at.is_some_and(|finished| finished + grace <= now)
    }
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, Arc<JobEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: Arc<JobEntry>) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.id, entry);
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<JobEntry>, PipelineError> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(PipelineError::NotFound(id))
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drops terminal jobs that finished at least `grace` before `now`.
    pub fn evict_expired(&self, now: DateTime<Utc>, grace: Duration) -> usize {
        let grace = chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::days(365));
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, entry| !entry.expired(now, grace));
        before - jobs.len()
    }

    /// Background eviction loop; runs until the process exits.
    pub async fn run_reaper(self: Arc<Self>, grace: Duration, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let evicted = self.evict_expired(Utc::now(), grace);
            if evicted > 0 {
                info!("Evicted {evicted} finished jobs ({} still tracked)", self.len());
            }
        }
    }
}
