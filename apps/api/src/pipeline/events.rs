//! Progress publisher: one ordered event feed per job, one subscriber at a time.
//!
//! Sequence numbers start at 1 and are assigned under the publisher lock, so they
//! are gapless and strictly increasing in publication order. While nobody is
//! attached (or the attached subscriber has gone away) events are kept in a
//! bounded buffer that the next subscriber drains first. Once the terminal event
//! is published the feed is closed; later subscribers receive only that event.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::pipeline::job::StageStatus;
use crate::pipeline::stages::StageName;

/// Stage label for job-level events emitted before the first stage.
pub const INITIALIZE: &str = "initialize";
/// Stage label for the terminal event.
pub const FINALIZE: &str = "finalize";
/// Stage label for the notice that a cancel was requested.
pub const CANCEL: &str = "cancel";
/// Stage label for storage problems reported before the terminal event.
pub const PERSIST: &str = "persist";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Running,
    Done,
    Error,
    Completed,
    Failed,
}

impl ProgressStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Running => "running",
            ProgressStatus::Done => "done",
            ProgressStatus::Error => "error",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Failed => "failed",
        }
    }
}

impl From<StageStatus> for ProgressStatus {
    fn from(status: StageStatus) -> Self {
        match status {
            StageStatus::Pending | StageStatus::Running => ProgressStatus::Running,
            StageStatus::Done => ProgressStatus::Done,
            StageStatus::Error => ProgressStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub sequence: u64,
    pub stage: String,
    pub status: ProgressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// An event before the publisher stamps it with a sequence number.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub stage: String,
    pub status: ProgressStatus,
    pub payload: Option<Value>,
    pub log: Option<String>,
}

impl EventDraft {
    pub fn stage(stage: StageName, status: ProgressStatus) -> Self {
        Self::new(stage.as_str(), status)
    }

    pub fn new(stage: &str, status: ProgressStatus) -> Self {
        Self {
            stage: stage.to_string(),
            status,
            payload: None,
            log: None,
        }
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

pub type ProgressStream = BoxStream<'static, ProgressEvent>;

#[derive(Debug)]
struct FeedState {
    next_sequence: u64,
    buffer: VecDeque<ProgressEvent>,
    subscriber: Option<mpsc::UnboundedSender<ProgressEvent>>,
    terminal: Option<ProgressEvent>,
}

#[derive(Debug)]
pub struct ProgressPublisher {
    job_id: Uuid,
    capacity: usize,
    state: Mutex<FeedState>,
}

impl ProgressPublisher {
    pub fn new(job_id: Uuid, capacity: usize) -> Self {
        Self {
            job_id,
            capacity: capacity.max(1),
            state: Mutex::new(FeedState {
                next_sequence: 1,
                buffer: VecDeque::new(),
                subscriber: None,
                terminal: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stamps and delivers an event. Returns the assigned sequence number, or
    /// `None` if the feed already closed.
    pub fn publish(&self, draft: EventDraft) -> Option<u64> {
        let mut state = self.state();
        if state.terminal.is_some() {
            warn!("Job {}: dropping '{}' event published after terminal event", self.job_id, draft.stage);
            return None;
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let event = ProgressEvent {
            job_id: self.job_id,
            sequence,
            stage: draft.stage,
            status: draft.status,
            payload: draft.payload,
            log: draft.log,
            timestamp: Utc::now(),
        };
        let terminal = event.status.is_terminal();
        if terminal {
            state.terminal = Some(event.clone());
        }

        let undelivered = match state.subscriber.as_ref() {
            Some(tx) => tx.send(event).err().map(|failed| failed.0),
            None => Some(event),
        };

        if let Some(event) = undelivered {
            if state.subscriber.take().is_some() {
                debug!("Job {}: subscriber went away; buffering", self.job_id);
            }
            if !terminal {
                state.buffer.push_back(event);
                while state.buffer.len() > self.capacity {
                    state.buffer.pop_front();
                }
            }
        }

        if terminal {
            // Dropping the sender ends the subscriber's stream after this event.
            state.subscriber = None;
            state.buffer.clear();
        }

        Some(sequence)
    }

    /// Attaches a new subscriber, replacing any previous one.
    pub fn subscribe(&self) -> ProgressStream {
        let mut state = self.state();

        if let Some(terminal) = state.terminal.clone() {
            return stream::iter([terminal]).boxed();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        for event in state.buffer.drain(..) {
            // The receiver is alive in this scope, so this cannot fail.
            let _ = tx.send(event);
        }
        if state.subscriber.replace(tx).is_some() {
            debug!("Job {}: replacing previous subscriber", self.job_id);
        }
        drop(state);

        async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        }
        .boxed()
    }

    pub fn is_closed(&self) -> bool {
        self.state().terminal.is_some()
    }

    pub fn last_sequence(&self) -> u64 {
        self.state().next_sequence - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher(capacity: usize) -> ProgressPublisher {
        ProgressPublisher::new(Uuid::new_v4(), capacity)
    }

    fn running(stage: StageName) -> EventDraft {
        EventDraft::stage(stage, ProgressStatus::Running)
    }

    fn terminal() -> EventDraft {
        EventDraft::new(FINALIZE, ProgressStatus::Completed)
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_gapless_from_one() {
        let publisher = publisher(16);
        let stream = publisher.subscribe();
        for stage in StageName::ALL {
            publisher.publish(running(stage));
        }
        publisher.publish(terminal());

        let events: Vec<_> = stream.collect().await;
        let sequences: Vec<_> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (1..=7).collect::<Vec<u64>>());
        assert!(events.last().unwrap().status.is_terminal());
    }

    #[tokio::test]
    async fn test_late_subscriber_receives_buffered_events() {
        let publisher = publisher(16);
        publisher.publish(running(StageName::ContactInfo));
        publisher.publish(running(StageName::Skills));

        let stream = publisher.subscribe();
        publisher.publish(terminal());

        let stages: Vec<_> = stream.map(|e| e.stage).collect().await;
        assert_eq!(stages, vec!["contact-info", "skills", FINALIZE]);
    }

    #[tokio::test]
    async fn test_buffer_keeps_only_most_recent_events() {
        let publisher = publisher(2);
        for stage in StageName::ALL {
            publisher.publish(running(stage));
        }
        let stream = publisher.subscribe();
        publisher.publish(terminal());

        let sequences: Vec<_> = stream.map(|e| e.sequence).collect().await;
        assert_eq!(sequences, vec![5, 6, 7]);
    }

    #[tokio::test]
    async fn test_subscribe_after_terminal_yields_only_terminal_event() {
        let publisher = publisher(16);
        publisher.publish(running(StageName::ContactInfo));
        publisher.publish(terminal());

        let events: Vec<_> = publisher.subscribe().collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, FINALIZE);
        assert_eq!(events[0].sequence, 2);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_falls_back_to_buffering() {
        let publisher = publisher(16);
        let first = publisher.subscribe();
        publisher.publish(running(StageName::ContactInfo));
        drop(first);

        publisher.publish(running(StageName::Skills));
        let second = publisher.subscribe();
        publisher.publish(terminal());

        let events: Vec<_> = second.collect().await;
        let sequences: Vec<_> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_new_subscriber_replaces_previous_one() {
        let publisher = publisher(16);
        let first = publisher.subscribe();
        let second = publisher.subscribe();
        publisher.publish(running(StageName::ContactInfo));
        publisher.publish(terminal());

        let first_events: Vec<_> = first.collect().await;
        let second_events: Vec<_> = second.collect().await;
        assert!(first_events.is_empty());
        assert_eq!(second_events.len(), 2);
    }

    #[test]
    fn test_publish_after_terminal_is_rejected() {
        let publisher = publisher(16);
        assert_eq!(publisher.publish(terminal()), Some(1));
        assert_eq!(publisher.publish(running(StageName::Skills)), None);
        assert_eq!(publisher.last_sequence(), 1);
        assert!(publisher.is_closed());
    }
}
