use std::convert::Infallible;
use std::path::Path as FsPath;
use std::time::Duration;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::document::UploadedFile;
use crate::errors::AppError;
use crate::models::parsed::ParsedProfileRecord;
use crate::pipeline::job::JobSnapshot;
use crate::state::AppState;

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub status_url: String,
    pub events_url: String,
}

/// POST /api/v1/jobs
/// Multipart upload; the résumé is expected in the `file` field.
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let (filename, data) = read_file_field(&mut multipart).await?;
    debug!("Received upload {filename} ({} bytes)", data.len());

    // The sequencer reads the document fully before returning, so the staged
    // copy only needs to outlive `start`.
    let staged = NamedTempFile::new().map_err(|e| AppError::Internal(e.into()))?;
    tokio::fs::write(staged.path(), &data)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    let job_id = state
        .sequencer
        .start(UploadedFile::new(staged.path(), filename))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            job_id,
            status_url: format!("/api/v1/jobs/{job_id}"),
            events_url: format!("/api/v1/jobs/{job_id}/events"),
        }),
    ))
}

async fn read_file_field(multipart: &mut Multipart) -> Result<(String, Bytes), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        // Keep only the final path component of whatever the client sent.
        let filename = field
            .file_name()
            .and_then(|name| FsPath::new(name).file_name())
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| AppError::Validation("The 'file' field must carry a filename".into()))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Could not read upload: {e}")))?;
        return Ok((filename, data));
    }
    Err(AppError::Validation("Multipart field 'file' is required".into()))
}

/// GET /api/v1/jobs/:id
pub async fn handle_job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobSnapshot>, AppError> {
    Ok(Json(state.sequencer.status(id)?))
}

/// DELETE /api/v1/jobs/:id
pub async fn handle_cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobSnapshot>), AppError> {
    let snapshot = state.sequencer.cancel(id)?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// GET /api/v1/jobs/:id/events
/// SSE feed: `event` is the status, `id` the sequence number, `data` the JSON event.
pub async fn handle_job_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let events = state.sequencer.subscribe(id)?;

    let stream = events.filter_map(|event| async move {
        match Event::default()
            .event(event.status.as_str())
            .id(event.sequence.to_string())
            .json_data(&event)
        {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                warn!("Job {}: dropping unserializable event {}: {e}", event.job_id, event.sequence);
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text("keep-alive")))
}

/// GET /api/v1/jobs/:id/profile
pub async fn handle_job_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ParsedProfileRecord>, AppError> {
    Ok(Json(find_profile(&state, id).await?))
}

/// The finished profile for `id`: from the live registry while the job is
/// tracked, otherwise from the store.
pub async fn find_profile(state: &AppState, id: Uuid) -> Result<ParsedProfileRecord, AppError> {
    if let Some(live) = live_profile(state, id) {
        return live;
    }

    state
        .sequencer
        .store()
        .load(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {id} not found")))
}

fn live_profile(state: &AppState, id: Uuid) -> Option<Result<ParsedProfileRecord, AppError>> {
    let entry = state.sequencer.registry().get(id).ok()?;
    let job = entry.job();
    if !job.status.is_terminal() {
        return Some(Err(AppError::Conflict(format!(
            "Job {id} is still {}",
            job.status.as_str()
        ))));
    }
    let outcome = job.outcome.as_ref()?;
    Some(ParsedProfileRecord::from_outcome(&job, outcome).map_err(AppError::from))
}
