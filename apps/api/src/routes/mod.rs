pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::chat::handlers as chat;
use crate::pipeline::handlers as jobs;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health::health_handler))
        // Parse jobs
        .route(
            "/api/v1/jobs",
            post(jobs::handle_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/v1/jobs/:id",
            get(jobs::handle_job_status).delete(jobs::handle_cancel_job),
        )
        .route("/api/v1/jobs/:id/events", get(jobs::handle_job_events))
        .route("/api/v1/jobs/:id/profile", get(jobs::handle_job_profile))
        // Follow-up questions over a finished profile
        .route("/api/v1/jobs/:id/chat", post(chat::handle_chat))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::config::Config;
    use crate::extraction::canned::{CannedBackend, CannedReply};
    use crate::extraction::{ExtractionClient, RetryPolicy};
    use crate::pipeline::registry::JobRegistry;
    use crate::pipeline::sequencer::StageSequencer;
    use crate::storage::memory::MemoryProfileStore;

    const BOUNDARY: &str = "cvparse-test-boundary";

    fn app_with(backend: CannedBackend) -> (Router, AppState) {
        let backend = Arc::new(backend);
        let config = Config::for_tests();
        let sequencer = StageSequencer::new(
            Arc::new(JobRegistry::new()),
            ExtractionClient::new(backend.clone(), RetryPolicy::default()),
            Arc::new(MemoryProfileStore::new()),
            config.pipeline_settings(),
        );
        let state = AppState {
            sequencer,
            llm: backend,
            config,
        };
        (build_router(state.clone()), state)
    }

    fn jane_backend() -> CannedBackend {
        CannedBackend::new()
            .reply("contact-info", CannedReply::text(r#"{"name": "Jane Roe"}"#))
            .reply("skills", CannedReply::text(r#"{"skills": ["Go", "SQL"]}"#))
            .reply("chat", CannedReply::text("Jane knows Go and SQL."))
    }

    fn multipart_upload(field: &str, filename: &str, contents: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             {contents}\r\n\
             --{BOUNDARY}--\r\n"
        );
        Request::post("/api/v1/jobs")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn upload_jane(app: &Router) -> Uuid {
        let response = app
            .clone()
            .oneshot(multipart_upload("file", "jane.txt", "Jane Roe\nGo, SQL"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        body["job_id"].as_str().unwrap().parse().unwrap()
    }

    async fn wait_until_terminal(state: &AppState, id: Uuid) {
        while !state.sequencer.status(id).unwrap().status.is_terminal() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app_with(CannedBackend::new());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["service"], "cvparse");
    }

    #[tokio::test]
    async fn test_upload_returns_job_urls_and_status_is_queryable() {
        let (app, state) = app_with(jane_backend());

        let response = app
            .clone()
            .oneshot(multipart_upload("file", "jane.txt", "Jane Roe\nGo, SQL"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        let id = body["job_id"].as_str().unwrap().to_string();
        assert_eq!(body["status_url"], format!("/api/v1/jobs/{id}"));
        assert_eq!(body["events_url"], format!("/api/v1/jobs/{id}/events"));

        wait_until_terminal(&state, id.parse().unwrap()).await;
        let response = app
            .oneshot(Request::get(format!("/api/v1/jobs/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot = json_body(response).await;
        assert_eq!(snapshot["status"], "completed");
        assert_eq!(snapshot["filename"], "jane.txt");
        assert_eq!(snapshot["stages"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_input() {
        let (app, state) = app_with(jane_backend());

        let empty = app.clone().oneshot(multipart_upload("file", "empty.txt", "")).await.unwrap();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(empty).await["error"]["code"], "VALIDATION_ERROR");

        let wrong_type = app
            .clone()
            .oneshot(multipart_upload("file", "photo.png", "pixels"))
            .await
            .unwrap();
        assert_eq!(wrong_type.status(), StatusCode::BAD_REQUEST);

        let wrong_field = app
            .oneshot(multipart_upload("attachment", "jane.txt", "Jane Roe"))
            .await
            .unwrap();
        assert_eq!(wrong_field.status(), StatusCode::BAD_REQUEST);

        assert_eq!(state.sequencer.registry().len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let (app, _) = app_with(CannedBackend::new());
        let response = app
            .oneshot(
                Request::get(format!("/api/v1/jobs/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_profile_is_409_while_running() {
        let (app, _) = app_with(CannedBackend::new().reply("contact-info", CannedReply::Hang));
        let id = upload_jane(&app).await;

        let response = app
            .oneshot(
                Request::get(format!("/api/v1/jobs/{id}/profile"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_profile_and_chat_after_completion() {
        let (app, state) = app_with(jane_backend());
        let id = upload_jane(&app).await;
        wait_until_terminal(&state, id).await;

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/v1/jobs/{id}/profile"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let record = json_body(response).await;
        assert_eq!(record["profile"]["name"], "Jane Roe");
        assert_eq!(record["profile"]["skills"], json!(["Go", "SQL"]));
        assert_eq!(record["provenance"]["skills"], "skills");

        let chat = Request::post(format!("/api/v1/jobs/{id}/chat"))
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"question": "What does Jane know?", "history": []}).to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(chat).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["answer"], "Jane knows Go and SQL.");

        let blank = Request::post(format!("/api/v1/jobs/{id}/chat"))
            .header("content-type", "application/json")
            .body(Body::from(json!({"question": "  "}).to_string()))
            .unwrap();
        let response = app.oneshot(blank).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_events_after_completion_yield_terminal_event_only() {
        let (app, state) = app_with(jane_backend());
        let id = upload_jane(&app).await;
        wait_until_terminal(&state, id).await;

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/v1/jobs/{id}/events"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert_eq!(text.matches("event: completed").count(), 1);
        assert!(!text.contains("event: running"));
        assert!(text.contains("\"stage\":\"finalize\""));
    }

    #[tokio::test]
    async fn test_cancel_is_accepted() {
        let (app, state) = app_with(CannedBackend::new().reply("contact-info", CannedReply::Hang));
        let id = upload_jane(&app).await;

        let response = app
            .oneshot(
                Request::delete(format!("/api/v1/jobs/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(state.sequencer.registry().get(id).unwrap().cancel.is_cancelled());
    }
}
