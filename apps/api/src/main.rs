mod chat;
mod config;
mod db;
mod document;
mod errors;
mod extraction;
mod llm_client;
mod models;
mod pipeline;
mod routes;
mod state;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, LlmBackendKind};
use crate::db::create_pool;
use crate::extraction::ExtractionClient;
use crate::llm_client::cli::ClaudeCliBackend;
use crate::llm_client::{LlmBackend, LlmClient};
use crate::pipeline::registry::JobRegistry;
use crate::pipeline::sequencer::StageSequencer;
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::PgProfileStore;

/// How often finished jobs past their grace period are dropped from memory.
const REAPER_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cvparse v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url).await?;

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized");

    let llm = build_llm_backend(&config)?;
    info!("LLM backend initialized ({}, model: {})", llm.name(), config.model());

    let registry = Arc::new(JobRegistry::new());
    let sequencer = StageSequencer::new(
        Arc::clone(&registry),
        ExtractionClient::new(Arc::clone(&llm), config.retry_policy()),
        Arc::new(PgProfileStore::new(db, s3, config.s3_bucket.clone())),
        config.pipeline_settings(),
    );

    tokio::spawn(registry.run_reaper(config.job_grace, REAPER_INTERVAL));

    let state = AppState {
        sequencer,
        llm,
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_llm_backend(config: &Config) -> Result<Arc<dyn LlmBackend>> {
    match config.llm_backend {
        LlmBackendKind::Anthropic => {
            let api_key = config
                .anthropic_api_key
                .clone()
                .context("ANTHROPIC_API_KEY is required for the anthropic backend")?;
            // The per-stage budget is enforced above this; the HTTP timeout is a backstop.
            let longest_stage = config
                .pipeline_settings()
                .stages
                .iter()
                .map(|stage| stage.timeout)
                .max()
                .unwrap_or(config.stage_timeout);
            let client = LlmClient::new(api_key, config.model(), longest_stage + Duration::from_secs(5))?;
            Ok(Arc::new(client))
        }
        LlmBackendKind::ClaudeCli => Ok(Arc::new(ClaudeCliBackend::new(
            config.claude_cli_path.clone(),
            config.model(),
        ))),
    }
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "cvparse-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
