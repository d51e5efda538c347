use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use formlens_core::pipeline::HybridPipeline;
use formlens_worker::settings::{DetectionArgs, StorageArgs};
use formlens_worker::{init_tracing, ProcessError, ProcessOptions, ProcessOutcome, Processor};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Formlens worker - processes queued documents through the hybrid detection pipeline"
)]
struct Args {
    /// Address the task endpoint listens on
    #[arg(long, env = "FORMLENS_LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    listen_addr: String,

    /// Enable debug logging
    #[arg(long, env = "FORMLENS_DEBUG", default_value_t = false)]
    debug: bool,

    #[command(flatten)]
    detection: DetectionArgs,

    #[command(flatten)]
    storage: StorageArgs,
}

#[derive(Clone)]
struct AppState {
    processor: Arc<Processor>,
}

/// Task payload delivered by the queue.
#[derive(Debug, Deserialize)]
struct ProcessRequest {
    document_id: String,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    vision: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let store = Arc::new(args.storage.open_store()?);
    let storage = args.storage.storage();
    let pipeline = Arc::new(HybridPipeline::new(args.detection.pipeline_config()));
    let processor = Arc::new(Processor::new(store, storage, pipeline));

    let state = AppState { processor };
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/process", post(process_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&args.listen_addr).await?;
    tracing::info!(
        "formlens worker listening on {}",
        listener.local_addr()?
    );
    axum::serve(listener, app).await?;
    Ok(())
}

#[tracing::instrument(skip_all)]
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        vision: state.processor.pipeline_has_vision(),
    })
}

#[tracing::instrument(skip_all, fields(document_id = %request.document_id))]
async fn process_handler(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<ProcessOutcome>, ProcessError> {
    let outcome = state
        .processor
        .process(
            &request.document_id,
            ProcessOptions {
                force: request.force,
            },
        )
        .await?;
    Ok(Json(outcome))
}
