//! Remote control endpoint.
//!
//! Exposes asynchronous start/poll of a run to callers that cannot block:
//! `POST /run` kicks a run off on a background task and returns immediately,
//! `GET /status` reports `{running, output_dir}`.
use crate::config::Project;
use crate::runner::{Coordinator, RunState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("address parsing error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

struct ServerState {
    coordinator: Arc<Coordinator>,
    project: Project,
    status: Arc<RunState>,
}

fn app(project: Project, coordinator: Coordinator) -> Router {
    let status = Arc::new(RunState::default());
    let coordinator = Arc::new(coordinator.with_state(Arc::clone(&status)));
    let state = Arc::new(ServerState {
        coordinator,
        project,
        status,
    });

    Router::new()
        .route("/run", post(start_run))
        .route("/status", get(run_status))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Serves the remote control endpoint until the process exits.
pub async fn serve(port: u16, project: Project, coordinator: Coordinator) -> Result<(), ServerError> {
    let app = app(project, coordinator);

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    debug!("remote control endpoint listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Starts a run unless one is already in progress. The run itself executes
/// on a blocking task; this handler is the only place callers synchronize on
/// run completion, by polling `/status`.
async fn start_run(State(state): State<Arc<ServerState>>) -> Response {
    if !state.status.try_begin() {
        return (StatusCode::CONFLICT, "busy").into_response();
    }

    let coordinator = Arc::clone(&state.coordinator);
    let project = state.project.clone();
    let status = Arc::clone(&state.status);
    tokio::task::spawn_blocking(move || match coordinator.run(&project) {
        Ok(output_dir) => {
            info!("remote-triggered run finished: {}", output_dir.display());
        }
        Err(err) => {
            error!("remote-triggered run failed: {err}");
            status.mark_finished(None);
        }
    });

    (StatusCode::ACCEPTED, "accepted").into_response()
}

#[derive(Serialize)]
struct StatusBody {
    running: bool,
    output_dir: Option<PathBuf>,
}

async fn run_status(State(state): State<Arc<ServerState>>) -> Json<StatusBody> {
    let (running, output_dir) = state.status.snapshot();
    Json(StatusBody {
        running,
        output_dir,
    })
}
