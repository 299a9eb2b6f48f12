//! HTTP front end: `POST /` with a task document runs it and answers with the
//! task report.

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::post,
};
use fanfetch_engine::{FinalizerRegistry, PluginRegistry, PluginSpec, TaskReport, TaskSpec, WorkerPool, run_task};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Everything a request handler needs to run a task.
#[derive(Clone)]
pub struct TaskService {
    pool: Arc<WorkerPool>,
    plugins: Arc<PluginRegistry>,
    finalizers: Arc<FinalizerRegistry>,
    default_plugins: Vec<PluginSpec>,
}

impl TaskService {
    pub fn new(pool: Arc<WorkerPool>, default_plugins: Vec<PluginSpec>) -> Self {
        Self {
            pool,
            plugins: Arc::new(PluginRegistry::with_builtins()),
            finalizers: Arc::new(FinalizerRegistry::with_builtins()),
            default_plugins,
        }
    }

    /// Runs `spec`, filling in the default plugin chain when it has none.
    pub async fn run(&self, mut spec: TaskSpec) -> TaskReport {
        if spec.plugins.is_empty() {
            spec.plugins = self.default_plugins.clone();
        }
        let outcome = run_task(spec, self.pool.clone(), None, &self.plugins, &self.finalizers).await;
        outcome.report()
    }
}

pub fn router(service: TaskService) -> Router {
    Router::new().route("/", post(handle_task)).with_state(service)
}

async fn handle_task(State(service): State<TaskService>, body: Bytes) -> Result<Json<TaskReport>, (StatusCode, String)> {
    let spec: TaskSpec = serde_json::from_slice(&body).map_err(|error| {
        warn!(error = %error, "rejecting malformed task");
        (StatusCode::BAD_REQUEST, format!("malformed task: {error}"))
    })?;
    let report = service.run(spec).await;
    info!(envs = report.envs.len(), errors = report.errors.len(), "task served");
    Ok(Json(report))
}

/// Binds `address` and serves until `shutdown` resolves.
pub async fn serve<F>(address: SocketAddr, service: TaskService, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(address).await?;
    info!(address = %listener.local_addr()?, "task server listening");
    axum::serve(listener, router(service)).with_graceful_shutdown(shutdown).await?;
    Ok(())
}
