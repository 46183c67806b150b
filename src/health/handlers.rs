use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Json, Response},
};
use serde::Serialize;
use tracing::debug;

use super::report::HealthReport;
use super::startup::{StartupCheckOrchestrator, StartupChecks};
use crate::config::ServiceIdentity;

/// State shared by the health endpoints.
#[derive(Clone)]
pub struct HealthState {
    identity: Arc<ServiceIdentity>,
    checks: Arc<StartupChecks>,
    orchestrator: StartupCheckOrchestrator,
    started_at: Instant,
}

impl HealthState {
    pub fn new(
        identity: Arc<ServiceIdentity>,
        checks: StartupChecks,
        orchestrator: StartupCheckOrchestrator,
    ) -> Self {
        Self {
            identity,
            checks: Arc::new(checks),
            orchestrator,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Body of `/health/ready`.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    #[serde(flatten)]
    pub report: HealthReport,
    pub service: String,
    pub version: String,
    pub git_commit: String,
    pub environment: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub status: &'static str,
}

/// Liveness probe at /health. Always `OK` while the process is serving.
pub async fn liveness_handler() -> Response<String> {
    let mut response = Response::new("OK".to_string());
    *response.status_mut() = StatusCode::OK;
    response
}

/// Readiness probe at /health/ready.
///
/// Runs every registered check fresh; 200 when all are healthy, 503 otherwise.
pub async fn readiness_handler(
    State(state): State<HealthState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let report = state.orchestrator.run(state.checks.probes()).await;
    debug!(status = ?report.status, checks = report.checks.len(), "Readiness check ran");

    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = ReadinessResponse {
        report,
        service: state.identity.service.clone(),
        version: state.identity.version.clone(),
        git_commit: state.identity.git_commit.clone(),
        environment: state.identity.environment.clone(),
        uptime_seconds: state.uptime_seconds(),
    };
    (status, Json(body))
}

/// Service banner at `/`.
pub async fn root_handler(State(state): State<HealthState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: state.identity.service.clone(),
        version: state.identity.version.clone(),
        status: "running",
    })
}
