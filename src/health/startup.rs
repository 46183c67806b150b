//! Concurrent startup checks with per-check and global deadlines.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::probe::{HttpProbe, Probe, SharedProbe};
use super::report::{CheckResult, HealthReport};
use crate::config::{ServiceIdentity, StartupConfig};
use crate::error::AppError;
use crate::http::TracedHttpClient;
use crate::trace::propagate;

/// Stand-in deadline when the global timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Runs a set of probes concurrently and folds the outcomes into a report.
///
/// A probe that outlives `per_check_timeout` is cancelled and recorded as a
/// timeout without holding up its siblings. When `global_timeout` elapses
/// every unfinished probe is cancelled and recorded as a timeout. Errors and
/// panics become `unhealthy` results; the run itself never fails.
#[derive(Debug, Clone, Copy)]
pub struct StartupCheckOrchestrator {
    per_check_timeout: Duration,
    global_timeout: Duration,
}

impl StartupCheckOrchestrator {
    pub fn new(per_check_timeout: Duration, global_timeout: Duration) -> Self {
        Self {
            per_check_timeout,
            global_timeout,
        }
    }

    pub fn from_config(config: &StartupConfig) -> Self {
        Self::new(
            Duration::from_millis(config.per_check_timeout_ms),
            Duration::from_millis(config.global_timeout_ms),
        )
    }

    pub async fn run(&self, checks: &BTreeMap<String, SharedProbe>) -> HealthReport {
        let started = Instant::now();
        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(self.global_timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);

        let mut tasks = JoinSet::new();
        for (name, probe) in checks {
            // Checks run while serving a request stay on that request's trace.
            tasks.spawn(propagate(run_check(
                name.clone(),
                Arc::clone(probe),
                self.per_check_timeout,
            )));
        }

        let mut results: BTreeMap<String, CheckResult> = BTreeMap::new();
        let mut global_timeout_hit = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(result))) => {
                    results.insert(result.name.clone(), result);
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "Startup check task ended abnormally");
                }
                Ok(None) => break,
                Err(_) => {
                    global_timeout_hit = true;
                    break;
                }
            }
        }
        // Cancels anything still running.
        drop(tasks);

        let elapsed_ms = elapsed_ms(started);
        for name in checks.keys() {
            if results.contains_key(name) {
                continue;
            }
            let result = if global_timeout_hit {
                CheckResult::timeout(
                    name.clone(),
                    elapsed_ms,
                    format!(
                        "global timeout of {}ms exceeded",
                        self.global_timeout.as_millis()
                    ),
                )
            } else {
                CheckResult::unhealthy(name.clone(), elapsed_ms, "check task failed")
            };
            results.insert(name.clone(), result);
        }

        HealthReport::from_results(results.into_values())
    }
}

async fn run_check(name: String, probe: SharedProbe, timeout: Duration) -> CheckResult {
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, AssertUnwindSafe(probe.check()).catch_unwind()).await;
    let latency_ms = elapsed_ms(started);

    match outcome {
        Ok(Ok(Ok(()))) => CheckResult::healthy(name, latency_ms),
        Ok(Ok(Err(e))) => CheckResult::unhealthy(name, latency_ms, format!("{e:#}")),
        Ok(Err(panic)) => CheckResult::unhealthy(name, latency_ms, panic_message(&*panic)),
        Err(_) => CheckResult::timeout(
            name,
            latency_ms,
            format!("check timed out after {}ms", timeout.as_millis()),
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("probe panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("probe panicked: {message}")
    } else {
        "probe panicked".to_string()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// The probes a service runs before accepting traffic.
///
/// Failures of optional checks are reported but never block startup.
#[derive(Clone, Default)]
pub struct StartupChecks {
    probes: BTreeMap<String, SharedProbe>,
    optional: BTreeSet<String>,
}

impl StartupChecks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a required check. Re-using a name replaces the earlier probe.
    pub fn add_check(mut self, name: impl Into<String>, probe: impl Probe + 'static) -> Self {
        let name = name.into();
        self.optional.remove(&name);
        self.probes.insert(name, Arc::new(probe));
        self
    }

    pub fn add_optional_check(mut self, name: impl Into<String>, probe: impl Probe + 'static) -> Self {
        let name = name.into();
        self.optional.insert(name.clone());
        self.probes.insert(name, Arc::new(probe));
        self
    }

    /// Register an [`HttpProbe`] for every `startup.http_checks` entry.
    pub fn with_http_checks(mut self, config: &StartupConfig, client: &TracedHttpClient) -> Self {
        for (name, url) in &config.http_checks {
            let probe = HttpProbe::new(client.clone(), url.clone());
            self = if config.optional_checks.contains(name) {
                self.add_optional_check(name.clone(), probe)
            } else {
                self.add_check(name.clone(), probe)
            };
        }
        self
    }

    pub fn probes(&self) -> &BTreeMap<String, SharedProbe> {
        &self.probes
    }

    pub fn is_optional(&self, name: &str) -> bool {
        self.optional.contains(name)
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

/// Run the startup checks and decide whether the service may start.
///
/// Returns [`AppError::StartupChecksFailed`] only when a required check
/// failed and `fail_on_error` is in effect for this environment.
pub async fn run_startup_checks(
    identity: &ServiceIdentity,
    config: &StartupConfig,
    checks: &StartupChecks,
) -> Result<HealthReport, AppError> {
    info!(
        service = %identity.service,
        version = %identity.version,
        environment = %identity.environment,
        deployment_id = identity.deployment_id.as_deref().unwrap_or("-"),
        git_commit = %identity.git_commit,
        checks = checks.len(),
        "Running startup checks"
    );

    for name in &config.optional_checks {
        if !checks.probes().contains_key(name) {
            warn!(check = %name, "Optional check is configured but was never registered");
        }
    }

    if checks.is_empty() {
        info!("No startup checks registered");
        return Ok(HealthReport::from_results(Vec::new()));
    }

    let report = StartupCheckOrchestrator::from_config(config)
        .run(checks.probes())
        .await;

    let mut failed_required = Vec::new();
    for (name, result) in &report.checks {
        let error = result.error.as_deref().unwrap_or("");
        if result.is_healthy() {
            info!(check = %name, latency_ms = result.latency_ms, "Startup check passed");
        } else if checks.is_optional(name) {
            warn!(
                check = %name,
                status = ?result.status,
                latency_ms = result.latency_ms,
                error,
                "Optional startup check failed"
            );
        } else {
            error!(
                check = %name,
                status = ?result.status,
                latency_ms = result.latency_ms,
                error,
                "Startup check failed"
            );
            failed_required.push(name.clone());
        }
    }

    let passed = report.checks.values().filter(|r| r.is_healthy()).count();
    info!(
        passed,
        total = report.checks.len(),
        "Startup checks finished"
    );

    if !failed_required.is_empty() {
        if config.fail_on_error(&identity.environment) {
            return Err(AppError::StartupChecksFailed {
                failed: failed_required,
            });
        }
        warn!(
            failed = ?failed_required,
            "Continuing despite failed startup checks"
        );
    }

    Ok(report)
}
