//! Dependency probes, the startup check orchestrator and health endpoints.

pub mod handlers;
pub mod probe;
pub mod report;
pub mod startup;

pub use handlers::{HealthState, liveness_handler, readiness_handler, root_handler};
pub use probe::{FnProbe, HttpProbe, Probe, SharedProbe, probe_fn};
pub use report::{CheckResult, CheckStatus, HealthReport, HealthStatus};
pub use startup::{StartupCheckOrchestrator, StartupChecks, run_startup_checks};
