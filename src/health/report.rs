//! Results of a startup check run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Healthy,
    Unhealthy,
    Timeout,
}

/// Aggregate status: healthy only when every check is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Also the key in [`HealthReport::checks`], so not serialized.
    #[serde(skip)]
    pub name: String,
    pub status: CheckStatus,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    pub fn healthy(name: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Healthy,
            latency_ms,
            error: None,
        }
    }

    pub fn unhealthy(name: impl Into<String>, latency_ms: u64, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            name: name.into(),
            status: CheckStatus::Unhealthy,
            latency_ms,
            error: Some(if error.is_empty() {
                "check failed".to_string()
            } else {
                error
            }),
        }
    }

    pub fn timeout(name: impl Into<String>, latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Timeout,
            latency_ms,
            error: Some(error.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == CheckStatus::Healthy
    }
}

/// Snapshot of one orchestration run. Built fresh every time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: BTreeMap<String, CheckResult>,
    pub generated_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn from_results(results: impl IntoIterator<Item = CheckResult>) -> Self {
        let checks: BTreeMap<String, CheckResult> = results
            .into_iter()
            .map(|result| (result.name.clone(), result))
            .collect();
        let status = if checks.values().all(CheckResult::is_healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        Self {
            status,
            checks,
            generated_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Names of every check that did not come back healthy.
    pub fn failed_checks(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|(_, result)| !result.is_healthy())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
