//! The structured record behind every emitted log line.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::Level;

use crate::config::ServiceIdentity;
use crate::trace::scope;

/// Keys owned by the record itself; extra fields with these names are renamed.
const RESERVED_KEYS: &[&str] = &[
    "timestamp",
    "level",
    "service",
    "version",
    "environment",
    "git_commit",
    "trace_id",
    "request_id",
    "parent_span_id",
    "deployment_id",
    "logger",
    "message",
];

/// One log line, built fresh per call and never modified after emission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub level: &'static str,
    pub service: String,
    pub version: String,
    pub environment: String,
    pub git_commit: String,
    pub trace_id: Option<String>,
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    pub message: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl LogRecord {
    /// Build a record, merging in whatever trace context the running task has.
    pub fn capture(
        identity: &ServiceIdentity,
        level: Level,
        logger: Option<&str>,
        message: impl Into<String>,
        extra_fields: Map<String, Value>,
    ) -> Self {
        let context = scope::current();
        let fields = extra_fields
            .into_iter()
            .map(|(key, value)| {
                if RESERVED_KEYS.contains(&key.as_str()) {
                    (format!("field_{key}"), value)
                } else {
                    (key, value)
                }
            })
            .collect();

        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level: level.as_str(),
            service: identity.service.clone(),
            version: identity.version.clone(),
            environment: identity.environment.clone(),
            git_commit: identity.git_commit.clone(),
            trace_id: context.as_ref().map(|c| c.trace_id().to_string()),
            request_id: context.as_ref().map(|c| c.request_id().to_string()),
            parent_span_id: context
                .as_ref()
                .and_then(|c| c.parent_span_id())
                .map(str::to_string),
            deployment_id: context
                .as_ref()
                .and_then(|c| c.deployment_id())
                .map(str::to_string)
                .or_else(|| identity.deployment_id.clone()),
            logger: logger.map(str::to_string),
            message: message.into(),
            fields,
        }
    }

    /// One JSON object terminated by a newline.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Human-readable line for local development.
    pub fn to_text_line(&self) -> String {
        let mut line = format!(
            "{} [{}] {} - {}",
            self.timestamp, self.level, self.service, self.message
        );
        for (key, value) in &self.fields {
            match value {
                Value::String(s) => line.push_str(&format!(" {key}={s}")),
                other => line.push_str(&format!(" {key}={other}")),
            }
        }
        if let Some(trace_id) = &self.trace_id {
            line.push_str(&format!(" | trace_id={trace_id}"));
        }
        line.push('\n');
        line
    }
}
