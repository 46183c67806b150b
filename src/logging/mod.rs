//! Structured logging correlated with the active trace context.
//!
//! Every line carries the service identity plus the trace and request ids of
//! whatever request the emitting task is serving. Outside a request those ids
//! are `null`.

pub mod layer;
pub mod record;

#[cfg(test)]
pub(crate) mod testing;

use std::str::FromStr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::config::{LoggingConfig, ServiceIdentity};
use crate::error::AppError;

pub use layer::CorrelatedLogger;
pub use record::LogRecord;

/// Chatty dependencies held to `warn` unless `RUST_LOG` says otherwise.
const THIRD_PARTY_DIRECTIVES: &str = "hyper=warn,hyper_util=warn,reqwest=warn,h2=warn,tower_http=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            other => Err(AppError::InvalidConfig(format!(
                "unknown log format '{other}', expected json or text"
            ))),
        }
    }
}

/// Filter directives derived from config.
pub fn filter_directives(config: &LoggingConfig) -> String {
    if config.suppress_third_party {
        format!("{},{}", config.level, THIRD_PARTY_DIRECTIVES)
    } else {
        config.level.clone()
    }
}

/// Install the correlated logger as the global subscriber.
pub fn init_logging(config: &LoggingConfig, identity: Arc<ServiceIdentity>) -> Result<(), AppError> {
    let format = config.format.parse::<LogFormat>()?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    tracing_subscriber::registry()
        .with(filter)
        .with(CorrelatedLogger::stdout(identity, format))
        .try_init()
        .map_err(|e| AppError::Internal(anyhow::Error::new(e)))
}
