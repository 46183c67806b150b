use std::collections::BTreeMap;

use garde::Validate;
use serde::{Deserialize, Serialize};

use super::build_info::BuildInfo;
use crate::trace::ids::{IdGenerator, short_name_for};

#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
pub struct AppConfig {
    #[garde(dive)]
    #[serde(default)]
    pub service: ServiceConfig,

    #[garde(dive)]
    #[serde(default)]
    pub server: ServerConfig,

    #[garde(dive)]
    #[serde(default)]
    pub logging: LoggingConfig,

    #[garde(dive)]
    #[serde(default)]
    pub startup: StartupConfig,

    #[garde(dive)]
    #[serde(default)]
    pub http_client: HttpClientConfig,
}

impl AppConfig {
    /// Freeze the process-wide identity used by logging and propagation.
    pub fn identity(&self, build: &BuildInfo) -> ServiceIdentity {
        ServiceIdentity {
            service: self.service.name.clone(),
            short_name: self
                .service
                .short_name
                .clone()
                .unwrap_or_else(|| short_name_for(&self.service.name)),
            version: build.version.clone(),
            environment: self.service.environment.clone(),
            deployment_id: self.service.deployment_id.clone(),
            git_commit: build.short_commit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServiceConfig {
    #[garde(length(min = 1, max = 64))]
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Tag embedded in minted ids; defaults to the first four characters of `name`.
    #[garde(skip)]
    #[serde(default)]
    pub short_name: Option<String>,

    #[garde(length(min = 1))]
    #[serde(default = "default_environment")]
    pub environment: String,

    #[garde(skip)]
    #[serde(default)]
    pub deployment_id: Option<String>,

    /// Let an inbound `X-Deployment-ID` replace the configured one.
    #[garde(skip)]
    #[serde(default)]
    pub trust_inbound_deployment_id: bool,
}

fn default_service_name() -> String {
    "trace-relay".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            short_name: None,
            environment: default_environment(),
            deployment_id: None,
            trust_inbound_deployment_id: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[garde(range(min = 1024, max = 65535))]
    pub port: u16,

    #[garde(length(min = 1), custom(validate_bind_address))]
    #[serde(default = "default_bind")]
    pub bind: String,

    #[garde(range(min = 1, max = 300))]
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64, // seconds

    #[garde(range(min = 1, max = 300))]
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind: default_bind(),
            shutdown_timeout: default_shutdown_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LoggingConfig {
    #[garde(length(min = 1))]
    #[serde(default = "default_log_level")]
    pub level: String, // trace, debug, info, warn, error

    #[garde(pattern(r"^(json|text)$"))]
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Clamp chatty HTTP stack crates to `warn`.
    #[garde(skip)]
    #[serde(default = "default_true")]
    pub suppress_third_party: bool,

    #[garde(skip)]
    #[serde(default = "default_true")]
    pub log_requests: bool,

    /// Paths that get trace headers but no start/finish log lines.
    #[garde(skip)]
    #[serde(default = "default_skip_paths")]
    pub skip_paths: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_skip_paths() -> Vec<String> {
    vec!["/health".to_string(), "/".to_string(), "/favicon.ico".to_string()]
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            suppress_third_party: true,
            log_requests: true,
            skip_paths: default_skip_paths(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct StartupConfig {
    #[garde(range(min = 1, max = 600_000))]
    #[serde(default = "default_per_check_timeout")]
    pub per_check_timeout_ms: u64,

    #[garde(range(min = 1, max = 3_600_000))]
    #[serde(default = "default_global_timeout")]
    pub global_timeout_ms: u64,

    /// Refuse to start when a required check fails. Defaults to true in production.
    #[garde(skip)]
    #[serde(default)]
    pub fail_on_error: Option<bool>,

    /// Check names whose failure only warns.
    #[garde(skip)]
    #[serde(default)]
    pub optional_checks: Vec<String>,

    /// Downstream services probed with `GET <url>` at boot, keyed by check name.
    #[garde(skip)]
    #[serde(default)]
    pub http_checks: BTreeMap<String, String>,
}

fn default_per_check_timeout() -> u64 {
    10_000
}

fn default_global_timeout() -> u64 {
    30_000
}

impl StartupConfig {
    pub fn fail_on_error(&self, environment: &str) -> bool {
        self.fail_on_error.unwrap_or(environment == "production")
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            per_check_timeout_ms: default_per_check_timeout(),
            global_timeout_ms: default_global_timeout(),
            fail_on_error: None,
            optional_checks: Vec::new(),
            http_checks: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct HttpClientConfig {
    #[garde(range(min = 1, max = 300))]
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,

    #[garde(skip)]
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_client_timeout() -> u64 {
    30
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_client_timeout(),
            base_url: None,
        }
    }
}

/// Read-only description of this process, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub service: String,
    pub short_name: String,
    pub version: String,
    pub environment: String,
    pub deployment_id: Option<String>,
    pub git_commit: String,
}

impl ServiceIdentity {
    pub fn id_generator(&self) -> IdGenerator {
        IdGenerator::new(&self.short_name)
    }

    /// Value of the `X-Served-By` response header.
    pub fn served_by(&self) -> String {
        format!("{}-{}", self.service, self.git_commit)
    }
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        AppConfig::default().identity(&BuildInfo::default())
    }
}

fn validate_bind_address(value: &str, _: &()) -> garde::Result {
    value
        .parse::<std::net::IpAddr>()
        .map(|_| ())
        .map_err(|_| garde::Error::new("Invalid IP address"))
}
