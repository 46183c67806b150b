use std::path::PathBuf;

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use garde::Validate;

use super::AppConfig;
use crate::error::AppError;
use crate::trace::ids::is_header_safe;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "trace-relay", version, about = "Trace-correlated service runtime")]
pub struct Cli {
    /// Path to configuration file (replaces config/default.toml and config/<env>.toml)
    #[arg(long, env = "APP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Server port
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Environment name
    #[arg(long, env = "ENVIRONMENT")]
    pub environment: Option<String>,

    /// Log level filter
    #[arg(long)]
    pub log_level: Option<String>,

    /// Run startup checks, print the report and exit
    #[arg(long)]
    pub check_only: bool,
}

/// Load configuration: defaults, config files, `APP_` env vars, then CLI flags.
pub fn load_config(cli: &Cli) -> Result<AppConfig, AppError> {
    let env_name = cli.environment.clone().unwrap_or_else(|| {
        std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
    });

    let mut figment = Figment::new()
        // 1. Embedded defaults (lowest priority)
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Serialized::default("service.environment", &env_name));

    // 2. Config files
    figment = match &cli.config {
        Some(path) => figment.merge(Toml::file(path)),
        None => figment
            .merge(Toml::file("config/default.toml"))
            .merge(Toml::file(format!("config/{env_name}.toml"))),
    };

    // 3. Environment variables with APP_ prefix
    figment = figment.merge(Env::prefixed("APP_").split("__"));

    // 4. CLI arguments (highest priority)
    if let Some(environment) = &cli.environment {
        figment = figment.merge(Serialized::default("service.environment", environment));
    }
    if let Some(port) = cli.port {
        figment = figment.merge(Serialized::default("server.port", port));
    }
    if let Some(level) = &cli.log_level {
        figment = figment.merge(Serialized::default("logging.level", level));
    }

    let config: AppConfig = figment.extract()?;
    validate_config(&config)?;
    Ok(config)
}

/// Field rules via garde plus the cross-field checks garde cannot express.
pub fn validate_config(config: &AppConfig) -> Result<(), AppError> {
    config.validate()?;

    for (field, value) in [
        ("service.short_name", &config.service.short_name),
        ("service.deployment_id", &config.service.deployment_id),
    ] {
        if let Some(value) = value {
            if !is_header_safe(value) {
                return Err(AppError::InvalidConfig(format!(
                    "{field}: must be 1-128 visible ASCII characters"
                )));
            }
        }
    }

    Ok(())
}
