pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod server;
pub mod trace;

pub use config::*;
pub use error::*;
pub use server::*;

use std::panic;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use crate::health::{StartupChecks, run_startup_checks};
use crate::http::TracedHttpClient;

/// Main server entry point for library usage
pub async fn run_server() -> Result<()> {
    let cli = Cli::parse();
    let app_config = config::load_config(&cli)?;
    let identity = Arc::new(app_config.identity(&BuildInfo::from_env()));

    logging::init_logging(&app_config.logging, identity.clone())?;

    // Handler panics are turned into 500s by the middleware; this only makes
    // sure every panic is logged in the structured format.
    panic::set_hook(Box::new(|panic_info| {
        ::tracing::error!(panic = %panic_info, "Panic occurred");
    }));

    ::tracing::info!(
        service = %identity.service,
        version = %identity.version,
        environment = %identity.environment,
        git_commit = %identity.git_commit,
        "Service starting up"
    );

    let client = TracedHttpClient::new(&identity, &app_config.http_client)?;
    let checks = StartupChecks::new().with_http_checks(&app_config.startup, &client);
    let report = run_startup_checks(&identity, &app_config.startup, &checks).await?;

    if cli.check_only {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    server::start_server(app_config, identity, checks).await
}
