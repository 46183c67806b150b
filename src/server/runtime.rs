use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{Router, middleware::from_fn_with_state, routing::get};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

use crate::config::{AppConfig, ServiceIdentity};
use crate::error::AppError;
use crate::health::{
    HealthState, StartupCheckOrchestrator, StartupChecks, liveness_handler, readiness_handler,
    root_handler,
};
use crate::middleware::{TracingState, trace_requests};

/// Bind the configured address and serve until SIGINT/SIGTERM.
///
/// In-flight requests get `server.shutdown_timeout` seconds to finish once a
/// signal arrives.
pub async fn start_server(
    config: AppConfig,
    identity: Arc<ServiceIdentity>,
    checks: StartupChecks,
) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
        AppError::Server(format!(
            "Failed to bind to {bind_addr}: {e}. Is another process using this port?"
        ))
    })?;
    info!(address = %bind_addr, service = %identity.service, "Server listening");

    let app = create_router(&config, identity, checks);
    serve(
        listener,
        app,
        Duration::from_secs(config.server.shutdown_timeout),
        shutdown_signal(),
    )
    .await
}

/// Serve `app` until `shutdown` resolves, then drain for at most `drain_timeout`.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    drain_timeout: Duration,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let stop = Arc::new(Notify::new());
    let graceful = {
        let stop = stop.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.notified().await })
            .into_future()
    };
    tokio::pin!(graceful);

    tokio::select! {
        result = &mut graceful => result?,
        () = shutdown => {
            stop.notify_one();
            match tokio::time::timeout(drain_timeout, &mut graceful).await {
                Ok(result) => result?,
                Err(_) => warn!(
                    timeout_secs = drain_timeout.as_secs(),
                    "Graceful shutdown timed out, dropping remaining connections"
                ),
            }
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Routes plus the middleware stack.
///
/// The trace middleware wraps the request timeout so timed-out requests
/// still carry trace headers.
#[allow(deprecated)]
pub fn create_router(
    config: &AppConfig,
    identity: Arc<ServiceIdentity>,
    checks: StartupChecks,
) -> Router {
    let health = HealthState::new(
        identity.clone(),
        checks,
        StartupCheckOrchestrator::from_config(&config.startup),
    );
    let tracing_state = TracingState::new(identity, &config.logging)
        .trust_inbound_deployment_id(config.service.trust_inbound_deployment_id);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(health)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(from_fn_with_state(tracing_state, trace_requests))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, starting graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::probe_fn;
    use crate::trace::{SERVED_BY_HEADER, TRACE_ID_HEADER};
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    fn router(checks: StartupChecks) -> Router {
        let config = AppConfig::default();
        create_router(&config, Arc::new(ServiceIdentity::default()), checks)
    }

    #[tokio::test]
    async fn test_health_routes_carry_trace_headers() {
        let app = router(StartupChecks::new());
        let request = Request::builder()
            .uri("/health")
            .header(TRACE_ID_HEADER, "t-live")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[TRACE_ID_HEADER], "t-live");
        assert!(response.headers().contains_key(SERVED_BY_HEADER));
    }

    #[tokio::test]
    async fn test_readiness_route_reports_failures() {
        let checks = StartupChecks::new()
            .add_check("db", probe_fn(|| async { Err(anyhow::anyhow!("refused")) }));
        let app = router(checks);

        let request = Request::builder()
            .uri("/health/ready")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404_with_trace_headers() {
        let app = router(StartupChecks::new());
        let request = Request::builder().uri("/nope").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key(TRACE_ID_HEADER));
    }

    #[tokio::test]
    async fn test_readiness_checks_inherit_request_trace() {
        use crate::config::HttpClientConfig;
        use crate::health::HttpProbe;
        use crate::http::TracedHttpClient;
        use axum::http::HeaderMap;

        let upstream = Router::new().route(
            "/health",
            get(|headers: HeaderMap| async move {
                match headers.get(TRACE_ID_HEADER) {
                    Some(id) if id == "t-123" => StatusCode::OK,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, upstream).into_future());

        let client =
            TracedHttpClient::new(&ServiceIdentity::default(), &HttpClientConfig::default())
                .unwrap();
        let checks = StartupChecks::new()
            .add_check("upstream", HttpProbe::new(client, format!("http://{addr}/health")));
        let app = router(checks);

        let request = Request::builder()
            .uri("/health/ready")
            .header(TRACE_ID_HEADER, "t-123")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_start_server_reports_bind_failure() {
        let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = AppConfig::default();
        config.server.bind = "127.0.0.1".to_string();
        config.server.port = held.local_addr().unwrap().port();

        let err = start_server(config, Arc::new(ServiceIdentity::default()), StartupChecks::new())
            .await
            .unwrap_err();

        match err.downcast_ref::<AppError>() {
            Some(AppError::Server(message)) => assert!(message.contains("Failed to bind")),
            other => panic!("expected a server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(serve(
            listener,
            router(StartupChecks::new()),
            Duration::from_secs(1),
            async move {
                let _ = rx.await;
            },
        ));

        tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(3), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
