#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, middleware::from_fn_with_state, routing::get};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use trace_relay::config::{HttpClientConfig, LoggingConfig, ServiceIdentity};
use trace_relay::http::TracedHttpClient;
use trace_relay::middleware::{TracingState, trace_requests};
use trace_relay::trace;

pub fn identity(service: &str, short_name: &str) -> Arc<ServiceIdentity> {
    Arc::new(ServiceIdentity {
        service: service.to_string(),
        short_name: short_name.to_string(),
        version: "1.0.0".to_string(),
        environment: "test".to_string(),
        deployment_id: Some("blue".to_string()),
        git_commit: "abc1234".to_string(),
    })
}

pub async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn context_json() -> Value {
    match trace::current() {
        Some(ctx) => json!({
            "trace_id": ctx.trace_id(),
            "request_id": ctx.request_id(),
            "parent_span_id": ctx.parent_span_id(),
            "deployment_id": ctx.deployment_id(),
        }),
        None => Value::Null,
    }
}

/// A leaf service that reports the context it was handed.
pub async fn spawn_leaf() -> SocketAddr {
    let app = Router::new()
        .route("/whoami", get(|| async { Json(context_json()) }))
        .layer(from_fn_with_state(
            TracingState::new(identity("billing", "bill"), &LoggingConfig::default()),
            trace_requests,
        ));
    spawn(app).await
}

/// A front service that calls the leaf once per request.
pub async fn spawn_front(leaf: SocketAddr) -> SocketAddr {
    let front_identity = identity("checkout", "chk");
    let client = TracedHttpClient::new(
        &front_identity,
        &HttpClientConfig {
            timeout_secs: 5,
            base_url: Some(format!("http://{leaf}")),
        },
    )
    .unwrap();

    let app = Router::new()
        .route(
            "/checkout",
            get(move || {
                let client = client.clone();
                async move {
                    tracing::info!("calling billing");
                    let downstream: Value = client.get("/whoami").await.unwrap().json().await.unwrap();
                    Json(json!({ "front": context_json(), "leaf": downstream }))
                }
            }),
        )
        .layer(from_fn_with_state(
            TracingState::new(front_identity, &LoggingConfig::default()),
            trace_requests,
        ));
    spawn(app).await
}
