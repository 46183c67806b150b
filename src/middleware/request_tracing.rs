//! Trace-context middleware for inbound HTTP requests.
//!
//! Establishes the request's [`TraceContext`] from inbound headers, binds it
//! for the lifetime of the handler and echoes the identifiers back on the
//! response, whatever the handler did.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::{LoggingConfig, ServiceIdentity};
use crate::trace::context::inbound_header;
use crate::trace::scope::scope;
use crate::trace::{
    DEPLOYMENT_ID_HEADER, IdGenerator, REQUEST_ID_HEADER, RESPONSE_TIME_HEADER, SERVED_BY_HEADER,
    TRACE_ID_HEADER, TeardownGuard, TraceContext,
};

/// Shared, read-only state for [`trace_requests`].
#[derive(Clone)]
pub struct TracingState {
    identity: Arc<ServiceIdentity>,
    ids: IdGenerator,
    served_by: Option<HeaderValue>,
    skip_paths: Arc<[String]>,
    log_requests: bool,
    trust_inbound_deployment_id: bool,
}

impl TracingState {
    pub fn new(identity: Arc<ServiceIdentity>, logging: &LoggingConfig) -> Self {
        Self {
            ids: identity.id_generator(),
            served_by: HeaderValue::from_str(&identity.served_by()).ok(),
            skip_paths: logging.skip_paths.clone().into(),
            log_requests: logging.log_requests,
            trust_inbound_deployment_id: false,
            identity,
        }
    }

    /// Let an inbound `X-Deployment-ID` replace the configured one.
    pub fn trust_inbound_deployment_id(mut self, trust: bool) -> Self {
        self.trust_inbound_deployment_id = trust;
        self
    }

    fn should_log(&self, path: &str) -> bool {
        self.log_requests && !self.skip_paths.iter().any(|skip| skip == path)
    }
}

/// Middleware that gives each request its own trace context.
///
/// Install with `axum::middleware::from_fn_with_state`.
pub async fn trace_requests(
    State(state): State<TracingState>,
    mut req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();

    let deployment_id = if state.trust_inbound_deployment_id {
        inbound_header(req.headers(), DEPLOYMENT_ID_HEADER)
            .map(str::to_string)
            .or_else(|| state.identity.deployment_id.clone())
    } else {
        state.identity.deployment_id.clone()
    };
    let ctx = TraceContext::establish(req.headers(), &state.ids, deployment_id.as_deref());
    req.extensions_mut().insert(ctx.clone());

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let log_request = state.should_log(&path);

    let span = info_span!(
        "http_request",
        method = %method,
        path = %path,
        trace_id = %ctx.trace_id(),
        request_id = %ctx.request_id(),
    );

    let handled = scope(ctx.clone(), async move {
        let _teardown = TeardownGuard::new();

        if log_request {
            info!(method = %method, path = %path, "Request started");
        }

        let response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
            Ok(response) => response,
            Err(_) => {
                error!(method = %method, path = %path, "Request handler panicked");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        };

        if log_request {
            let status = response.status();
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
            if status.is_server_error() {
                warn!(
                    method = %method,
                    path = %path,
                    status = status.as_u16(),
                    duration_ms,
                    "Request failed"
                );
            } else {
                info!(
                    method = %method,
                    path = %path,
                    status = status.as_u16(),
                    duration_ms,
                    "Request completed"
                );
            }
        }

        response
    })
    .instrument(span);

    let mut response = handled.await;
    attach_response_headers(&mut response, &ctx, &state, started);
    response
}

fn attach_response_headers(
    response: &mut Response,
    ctx: &TraceContext,
    state: &TracingState,
    started: Instant,
) {
    let headers = response.headers_mut();

    let pairs = [
        (TRACE_ID_HEADER, Some(ctx.trace_id())),
        (REQUEST_ID_HEADER, Some(ctx.request_id())),
        (DEPLOYMENT_ID_HEADER, ctx.deployment_id()),
    ];
    for (name, value) in pairs {
        if let Some(value) = value.and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    if let Ok(value) = HeaderValue::from_str(&format!("{elapsed_ms:.2}ms")) {
        headers.insert(HeaderName::from_static(RESPONSE_TIME_HEADER), value);
    }
    if let Some(served_by) = &state.served_by {
        headers.insert(HeaderName::from_static(SERVED_BY_HEADER), served_by.clone());
    }
}
