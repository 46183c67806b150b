//! The per-hop trace identity and its HTTP header mapping.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use super::ids::{IdGenerator, is_header_safe};

/// Stable identifier of the whole call chain.
pub const TRACE_ID_HEADER: &str = "x-trace-id";
/// Identifier of a single hop.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// The calling hop's own request id.
pub const PARENT_SPAN_ID_HEADER: &str = "x-parent-span-id";
/// Deployment slot (blue/green) of the sending process.
pub const DEPLOYMENT_ID_HEADER: &str = "x-deployment-id";
pub const RESPONSE_TIME_HEADER: &str = "x-response-time";
pub const SERVED_BY_HEADER: &str = "x-served-by";

/// Trace identity of one request on one hop.
///
/// Values are never edited in place: a downstream hop gets a new context from
/// [`TraceContext::derive_child`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: Arc<str>,
    request_id: Arc<str>,
    parent_span_id: Option<Arc<str>>,
    deployment_id: Option<Arc<str>>,
}

impl TraceContext {
    pub fn new(
        trace_id: impl Into<Arc<str>>,
        request_id: impl Into<Arc<str>>,
        parent_span_id: Option<&str>,
        deployment_id: Option<&str>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            request_id: request_id.into(),
            parent_span_id: parent_span_id.map(Arc::from),
            deployment_id: deployment_id.map(Arc::from),
        }
    }

    /// Start a brand new call chain with this process as its entry point.
    pub fn root(ids: &IdGenerator, deployment_id: Option<&str>) -> Self {
        Self::new(ids.new_trace_id(), ids.new_request_id(), None, deployment_id)
    }

    /// Build the context for an inbound request.
    ///
    /// An inbound trace id is reused verbatim and the caller's request id
    /// (`X-Parent-Span-ID`, else `X-Request-ID`) becomes the parent. Without
    /// a usable trace id a new chain starts here. The request id is always
    /// freshly minted. `deployment_id` comes from the caller, normally from
    /// process configuration.
    pub fn establish(
        headers: &HeaderMap,
        ids: &IdGenerator,
        deployment_id: Option<&str>,
    ) -> Self {
        match inbound_header(headers, TRACE_ID_HEADER) {
            Some(trace_id) => {
                let parent = inbound_header(headers, PARENT_SPAN_ID_HEADER)
                    .or_else(|| inbound_header(headers, REQUEST_ID_HEADER));
                Self::new(trace_id, ids.new_request_id(), parent, deployment_id)
            }
            None => Self::root(ids, deployment_id),
        }
    }

    /// Context for a call this hop makes to a downstream service.
    pub fn derive_child(&self, ids: &IdGenerator) -> Self {
        Self {
            trace_id: Arc::clone(&self.trace_id),
            request_id: ids.new_request_id().into(),
            parent_span_id: Some(Arc::clone(&self.request_id)),
            deployment_id: self.deployment_id.clone(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn parent_span_id(&self) -> Option<&str> {
        self.parent_span_id.as_deref()
    }

    pub fn deployment_id(&self) -> Option<&str> {
        self.deployment_id.as_deref()
    }

    /// Write this context into outbound headers, skipping absent fields.
    pub fn inject(&self, headers: &mut HeaderMap) {
        set_header(headers, TRACE_ID_HEADER, Some(self.trace_id()));
        set_header(headers, REQUEST_ID_HEADER, Some(self.request_id()));
        set_header(headers, PARENT_SPAN_ID_HEADER, self.parent_span_id());
        set_header(headers, DEPLOYMENT_ID_HEADER, self.deployment_id());
    }
}

/// Read a header that is expected to carry an identifier.
///
/// Missing, non-UTF-8 or unsafe values all read as absent.
pub fn inbound_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| is_header_safe(v))
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: Option<&str>) {
    let Some(value) = value else {
        return;
    };
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(_) => {
            tracing::debug!(header = name, "Skipping trace header with invalid value");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_establish_reuses_inbound_trace_id() {
        let ids = IdGenerator::new("test");
        let inbound = headers(&[(TRACE_ID_HEADER, "t-123"), (REQUEST_ID_HEADER, "r-1")]);

        let ctx = TraceContext::establish(&inbound, &ids, Some("blue"));

        assert_eq!(ctx.trace_id(), "t-123");
        assert_eq!(ctx.parent_span_id(), Some("r-1"));
        assert_ne!(ctx.request_id(), "r-1");
        assert!(ctx.request_id().starts_with("test_"));
        assert_eq!(ctx.deployment_id(), Some("blue"));
    }

    #[test]
    fn test_establish_prefers_parent_span_header() {
        let ids = IdGenerator::new("test");
        let inbound = headers(&[
            (TRACE_ID_HEADER, "t-123"),
            (REQUEST_ID_HEADER, "callee-id"),
            (PARENT_SPAN_ID_HEADER, "caller-id"),
        ]);

        let ctx = TraceContext::establish(&inbound, &ids, None);
        assert_eq!(ctx.parent_span_id(), Some("caller-id"));
    }

    #[test]
    fn test_establish_mints_when_absent() {
        let ids = IdGenerator::new("test");
        let inbound = headers(&[(REQUEST_ID_HEADER, "r-1")]);

        let ctx = TraceContext::establish(&inbound, &ids, None);

        assert!(ctx.trace_id().ends_with("-test"));
        assert!(is_header_safe(ctx.trace_id()));
        assert_eq!(ctx.parent_span_id(), None);
        assert_eq!(ctx.deployment_id(), None);
    }

    #[test]
    fn test_establish_ignores_malformed_trace_header() {
        let ids = IdGenerator::new("test");
        let too_long = "x".repeat(500);
        let inbound = headers(&[(TRACE_ID_HEADER, too_long.as_str()), (REQUEST_ID_HEADER, "r-1")]);

        let ctx = TraceContext::establish(&inbound, &ids, None);

        assert_ne!(ctx.trace_id(), too_long);
        assert_eq!(ctx.parent_span_id(), None);
    }

    #[test]
    fn test_establish_ignores_deployment_header() {
        let ids = IdGenerator::new("test");
        let inbound = headers(&[(TRACE_ID_HEADER, "t-1"), (DEPLOYMENT_ID_HEADER, "green")]);

        let ctx = TraceContext::establish(&inbound, &ids, Some("blue"));
        assert_eq!(ctx.deployment_id(), Some("blue"));
    }

    #[test]
    fn test_derive_child() {
        let ids = IdGenerator::new("test");
        let inbound = headers(&[(TRACE_ID_HEADER, "t-1"), (REQUEST_ID_HEADER, "r-1")]);
        let ctx = TraceContext::establish(&inbound, &ids, Some("blue"));

        let child = ctx.derive_child(&ids);

        assert_eq!(child.trace_id(), "t-1");
        assert_eq!(child.parent_span_id(), Some(ctx.request_id()));
        assert_ne!(child.parent_span_id(), Some("r-1"));
        assert_ne!(child.request_id(), "r-1");
        assert_ne!(child.request_id(), ctx.request_id());
        assert_eq!(child.deployment_id(), Some("blue"));
        // the source context is untouched
        assert_eq!(ctx.parent_span_id(), Some("r-1"));
    }

    #[test]
    fn test_inject_omits_absent_fields() {
        let ctx = TraceContext::new("t-1", "r-2", None, None);
        let mut out = HeaderMap::new();
        ctx.inject(&mut out);

        assert_eq!(out.get(TRACE_ID_HEADER).unwrap(), "t-1");
        assert_eq!(out.get(REQUEST_ID_HEADER).unwrap(), "r-2");
        assert!(out.get(PARENT_SPAN_ID_HEADER).is_none());
        assert!(out.get(DEPLOYMENT_ID_HEADER).is_none());
    }

    #[test]
    fn test_inject_all_fields() {
        let ctx = TraceContext::new("t-1", "r-2", Some("r-1"), Some("green"));
        let mut out = HeaderMap::new();
        ctx.inject(&mut out);

        assert_eq!(out.get("X-Parent-Span-ID").unwrap(), "r-1");
        assert_eq!(out.get("X-Deployment-ID").unwrap(), "green");
    }
}
