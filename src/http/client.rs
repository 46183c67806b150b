use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Body, Method, Response, Url};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{HttpClientConfig, ServiceIdentity};
use crate::error::ClientError;
use crate::trace::{IdGenerator, TraceContext, derive_for_outbound_call};

/// HTTP client that stamps every outbound request with the caller's trace.
///
/// Inside a request the outbound context is derived from the active one:
/// same trace id, this hop's request id as parent, a fresh request id. With
/// no active context a new root context is started instead. Downstream
/// status codes are returned untouched; only transport failures are errors.
///
/// Dropping the returned future aborts the in-flight call.
#[derive(Debug, Clone)]
pub struct TracedHttpClient {
    client: reqwest::Client,
    base_url: Option<String>,
    ids: IdGenerator,
    deployment_id: Option<String>,
}

impl TracedHttpClient {
    pub fn new(identity: &ServiceIdentity, config: &HttpClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Self::with_client(client, identity, config.base_url.as_deref())
    }

    /// Wrap an already configured `reqwest::Client`.
    pub fn with_client(
        client: reqwest::Client,
        identity: &ServiceIdentity,
        base_url: Option<&str>,
    ) -> Result<Self, ClientError> {
        let base_url = base_url
            .map(|url| {
                Url::parse(url).map_err(|e| ClientError::InvalidUrl {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
                Ok::<_, ClientError>(url.trim_end_matches('/').to_string())
            })
            .transpose()?;

        Ok(Self {
            client,
            base_url,
            ids: identity.id_generator(),
            deployment_id: identity.deployment_id.clone(),
        })
    }

    /// Resolve `url` against the base URL unless it is already absolute.
    pub fn resolve_url(&self, url: &str) -> Result<Url, ClientError> {
        let invalid = |reason: String| ClientError::InvalidUrl {
            url: url.to_string(),
            reason,
        };

        if has_scheme(url) {
            return Url::parse(url).map_err(|e| invalid(e.to_string()));
        }
        match &self.base_url {
            Some(base) => {
                let joined = format!("{}/{}", base, url.trim_start_matches('/'));
                Url::parse(&joined).map_err(|e| invalid(e.to_string()))
            }
            None => Err(invalid("relative URL without a base_url".to_string())),
        }
    }

    /// The context the next outbound call will carry.
    pub fn outbound_context(&self) -> TraceContext {
        derive_for_outbound_call(&self.ids)
            .unwrap_or_else(|| TraceContext::root(&self.ids, self.deployment_id.as_deref()))
    }

    /// Send a request with trace headers attached.
    ///
    /// Trace headers replace any caller-supplied headers of the same name.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<Body>,
    ) -> Result<Response, ClientError> {
        let url = self.resolve_url(url)?;
        let ctx = self.outbound_context();

        let mut headers = headers;
        ctx.inject(&mut headers);

        debug!(
            method = %method,
            url = %url,
            outbound_request_id = ctx.request_id(),
            "Sending outbound request"
        );

        let mut request = self.client.request(method.clone(), url.clone()).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }

        match request.send().await {
            Ok(response) => {
                debug!(
                    method = %method,
                    url = %url,
                    status = response.status().as_u16(),
                    "Outbound request completed"
                );
                Ok(response)
            }
            Err(e) => {
                warn!(method = %method, url = %url, error = %e, "Outbound request failed");
                Err(ClientError::Network(e))
            }
        }
    }

    pub async fn get(&self, url: &str) -> Result<Response, ClientError> {
        self.request(Method::GET, url, HeaderMap::new(), None).await
    }

    pub async fn delete(&self, url: &str) -> Result<Response, ClientError> {
        self.request(Method::DELETE, url, HeaderMap::new(), None).await
    }

    pub async fn post(&self, url: &str, body: impl Into<Body>) -> Result<Response, ClientError> {
        self.request(Method::POST, url, HeaderMap::new(), Some(body.into()))
            .await
    }

    pub async fn put(&self, url: &str, body: impl Into<Body>) -> Result<Response, ClientError> {
        self.request(Method::PUT, url, HeaderMap::new(), Some(body.into()))
            .await
    }

    pub async fn patch(&self, url: &str, body: impl Into<Body>) -> Result<Response, ClientError> {
        self.request(Method::PATCH, url, HeaderMap::new(), Some(body.into()))
            .await
    }

    /// POST a JSON-encoded body.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
    ) -> Result<Response, ClientError> {
        let body = serde_json::to_vec(payload).map_err(|e| ClientError::InvalidBody(e.to_string()))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.request(Method::POST, url, headers, Some(body.into()))
            .await
    }
}

/// Whether `url` starts with `<scheme>://`, as opposed to merely containing it.
fn has_scheme(url: &str) -> bool {
    match url.split_once("://") {
        Some((scheme, _)) => {
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Build a header map from string pairs.
pub fn headers_from_pairs(pairs: &[(&str, &str)]) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ClientError::InvalidHeader(name.to_string()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| ClientError::InvalidHeader(name.to_string()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
