//! Dependency probes consumed by the startup check orchestrator.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use reqwest::StatusCode;

use crate::http::TracedHttpClient;

/// A single dependency check: succeeds or fails with an error.
///
/// Implementations must release whatever they acquire when their future is
/// dropped, since timed-out probes are cancelled rather than awaited.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self) -> anyhow::Result<()>;
}

pub type SharedProbe = Arc<dyn Probe>;

/// Adapts an async closure into a [`Probe`].
pub struct FnProbe<F> {
    check: F,
}

#[async_trait]
impl<F, Fut> Probe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn check(&self) -> anyhow::Result<()> {
        (self.check)().await
    }
}

pub fn probe_fn<F, Fut>(check: F) -> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    FnProbe { check }
}

/// Checks that a GET on `url` answers with the expected status.
///
/// Requests go through [`TracedHttpClient`], so the downstream service sees
/// trace headers for the check.
pub struct HttpProbe {
    client: TracedHttpClient,
    url: String,
    expected_status: StatusCode,
}

impl HttpProbe {
    pub fn new(client: TracedHttpClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            expected_status: StatusCode::OK,
        }
    }

    pub fn expect_status(mut self, status: StatusCode) -> Self {
        self.expected_status = status;
        self
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self) -> anyhow::Result<()> {
        let response = self
            .client
            .get(&self.url)
            .await
            .with_context(|| format!("GET {} failed", self.url))?;

        let status = response.status();
        if status != self.expected_status {
            bail!(
                "GET {} returned {}, expected {}",
                self.url,
                status.as_u16(),
                self.expected_status.as_u16()
            );
        }
        Ok(())
    }
}
