//! Client middleware: a chain of handlers terminating at the HTTP engine.
//!
//! Each middleware receives the outgoing request, a per-attempt
//! [`Extensions`] map, and the continuation of the chain. The dispatcher
//! assembles a fixed ordering around the caller's own middlewares; see
//! [`crate::dispatch`].

use crate::error::Error;
use crate::params::ClientParams;
use crate::refreshable::Refreshable;
use crate::selector::ScoreTracker;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::future::BoxFuture;
use futures::FutureExt;
use http::header::AUTHORIZATION;
use http::{Extensions, HeaderValue};
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

/// A handler in the request chain.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(
        &self,
        req: reqwest::Request,
        ext: &mut Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response, Error>;
}

/// The rest of the chain. Calling [`run`](Next::run) hands the request to
/// the next middleware, or to the engine when none remain.
#[derive(Clone)]
pub struct Next<'a> {
    client: &'a reqwest::Client,
    chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(client: &'a reqwest::Client, chain: &'a [Arc<dyn Middleware>]) -> Self {
        Self { client, chain }
    }

    pub fn run(
        mut self,
        req: reqwest::Request,
        ext: &'a mut Extensions,
    ) -> BoxFuture<'a, Result<reqwest::Response, Error>> {
        if let Some((head, rest)) = self.chain.split_first() {
            self.chain = rest;
            head.handle(req, ext, self)
        } else {
            let client = self.client;
            async move { client.execute(req).await.map_err(Error::from_engine) }.boxed()
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("remaining", &self.chain.len()).finish()
    }
}

/// Per-attempt metadata available to middlewares via [`Extensions`].
#[derive(Debug, Clone, Copy)]
pub struct AttemptInfo {
    /// 1-based attempt number within the call.
    pub number: u32,
}

/// Outermost middleware: converts panics anywhere below it, caller-supplied
/// middlewares included, into [`Error::PanicRecovered`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryMiddleware;

#[async_trait]
impl Middleware for RecoveryMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        ext: &mut Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response, Error> {
        match std::panic::AssertUnwindSafe(next.run(req, ext)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(Error::PanicRecovered { message: panic_message(panic) }),
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

/// Injects `Authorization`. Must no-op when no credential is available so
/// that credentials appearing later (via config refresh or a provider) start
/// applying without a rebuild.
pub struct AuthMiddleware {
    params: Refreshable<ClientParams>,
    provider: Option<Arc<dyn Fn() -> Option<String> + Send + Sync>>,
}

impl AuthMiddleware {
    pub(crate) fn new(params: Refreshable<ClientParams>) -> Self {
        Self { params, provider: None }
    }

    pub(crate) fn with_provider(
        params: Refreshable<ClientParams>,
        provider: Arc<dyn Fn() -> Option<String> + Send + Sync>,
    ) -> Self {
        Self { params, provider: Some(provider) }
    }

    fn header_value(&self) -> Option<HeaderValue> {
        if let Some(provider) = &self.provider {
            // None from the provider is the "skip" sentinel, not an error.
            let token = provider()?;
            return bearer(&token);
        }
        let params = self.params.current();
        if let Some(token) = &params.bearer_token {
            return bearer(token);
        }
        let auth = params.basic_auth.as_ref()?;
        let encoded = BASE64.encode(format!("{}:{}", auth.user, auth.password));
        HeaderValue::from_str(&format!("Basic {encoded}")).ok()
    }
}

fn bearer(token: &str) -> Option<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}")).ok()?;
    value.set_sensitive(true);
    Some(value)
}

impl fmt::Debug for AuthMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthMiddleware").field("provider", &self.provider.is_some()).finish()
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        mut req: reqwest::Request,
        ext: &mut Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response, Error> {
        if !req.headers().contains_key(AUTHORIZATION) {
            if let Some(value) = self.header_value() {
                req.headers_mut().insert(AUTHORIZATION, value);
            }
        }
        next.run(req, ext).await
    }
}

/// Wraps each attempt in a span and logs its outcome.
#[derive(Debug, Clone)]
pub struct TraceMiddleware {
    service: String,
}

impl TraceMiddleware {
    pub(crate) fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }
}

#[async_trait]
impl Middleware for TraceMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        ext: &mut Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response, Error> {
        let attempt = ext.get::<AttemptInfo>().map(|info| info.number).unwrap_or(0);
        let span = tracing::debug_span!(
            "http_attempt",
            service = %self.service,
            method = %req.method(),
            host = req.url().host_str().unwrap_or(""),
            attempt,
        );
        let result = next.run(req, ext).instrument(span).await;
        match &result {
            Ok(response) => {
                tracing::debug!(service = %self.service, status = response.status().as_u16(), attempt, "attempt completed")
            }
            Err(error) => {
                tracing::warn!(service = %self.service, %error, attempt, "attempt failed")
            }
        }
        result
    }
}

/// Innermost middleware: maintains the selected URI's inflight count for the
/// duration of the engine call and reports the raw outcome, before any error
/// decoding rewrites it.
#[derive(Debug, Clone)]
pub struct ScoreObserverMiddleware {
    tracker: ScoreTracker,
}

impl ScoreObserverMiddleware {
    pub(crate) fn new(tracker: ScoreTracker) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Middleware for ScoreObserverMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        ext: &mut Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response, Error> {
        let _inflight = self.tracker.track();
        let result = next.run(req, ext).await;
        match &result {
            Ok(response) => self.tracker.observe(Some(response.status().as_u16())),
            Err(error) => self.tracker.observe(error.status_code()),
        }
        result
    }
}
