//! The per-call request loop: select, attempt, classify, repeat.
//!
//! Chain order per attempt, outermost first: recovery, URI injector,
//! backoff gate, body marshaller, client middlewares (auth, trace, metrics),
//! per-request middlewares, error decoder, scorer observer, attempt timeout,
//! engine. Recovery must see everything below it; the injector rewrites the
//! URL before anything inspects it; the scorer sits under the decoder so it
//! records raw statuses; the attempt timeout hugs the engine so backoff
//! sleeps are never charged against it.

use crate::decode::{ErrorDecoder, ErrorDecoderMiddleware, RemoteErrorDecoder};
use crate::engine::Engine;
use crate::error::Error;
use crate::metrics::{MetricEvent, MetricsSink};
use crate::middleware::{
    AttemptInfo, Middleware, Next, RecoveryMiddleware, ScoreObserverMiddleware,
};
use crate::params::ClientParams;
use crate::refreshable::Refreshable;
use crate::request::{Body, RequestSpec};
use crate::response::{drain, Response};
use crate::retrier::{AttemptMeta, Decision, Retrier};
use crate::selector::{SelectionHints, UriSelector};
use crate::sleeper::Sleeper;
use crate::uris::BaseUri;
use async_trait::async_trait;
use http::header::{CONTENT_TYPE, HOST, LOCATION};
use http::{Extensions, HeaderValue};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

pub(crate) struct Dispatcher<'a> {
    pub params: &'a Refreshable<ClientParams>,
    pub engine: &'a Engine,
    pub selector: &'a Arc<dyn UriSelector>,
    pub middlewares: &'a [Arc<dyn Middleware>],
    pub sleeper: &'a Arc<dyn Sleeper>,
    pub metrics: &'a Arc<dyn MetricsSink>,
}

impl Dispatcher<'_> {
    pub async fn run(&self, spec: RequestSpec) -> Result<Response, Error> {
        let params = self.params.current();
        let mut attempts = 0u32;
        let result = self.run_inner(&params, spec, &mut attempts).await;
        if params.metrics_enabled {
            self.metrics.record(&MetricEvent::CallCompleted {
                service: params.service_name.clone(),
                attempts,
                success: result.is_ok(),
                tags: params.metrics_tags.clone(),
            });
        }
        result
    }

    async fn run_inner(
        &self,
        params: &ClientParams,
        mut spec: RequestSpec,
        attempts: &mut u32,
    ) -> Result<Response, Error> {
        // The pool snapshot: every attempt of this call targets a member of
        // it (or a redirect the pool sent us to).
        let uris: Vec<BaseUri> = params.uris.clone();
        if uris.is_empty() {
            return Err(Error::EmptyUris);
        }
        let max_attempts =
            spec.max_attempts.or(params.max_attempts).unwrap_or(2 * uris.len() as u32);

        let mut retrier = Retrier::new(max_attempts, &params.retry);
        if !spec.body.replayable() {
            // The engine may consume the stream on the first attempt; any
            // later attempt would send a different request.
            retrier.mark_terminal();
        }

        let body = Arc::new(std::mem::replace(&mut spec.body, Body::Empty));
        let decoder: Arc<dyn ErrorDecoder> =
            spec.error_decoder.clone().unwrap_or_else(|| Arc::new(RemoteErrorDecoder));
        let deadline = spec.deadline.map(|budget| Instant::now() + budget);

        let mut pending_backoff: Option<Duration> = None;
        let mut forced_target: Option<Url> = None;

        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(Error::Cancelled);
                }
            }
            *attempts += 1;

            let (url, tracker) = match forced_target.take() {
                Some(target) => (target, None),
                None => {
                    let selection = {
                        let header_value = self
                            .selector
                            .key_header()
                            .and_then(|name| spec.headers.get(name))
                            .and_then(|value| value.to_str().ok());
                        self.selector.select(&uris, &SelectionHints { header_value })
                    }
                    .ok_or(Error::EmptyUris)?;
                    if selection.uri.is_mesh() {
                        retrier.mark_terminal();
                    }
                    retrier.record_attempt(selection.uri.selector_key());
                    let url = selection.uri.resolve(&spec.path)?;
                    (url, Some(selection.tracker))
                }
            };

            let mut url = url;
            if !spec.query.is_empty() {
                let mut pairs = url.query_pairs_mut();
                for (key, value) in &spec.query {
                    pairs.append_pair(key, value);
                }
            }

            let mut request = reqwest::Request::new(spec.method.clone(), url.clone());
            *request.headers_mut() = spec.headers.clone();

            let mut chain: Vec<Arc<dyn Middleware>> =
                Vec::with_capacity(self.middlewares.len() + spec.middlewares.len() + 6);
            chain.push(Arc::new(RecoveryMiddleware));
            chain.push(Arc::new(UriInjector { url: url.clone() }));
            chain.push(Arc::new(BackoffGate {
                sleep: pending_backoff.take(),
                sleeper: self.sleeper.clone(),
                deadline,
            }));
            chain.push(Arc::new(BodyMarshaller { body: body.clone() }));
            chain.extend(self.middlewares.iter().cloned());
            chain.extend(spec.middlewares.iter().cloned());
            chain.push(Arc::new(ErrorDecoderMiddleware::new(decoder.clone())));
            if let Some(tracker) = &tracker {
                chain.push(Arc::new(ScoreObserverMiddleware::new(tracker.clone())));
            }
            chain.push(Arc::new(AttemptTimeout { timeout: self.engine.attempt_timeout() }));

            let client = self.engine.client();
            let mut ext = Extensions::new();
            ext.insert(AttemptInfo { number: *attempts });

            let outcome: Result<reqwest::Response, Error> = {
                let attempt = Next::new(&client, &chain).run(request, &mut ext);
                match deadline {
                    Some(deadline) => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            return Err(Error::Cancelled);
                        }
                        match tokio::time::timeout(remaining, attempt).await {
                            Ok(result) => result,
                            // Dropping the attempt future aborts the request
                            // and closes any partially received body.
                            Err(_) => return Err(Error::Cancelled),
                        }
                    }
                    None => attempt.await,
                }
            };

            let meta: Result<AttemptMeta, &Error> = match &outcome {
                Ok(response) => Ok(AttemptMeta {
                    status: response.status().as_u16(),
                    location: response
                        .headers()
                        .get(LOCATION)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string),
                }),
                Err(error) => Err(error),
            };

            match retrier.next(&meta, &url) {
                Decision::Stop => {
                    if matches!(&outcome, Err(_)) {
                        tracing::debug!(
                            attempts = *attempts,
                            attempted = ?retrier.attempted(),
                            "call failed"
                        );
                    }
                    return match outcome {
                        Ok(response) => {
                            let status = response.status().as_u16();
                            if status == 307 || status == 308 {
                                // A redirect we could not follow surfaces as
                                // a structured error, location attached.
                                let location = response
                                    .headers()
                                    .get(LOCATION)
                                    .and_then(|value| value.to_str().ok())
                                    .map(str::to_string);
                                drain(response).await;
                                Err(Error::Redirect { status, location })
                            } else {
                                Ok(Response::new(response, *attempts))
                            }
                        }
                        Err(error) => Err(error),
                    };
                }
                Decision::Retry { backoff, target } => {
                    if let Ok(response) = outcome {
                        if !spec.raw_response_body {
                            drain(response).await;
                        }
                    }
                    tracing::debug!(attempt = *attempts, ?backoff, "retrying");
                    pending_backoff = backoff;
                    forced_target = target;
                }
            }
        }
    }
}

/// Rewrites the request URL to the selected target and pins the `Host`
/// header to match.
struct UriInjector {
    url: Url,
}

#[async_trait]
impl Middleware for UriInjector {
    async fn handle(
        &self,
        mut req: reqwest::Request,
        ext: &mut Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response, Error> {
        *req.url_mut() = self.url.clone();
        if let Some(host) = host_header(&self.url) {
            req.headers_mut().insert(HOST, host);
        }
        next.run(req, ext).await
    }
}

fn host_header(url: &Url) -> Option<HeaderValue> {
    let host = url.host_str()?;
    let value = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    HeaderValue::from_str(&value).ok()
}

/// Sleeps the delay the retrier prescribed for this attempt, respecting the
/// call deadline.
struct BackoffGate {
    sleep: Option<Duration>,
    sleeper: Arc<dyn Sleeper>,
    deadline: Option<Instant>,
}

#[async_trait]
impl Middleware for BackoffGate {
    async fn handle(
        &self,
        req: reqwest::Request,
        ext: &mut Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response, Error> {
        if let Some(delay) = self.sleep {
            if let Some(deadline) = self.deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining <= delay {
                    // Sleeping would outlive the call; give up now.
                    return Err(Error::Cancelled);
                }
            }
            self.sleeper.sleep(delay).await;
        }
        next.run(req, ext).await
    }
}

/// Attaches the request body for this attempt and defaults `Content-Type`.
struct BodyMarshaller {
    body: Arc<Body>,
}

#[async_trait]
impl Middleware for BodyMarshaller {
    async fn handle(
        &self,
        mut req: reqwest::Request,
        ext: &mut Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response, Error> {
        if let Some(body) = self.body.take_for_attempt()? {
            *req.body_mut() = Some(body);
            if let Some(content_type) = self.body.content_type() {
                if !req.headers().contains_key(CONTENT_TYPE) {
                    req.headers_mut().insert(CONTENT_TYPE, content_type.clone());
                }
            }
        }
        next.run(req, ext).await
    }
}

/// Bounds a single engine call. Expiry is a retryable transport failure,
/// unlike the call deadline, which cancels the whole loop.
struct AttemptTimeout {
    timeout: Duration,
}

#[async_trait]
impl Middleware for AttemptTimeout {
    async fn handle(
        &self,
        req: reqwest::Request,
        ext: &mut Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response, Error> {
        if self.timeout.is_zero() {
            return next.run(req, ext).await;
        }
        match tokio::time::timeout(self.timeout, next.run(req, ext)).await {
            Ok(result) => result,
            Err(_) => Err(Error::attempt_timeout(self.timeout)),
        }
    }
}
