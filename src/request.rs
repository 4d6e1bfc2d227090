//! Request description and its fluent builder.

use crate::client::Client;
use crate::decode::ErrorDecoder;
use crate::error::Error;
use crate::middleware::Middleware;
use crate::response::Response;
use bytes::Bytes;
use http::header::{HeaderName, ACCEPT};
use http::{HeaderMap, HeaderValue, Method};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The outgoing body, classified by whether it can be replayed on a retry
/// or redirect.
pub enum Body {
    Empty,
    /// In-memory and freely replayable.
    Bytes { content: Bytes, content_type: HeaderValue },
    /// Consumable exactly once; any failure after the body may have been
    /// read ends the call.
    StreamOnce { body: Mutex<Option<reqwest::Body>>, content_type: HeaderValue },
    /// Caller-supplied factory, invoked once per attempt.
    StreamReplay {
        make: Arc<dyn Fn() -> reqwest::Body + Send + Sync>,
        content_type: HeaderValue,
    },
}

impl Body {
    pub(crate) fn replayable(&self) -> bool {
        !matches!(self, Body::StreamOnce { .. })
    }

    pub(crate) fn content_type(&self) -> Option<&HeaderValue> {
        match self {
            Body::Empty => None,
            Body::Bytes { content_type, .. }
            | Body::StreamOnce { content_type, .. }
            | Body::StreamReplay { content_type, .. } => Some(content_type),
        }
    }

    /// Produce the body for one attempt. In-memory bodies clone cheaply;
    /// stream-once bodies are handed out exactly once.
    pub(crate) fn take_for_attempt(&self) -> Result<Option<reqwest::Body>, Error> {
        match self {
            Body::Empty => Ok(None),
            Body::Bytes { content, .. } => Ok(Some(reqwest::Body::from(content.clone()))),
            Body::StreamOnce { body, .. } => {
                match body.lock().unwrap_or_else(|p| p.into_inner()).take() {
                    Some(inner) => Ok(Some(inner)),
                    None => Err(Error::Transport {
                        message: "streaming request body already consumed".to_string(),
                        source: None,
                    }),
                }
            }
            Body::StreamReplay { make, .. } => Ok(Some(make())),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Bytes { content, .. } => write!(f, "Body::Bytes({} bytes)", content.len()),
            Body::StreamOnce { .. } => write!(f, "Body::StreamOnce"),
            Body::StreamReplay { .. } => write!(f, "Body::StreamReplay"),
        }
    }
}

/// Everything the dispatcher needs to know about one call.
pub struct RequestSpec {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: HeaderMap,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: Body,
    pub(crate) raw_response_body: bool,
    pub(crate) max_attempts: Option<u32>,
    pub(crate) deadline: Option<Duration>,
    pub(crate) middlewares: Vec<Arc<dyn Middleware>>,
    pub(crate) error_decoder: Option<Arc<dyn ErrorDecoder>>,
}

impl RequestSpec {
    pub(crate) fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: Body::Empty,
            raw_response_body: false,
            max_attempts: None,
            deadline: None,
            middlewares: Vec::new(),
            error_decoder: None,
        }
    }
}

impl fmt::Debug for RequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSpec")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

/// Fluent builder returned by [`Client::request`] and the verb helpers.
pub struct RequestBuilder<'a> {
    client: &'a Client,
    spec: RequestSpec,
    error: Option<Error>,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a Client, method: Method, path: impl Into<String>) -> Self {
        Self { client, spec: RequestSpec::new(method, path), error: None }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.spec.headers.append(name, value);
            }
            _ => {
                self.error.get_or_insert(Error::ConfigInvalid {
                    reason: format!("invalid header {name:?}"),
                });
            }
        }
        self
    }

    pub fn query_param(mut self, key: &str, value: &str) -> Self {
        self.spec.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn accept(self, content_type: &str) -> Self {
        self.header(ACCEPT.as_str(), content_type)
    }

    /// Serialize `value` as the JSON request body. Replayable.
    pub fn json_body<T: Serialize>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(encoded) => {
                self.spec.body = Body::Bytes {
                    content: Bytes::from(encoded),
                    content_type: HeaderValue::from_static("application/json"),
                };
            }
            Err(e) => {
                self.error.get_or_insert(Error::Decode {
                    message: "request body failed to serialize".to_string(),
                    source: Some(Box::new(e)),
                });
            }
        }
        self
    }

    /// Raw in-memory body. Replayable.
    pub fn bytes_body(mut self, content: impl Into<Bytes>, content_type: &str) -> Self {
        match HeaderValue::from_str(content_type) {
            Ok(content_type) => {
                self.spec.body = Body::Bytes { content: content.into(), content_type };
            }
            Err(_) => {
                self.error.get_or_insert(Error::ConfigInvalid {
                    reason: format!("invalid content type {content_type:?}"),
                });
            }
        }
        self
    }

    /// One-shot streaming body. The call becomes single-attempt: a failure
    /// after the stream may have been read cannot be retried.
    pub fn stream_body(mut self, body: reqwest::Body, content_type: &str) -> Self {
        match HeaderValue::from_str(content_type) {
            Ok(content_type) => {
                self.spec.body = Body::StreamOnce { body: Mutex::new(Some(body)), content_type };
            }
            Err(_) => {
                self.error.get_or_insert(Error::ConfigInvalid {
                    reason: format!("invalid content type {content_type:?}"),
                });
            }
        }
        self
    }

    /// Streaming body with a factory, invoked once per attempt, so retries
    /// and redirects replay cleanly.
    pub fn stream_body_with_replay(
        mut self,
        make: impl Fn() -> reqwest::Body + Send + Sync + 'static,
        content_type: &str,
    ) -> Self {
        match HeaderValue::from_str(content_type) {
            Ok(content_type) => {
                self.spec.body = Body::StreamReplay { make: Arc::new(make), content_type };
            }
            Err(_) => {
                self.error.get_or_insert(Error::ConfigInvalid {
                    reason: format!("invalid content type {content_type:?}"),
                });
            }
        }
        self
    }

    /// Hand the response body back unread instead of draining it.
    pub fn raw_response_body(mut self) -> Self {
        self.spec.raw_response_body = true;
        self
    }

    /// Per-call attempt cap. `0` means unlimited: the call ends only on a
    /// non-retryable outcome or the deadline.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.spec.max_attempts = Some(attempts);
        self
    }

    /// Overall budget for the call, covering every attempt and backoff.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.spec.deadline = Some(deadline);
        self
    }

    /// Append a middleware after the client-level ones, for this call only.
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.spec.middlewares.push(middleware);
        self
    }

    /// Replace the error decoder for this call.
    pub fn error_decoder(mut self, decoder: Arc<dyn ErrorDecoder>) -> Self {
        self.spec.error_decoder = Some(decoder);
        self
    }

    pub async fn send(self) -> Result<Response, Error> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.client.execute(self.spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bodies_classify_replayability() {
        assert!(Body::Empty.replayable());
        let bytes = Body::Bytes {
            content: Bytes::from_static(b"x"),
            content_type: HeaderValue::from_static("text/plain"),
        };
        assert!(bytes.replayable());
        let once = Body::StreamOnce {
            body: Mutex::new(Some(reqwest::Body::from("s"))),
            content_type: HeaderValue::from_static("text/plain"),
        };
        assert!(!once.replayable());
        let replay = Body::StreamReplay {
            make: Arc::new(|| reqwest::Body::from("s")),
            content_type: HeaderValue::from_static("text/plain"),
        };
        assert!(replay.replayable());
    }

    #[test]
    fn bytes_body_can_be_taken_repeatedly() {
        let body = Body::Bytes {
            content: Bytes::from_static(b"payload"),
            content_type: HeaderValue::from_static("text/plain"),
        };
        assert!(body.take_for_attempt().unwrap().is_some());
        assert!(body.take_for_attempt().unwrap().is_some());
    }

    #[test]
    fn stream_once_body_is_single_use() {
        let body = Body::StreamOnce {
            body: Mutex::new(Some(reqwest::Body::from("payload"))),
            content_type: HeaderValue::from_static("text/plain"),
        };
        assert!(body.take_for_attempt().unwrap().is_some());
        assert!(body.take_for_attempt().is_err());
    }

    #[test]
    fn replay_factory_is_called_per_attempt() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let body = Body::StreamReplay {
            make: Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                reqwest::Body::from("payload")
            }),
            content_type: HeaderValue::from_static("text/plain"),
        };
        body.take_for_attempt().unwrap();
        body.take_for_attempt().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
