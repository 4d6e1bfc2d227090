//! Response wrapper returned to callers.

use crate::error::Error;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

/// Largest body we will read while draining a response we are not going to
/// return. Bigger bodies cost less to abandon (dropping the connection) than
/// to consume.
pub(crate) const DRAIN_BODY_CAP: usize = 1024 * 1024;

/// A successful (or surfaced) response, body still open.
#[derive(Debug)]
pub struct Response {
    inner: reqwest::Response,
    attempts: u32,
}

impl Response {
    pub(crate) fn new(inner: reqwest::Response, attempts: u32) -> Self {
        Self { inner, attempts }
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// How many attempts the call made, including the one that produced this
    /// response.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Final URL of the attempt that produced this response.
    pub fn url(&self) -> &url::Url {
        self.inner.url()
    }

    /// Decode the body as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, Error> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Decode {
            message: "response body is not valid JSON for the target type".to_string(),
            source: Some(Box::new(e)),
        })
    }

    pub async fn bytes(self) -> Result<bytes::Bytes, Error> {
        self.inner.bytes().await.map_err(Error::from_engine)
    }

    pub async fn text(self) -> Result<String, Error> {
        self.inner.text().await.map_err(Error::from_engine)
    }

    /// The underlying response for raw-body streaming.
    pub fn into_inner(self) -> reqwest::Response {
        self.inner
    }
}

/// Consume a response we are about to discard so its connection can return
/// to the pool. Past the cap the connection is dropped instead.
pub(crate) async fn drain(mut response: reqwest::Response) {
    let mut seen = 0usize;
    while let Ok(Some(chunk)) = response.chunk().await {
        seen += chunk.len();
        if seen > DRAIN_BODY_CAP {
            tracing::debug!(bytes = seen, "dropping connection instead of draining large body");
            return;
        }
    }
}
