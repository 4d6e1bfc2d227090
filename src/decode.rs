//! Converts non-success responses into structured errors.
//!
//! Sits between the caller's middlewares and the scorer observer: the scorer
//! sees raw statuses, everything above sees typed errors. Reading the body
//! here doubles as the drain for failed attempts.

use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::remote_error::RemoteError;
use async_trait::async_trait;
use http::header::RETRY_AFTER;
use http::{Extensions, HeaderMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Most bytes of an error body we will buffer while decoding.
const DECODE_BODY_CAP: usize = 1024 * 1024;

/// Builds the error for a response with status >= 400 whose body has been
/// read. Implement this to translate service-specific error envelopes;
/// the default understands `{errorCode, errorName, ...}` JSON bodies.
pub trait ErrorDecoder: Send + Sync + 'static {
    fn decode(&self, status: u16, headers: &HeaderMap, body: &[u8]) -> Error;
}

/// Default decoder: `{errorCode, errorName, ...}` bodies become structured
/// [`RemoteError`]s; anything else is a bare status error. Throttle metadata
/// (`Retry-After`) rides along either way.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemoteErrorDecoder;

impl ErrorDecoder for RemoteErrorDecoder {
    fn decode(&self, status: u16, headers: &HeaderMap, body: &[u8]) -> Error {
        Error::Status {
            status,
            retry_after: parse_retry_after(headers),
            remote: RemoteError::from_body(body),
        }
    }
}

pub(crate) struct ErrorDecoderMiddleware {
    decoder: Arc<dyn ErrorDecoder>,
}

impl ErrorDecoderMiddleware {
    pub(crate) fn new(decoder: Arc<dyn ErrorDecoder>) -> Self {
        Self { decoder }
    }
}

impl fmt::Debug for ErrorDecoderMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorDecoderMiddleware").finish_non_exhaustive()
    }
}

#[async_trait]
impl Middleware for ErrorDecoderMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        ext: &mut Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response, Error> {
        let mut response = next.run(req, ext).await?;
        let status = response.status();
        if !status.is_client_error() && !status.is_server_error() {
            return Ok(response);
        }
        let headers = response.headers().clone();
        let mut body = Vec::new();
        while let Ok(Some(chunk)) = response.chunk().await {
            if body.len() + chunk.len() > DECODE_BODY_CAP {
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Err(self.decoder.decode(status.as_u16(), &headers, &body))
    }
}

/// `Retry-After` per RFC 9110: delta-seconds or an HTTP-date.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let delta = date.signed_duration_since(chrono::Utc::now());
    delta.to_std().ok()
}
