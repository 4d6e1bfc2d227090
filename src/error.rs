//! Error taxonomy for dispatch, configuration, and the wire.

use crate::remote_error::RemoteError;
use std::time::Duration;
use thiserror::Error;

/// Everything a call or a configuration update can fail with.
#[derive(Debug, Error)]
pub enum Error {
    /// The URI pool was empty at dispatch time.
    #[error("no base URIs configured")]
    EmptyUris,

    /// The per-call deadline elapsed before the call completed.
    #[error("call cancelled before completion")]
    Cancelled,

    /// Dial, TLS, or I/O failure. Retryable.
    #[error("transport failure: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// The server answered with status >= 400.
    #[error("server returned HTTP {status}")]
    Status {
        status: u16,
        /// Parsed `Retry-After` on throttle responses.
        retry_after: Option<Duration>,
        /// Structured body, when the server sent one.
        remote: Option<RemoteError>,
    },

    /// A 307/308 that could not be followed.
    #[error("server redirected with HTTP {status}")]
    Redirect { status: u16, location: Option<String> },

    /// Response body failed to decode. Non-retryable.
    #[error("failed to decode response body: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// A middleware panicked; the panic was converted to an error so the
    /// call returns instead of unwinding through the runtime.
    #[error("middleware panicked: {message}")]
    PanicRecovered { message: String },

    /// Raw configuration failed validation. Surfaced from the refreshable
    /// projection, never from a call.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },
}

impl Error {
    /// HTTP status carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Status { status, .. } | Error::Redirect { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Redirect target carried by this error, if any.
    pub fn location(&self) -> Option<&str> {
        match self {
            Error::Redirect { location, .. } => location.as_deref(),
            _ => None,
        }
    }

    /// Structured remote error carried by this error, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Error::Status { remote, .. } => remote.as_ref(),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Convert an engine-level failure, unwrapping reqwest's URL-annotated
    /// wrapper exactly once so the underlying cause stays on the source
    /// chain.
    pub(crate) fn from_engine(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else if err.is_connect() {
            "connection failed".to_string()
        } else if err.is_body() || err.is_request() {
            "request could not be sent".to_string()
        } else {
            "request failed".to_string()
        };
        Error::Transport { message, source: Some(Box::new(err)) }
    }

    pub(crate) fn attempt_timeout(timeout: Duration) -> Self {
        Error::Transport {
            message: format!("attempt timed out after {timeout:?}"),
            source: None,
        }
    }
}

/// Walk an error's source chain and return the first HTTP status found on a
/// [`Error`], however deeply the error has been wrapped.
pub fn status_code_from_error(err: &(dyn std::error::Error + 'static)) -> Option<u16> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(ours) = e.downcast_ref::<Error>() {
            if let Some(code) = ours.status_code() {
                return Some(code);
            }
        }
        current = e.source();
    }
    None
}
