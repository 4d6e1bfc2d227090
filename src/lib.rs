#![forbid(unsafe_code)]

//! # Quiver
//!
//! Resilient HTTP client for service-to-service RPC: balanced URI pools,
//! bounded retries, and live-reloadable configuration.
//!
//! ## Features
//!
//! - **URI selection** across a pool of equivalent hosts, scored by inflight
//!   load and decaying recent-failure counts (round-robin and
//!   rendezvous-hash variants included)
//! - **Retries** with bounded exponential backoff, `Retry-After` awareness,
//!   and hard refusal to retry what must not be retried (client errors,
//!   consumed streaming bodies, service-mesh URIs)
//! - **Live configuration**: timeouts, URI pools, proxies, and TLS material
//!   update in place; the connection pool is rebuilt only when parameters
//!   that actually shape it change
//! - **Middleware chain** with panic recovery, auth injection, tracing, and
//!   metrics built in
//!
//! ## Quick start
//!
//! ```no_run
//! use quiver::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), quiver::Error> {
//!     let config: ClientConfig = serde_json::from_str(
//!         r#"{
//!             "service-name": "recipes",
//!             "uris": ["https://recipes-east.example.com", "https://recipes-west.example.com"],
//!             "read-timeout": "30s"
//!         }"#,
//!     )
//!     .expect("static config");
//!
//!     let client = Client::new(config)?;
//!     let recipe: serde_json::Value =
//!         client.get("/recipes/pie").send().await?.json().await?;
//!     println!("{recipe}");
//!     Ok(())
//! }
//! ```
//!
//! For hot reload, build from a [`Refreshable`] configuration instead and
//! push new snapshots into it as your config file changes; see
//! [`Client::from_refreshable`].

mod backoff;
mod client;
mod clock;
mod config;
mod decode;
mod dispatch;
mod engine;
mod error;
mod metrics;
mod middleware;
mod params;
mod refreshable;
mod remote_error;
mod request;
mod reservoir;
mod response;
mod retrier;
mod selector;
mod sleeper;
mod uris;

// Re-exports
pub use backoff::{
    ExponentialBackoff, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF,
    DEFAULT_RANDOMIZATION_FACTOR,
};
pub use client::{Client, ClientBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BasicAuthConfig, ClientConfig, MetricsConfig, SecurityConfig, ServicesConfig};
pub use decode::{ErrorDecoder, RemoteErrorDecoder};
pub use engine::ClientHandle;
pub use error::{status_code_from_error, Error};
pub use metrics::{LogSink, MetricEvent, MetricsSink};
pub use middleware::{AttemptInfo, Middleware, Next, RecoveryMiddleware};
pub use params::{BasicCredentials, ClientParams, DialerParams, RetryParams, TlsParams, TransportParams};
pub use refreshable::{Refreshable, Subscription, UpdateError, Validated};
pub use remote_error::RemoteError;
pub use request::{Body, RequestBuilder, RequestSpec};
pub use reservoir::{DecayingReservoir, SUB_INTERVALS_PER_HALF_LIFE};
pub use response::Response;
pub use selector::{
    BalancedSelector, RendezvousSelector, RoundRobinSelector, ScoreTracker, Selection,
    SelectionHints, UriSelector, CLIENT_ERROR_WEIGHT, FAILURE_MEMORY, FAILURE_WEIGHT,
};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use uris::{join_path, BaseUri, MESH_SCHEME_PREFIX};
