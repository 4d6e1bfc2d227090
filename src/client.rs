//! The client: one per remote service, constructed once, called many times.

use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::engine::{ClientHandle, Engine};
use crate::error::Error;
use crate::metrics::{LogSink, MetricsSink};
use crate::middleware::{AuthMiddleware, Middleware, TraceMiddleware};
use crate::metrics::MetricsMiddleware;
use crate::params::ClientParams;
use crate::refreshable::{Refreshable, Subscription, Validated};
use crate::request::{RequestBuilder, RequestSpec};
use crate::response::Response;
use crate::selector::{BalancedSelector, UriSelector};
use crate::sleeper::{Sleeper, TokioSleeper};
use http::Method;
use std::fmt;
use std::sync::Arc;

/// A resilient HTTP client bound to one remote service.
///
/// Construction validates the initial configuration; later configuration
/// updates flow through the refreshable fabric and apply to subsequent
/// calls without rebuilding the client.
pub struct Client {
    service_name: String,
    params: Refreshable<ClientParams>,
    // Keeps the config -> params derivation alive for refreshable configs.
    validated: Option<Validated<ClientParams, Error>>,
    _name_watch: Subscription,
    engine: Engine,
    selector: Arc<dyn UriSelector>,
    middlewares: Vec<Arc<dyn Middleware>>,
    sleeper: Arc<dyn Sleeper>,
    metrics: Arc<dyn MetricsSink>,
}

impl Client {
    /// Client with a fixed configuration.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        Self::builder().config(config).build()
    }

    /// Client whose configuration may change at runtime.
    pub fn from_refreshable(config: Refreshable<ClientConfig>) -> Result<Self, Error> {
        Self::builder().refreshable_config(config).build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Snapshot of the validated parameters currently in effect.
    pub fn current_params(&self) -> Arc<ClientParams> {
        self.params.current()
    }

    /// The most recent configuration snapshot that failed validation, if the
    /// client is still running on an older one.
    pub fn config_error(&self) -> Option<Arc<Error>> {
        if let Some(validated) = &self.validated {
            if let Some(error) = validated.last_error() {
                return Some(error);
            }
        }
        self.engine.last_error()
    }

    /// Identity of the live transport; changes exactly when the engine is
    /// rebuilt.
    pub fn transport_handle(&self) -> ClientHandle {
        self.engine.client_handle()
    }

    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, path)
    }

    pub fn get(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PUT, path)
    }

    pub fn delete(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::DELETE, path)
    }

    /// Execute a fully described request.
    pub async fn execute(&self, spec: RequestSpec) -> Result<Response, Error> {
        Dispatcher {
            params: &self.params,
            engine: &self.engine,
            selector: &self.selector,
            middlewares: &self.middlewares,
            sleeper: &self.sleeper,
            metrics: &self.metrics,
        }
        .run(spec)
        .await
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("service", &self.service_name)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

enum ConfigSource {
    Fixed(ClientConfig),
    Live(Refreshable<ClientConfig>),
}

impl Default for ConfigSource {
    fn default() -> Self {
        ConfigSource::Fixed(ClientConfig::default())
    }
}

pub struct ClientBuilder {
    config: ConfigSource,
    selector: Option<Arc<dyn UriSelector>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    metrics_sink: Arc<dyn MetricsSink>,
    sleeper: Arc<dyn Sleeper>,
    token_provider: Option<Arc<dyn Fn() -> Option<String> + Send + Sync>>,
    allow_empty_uris: bool,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            config: ConfigSource::default(),
            selector: None,
            middlewares: Vec::new(),
            metrics_sink: Arc::new(LogSink),
            sleeper: Arc::new(TokioSleeper),
            token_provider: None,
            allow_empty_uris: false,
        }
    }
}

impl ClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = ConfigSource::Fixed(config);
        self
    }

    pub fn refreshable_config(mut self, config: Refreshable<ClientConfig>) -> Self {
        self.config = ConfigSource::Live(config);
        self
    }

    /// Replace the default balanced selector.
    pub fn selector(mut self, selector: Arc<dyn UriSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Append a middleware between the built-in ones and the engine, for
    /// every call made by this client.
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = sink;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Supply bearer tokens dynamically. Returning `None` skips the
    /// `Authorization` header for that attempt, so credentials may appear
    /// after the client is built.
    pub fn token_provider(
        mut self,
        provider: impl Fn() -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.token_provider = Some(Arc::new(provider));
        self
    }

    /// Permit construction with an empty URI pool. Calls still fail with
    /// [`Error::EmptyUris`] until a refresh supplies URIs.
    pub fn allow_empty_uris(mut self) -> Self {
        self.allow_empty_uris = true;
        self
    }

    pub fn build(self) -> Result<Client, Error> {
        let (params, validated) = match self.config {
            ConfigSource::Fixed(config) => {
                (Refreshable::new(ClientParams::try_from_config(&config)?), None)
            }
            ConfigSource::Live(config) => {
                let validated = config.map_validated(|c| ClientParams::try_from_config(c))?;
                (validated.refreshable(), Some(validated))
            }
        };

        let initial = params.current();
        if initial.uris.is_empty() && !self.allow_empty_uris {
            return Err(Error::EmptyUris);
        }
        let service_name = initial.service_name.clone();

        // The service name identifies the client in traces and metrics for
        // its whole lifetime; a changed name in a refreshed config is
        // ignored, loudly.
        let initial_name = service_name.clone();
        let name_watch = params.subscribe(move |p: &ClientParams| {
            if p.service_name != initial_name {
                tracing::warn!(
                    configured = %p.service_name,
                    active = %initial_name,
                    "service-name is immutable after construction; keeping the original"
                );
            }
        });

        let engine = Engine::new(&params)?;

        let auth = match self.token_provider {
            Some(provider) => AuthMiddleware::with_provider(params.clone(), provider),
            None => AuthMiddleware::new(params.clone()),
        };
        let mut middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(auth),
            Arc::new(TraceMiddleware::new(service_name.clone())),
            Arc::new(MetricsMiddleware::new(params.clone(), self.metrics_sink.clone())),
        ];
        middlewares.extend(self.middlewares);

        Ok(Client {
            service_name,
            params,
            validated,
            _name_watch: name_watch,
            engine,
            selector: self.selector.unwrap_or_else(|| Arc::new(BalancedSelector::new())),
            middlewares,
            sleeper: self.sleeper,
            metrics: self.metrics_sink,
        })
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("middlewares", &self.middlewares.len())
            .field("allow_empty_uris", &self.allow_empty_uris)
            .finish_non_exhaustive()
    }
}
