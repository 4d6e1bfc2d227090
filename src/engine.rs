//! The refreshable HTTP engine: one `reqwest::Client` per structural change
//! to dialer, transport, or TLS parameters.
//!
//! The per-attempt timeout deliberately lives outside the client. Rebuilding
//! the client discards its connection pool, so a timeout-only config change
//! must not touch it; the dispatcher applies the timeout around each attempt
//! instead.

use crate::error::Error;
use crate::params::{
    ClientParams, DialerParams, TlsParams, TransportParams, DEFAULT_EXPECT_CONTINUE_TIMEOUT,
};
use crate::refreshable::{Refreshable, Validated};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A built client compared by identity: every rebuild is a new pool.
#[derive(Clone)]
pub struct ClientHandle(pub(crate) Arc<reqwest::Client>);

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EngineInputs {
    dialer: DialerParams,
    transport: TransportParams,
    tls: TlsParams,
}

/// Dialer + transport + TLS, refreshed as a unit; timeout refreshed alone.
pub(crate) struct Engine {
    // The intermediate derivation is held so the chain stays alive; it is
    // what gives the client its structural-equality rebuild gate.
    _inputs: Refreshable<EngineInputs>,
    client: Validated<ClientHandle, Error>,
    attempt_timeout: Refreshable<Duration>,
}

impl Engine {
    pub fn new(params: &Refreshable<ClientParams>) -> Result<Self, Error> {
        let inputs = params.map(|p| EngineInputs {
            dialer: p.dialer.clone(),
            transport: p.transport.clone(),
            tls: p.tls.clone(),
        });
        let client = inputs.map_validated(|i| build_client(&i.dialer, &i.transport, &i.tls))?;
        let attempt_timeout = params.map(|p| p.attempt_timeout);
        Ok(Self { _inputs: inputs, client, attempt_timeout })
    }

    pub fn client(&self) -> Arc<reqwest::Client> {
        self.client.current().0.clone()
    }

    /// Identity handle for the current transport, for pointer-equality
    /// assertions.
    pub fn client_handle(&self) -> ClientHandle {
        (*self.client.current()).clone()
    }

    pub fn attempt_timeout(&self) -> Duration {
        *self.attempt_timeout.current()
    }

    /// Validation error from the most recent rejected engine rebuild.
    pub fn last_error(&self) -> Option<Arc<Error>> {
        self.client.last_error()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("attempt_timeout", &self.attempt_timeout.current())
            .finish_non_exhaustive()
    }
}

fn build_client(
    dialer: &DialerParams,
    transport: &TransportParams,
    tls: &TlsParams,
) -> Result<ClientHandle, Error> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .user_agent(concat!("quiver/", env!("CARGO_PKG_VERSION")))
        // Redirects belong to the retrier: 307/308 re-enter the dispatch
        // loop, everything else surfaces to the caller.
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(dialer.connect_timeout)
        .pool_idle_timeout(transport.idle_conn_timeout)
        .min_tls_version(reqwest::tls::Version::TLS_1_2);

    builder = if transport.disable_keep_alives {
        builder.pool_max_idle_per_host(0)
    } else {
        builder
            .pool_max_idle_per_host(transport.max_idle_conns_per_host)
            .tcp_keepalive(dialer.keep_alive)
    };

    builder = if transport.disable_http2 {
        builder.http1_only()
    } else {
        // H2 keep-alive pings are what detect dead connections; without them
        // a broken connection is reused until the OS notices, which can be
        // never.
        builder
            .http2_keep_alive_interval(transport.http2_read_idle_timeout)
            .http2_keep_alive_timeout(transport.http2_ping_timeout)
            .http2_keep_alive_while_idle(true)
    };

    if let Some(timeout) = transport.response_header_timeout {
        builder = builder.read_timeout(timeout);
    }
    if transport.expect_continue_timeout != DEFAULT_EXPECT_CONTINUE_TIMEOUT {
        tracing::debug!(
            timeout = ?transport.expect_continue_timeout,
            "expect-continue-timeout has no effect on this transport"
        );
    }

    if let Some(socks) = &dialer.socks_proxy {
        builder = builder.proxy(proxy(socks.as_str())?);
    } else if let Some(http) = &transport.http_proxy {
        builder = builder.proxy(proxy(http.as_str())?);
    } else if !transport.proxy_from_environment {
        builder = builder.no_proxy();
    }

    for ca in &tls.ca_files {
        let pem = std::fs::read(ca).map_err(|e| Error::ConfigInvalid {
            reason: format!("ca-file {ca:?} is not readable: {e}"),
        })?;
        let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| Error::ConfigInvalid {
            reason: format!("ca-file {ca:?} is not valid PEM: {e}"),
        })?;
        builder = builder.add_root_certificate(cert);
    }
    if let Some((cert_path, key_path)) = &tls.client_cert {
        let mut pem = std::fs::read(cert_path).map_err(|e| Error::ConfigInvalid {
            reason: format!("cert-file {cert_path:?} is not readable: {e}"),
        })?;
        pem.extend(std::fs::read(key_path).map_err(|e| Error::ConfigInvalid {
            reason: format!("key-file {key_path:?} is not readable: {e}"),
        })?);
        let identity = reqwest::Identity::from_pem(&pem).map_err(|e| Error::ConfigInvalid {
            reason: format!("client certificate is not usable: {e}"),
        })?;
        builder = builder.identity(identity);
    }
    if tls.insecure_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    let client = builder.build().map_err(|e| Error::ConfigInvalid {
        reason: format!("failed to build HTTP client: {e}"),
    })?;
    Ok(ClientHandle(Arc::new(client)))
}

fn proxy(url: &str) -> Result<reqwest::Proxy, Error> {
    reqwest::Proxy::all(url).map_err(|e| Error::ConfigInvalid {
        reason: format!("proxy URL {url:?} rejected: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    fn params_for(json: serde_json::Value) -> ClientParams {
        let config: ClientConfig = serde_json::from_value(json).unwrap();
        ClientParams::try_from_config(&config).unwrap()
    }

    fn base_params() -> ClientParams {
        params_for(serde_json::json!({
            "service-name": "svc",
            "uris": ["https://a"],
            "read-timeout": "60s"
        }))
    }

    #[tokio::test]
    async fn timeout_only_change_preserves_transport_identity() {
        let params = Refreshable::new(base_params());
        let engine = Engine::new(&params).unwrap();
        let before = engine.client_handle();
        assert_eq!(engine.attempt_timeout(), Duration::from_secs(300), "write default wins max");

        let mut updated = base_params();
        updated.attempt_timeout = Duration::from_secs(1);
        params.set(updated).unwrap();

        assert_eq!(engine.attempt_timeout(), Duration::from_secs(1));
        assert_eq!(engine.client_handle(), before, "connection pool must survive");
    }

    #[tokio::test]
    async fn structural_change_rebuilds_transport() {
        let params = Refreshable::new(base_params());
        let engine = Engine::new(&params).unwrap();
        let before = engine.client_handle();

        let mut updated = base_params();
        updated.transport.max_idle_conns_per_host = 7;
        params.set(updated).unwrap();

        assert_ne!(engine.client_handle(), before);
    }

    #[tokio::test]
    async fn equal_params_update_is_a_noop() {
        let params = Refreshable::new(base_params());
        let engine = Engine::new(&params).unwrap();
        let before = engine.client_handle();
        params.set(base_params()).unwrap();
        assert_eq!(engine.client_handle(), before);
    }

    #[tokio::test]
    async fn invalid_update_retains_previous_engine() {
        let params = Refreshable::new(base_params());
        let engine = Engine::new(&params).unwrap();
        let before = engine.client_handle();

        let mut broken = base_params();
        broken.tls.ca_files = vec!["/does/not/exist.pem".into()];
        params.set(broken).unwrap();

        assert_eq!(engine.client_handle(), before, "prior engine retained");
        assert!(engine.last_error().is_some());

        params.set(base_params()).unwrap();
        assert!(engine.last_error().is_none());
    }

    #[tokio::test]
    async fn disable_http2_builds_http1_client() {
        let params = Refreshable::new(params_for(serde_json::json!({
            "service-name": "svc",
            "uris": ["https://a"],
            "disable-http2": true
        })));
        // Construction succeeding is the contract; the wire behavior is
        // covered by integration tests.
        Engine::new(&params).unwrap();
    }
}
