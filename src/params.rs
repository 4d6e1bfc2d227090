//! Validated projection of [`ClientConfig`] into the parameters the engine,
//! retrier, and selector actually consume.
//!
//! The projection is total: every field comes out parsed, defaulted, and
//! checked. `ClientParams` is compared structurally by the refreshable layer,
//! so defaults are applied here; two configs that differ only in spelling of
//! the same effective value must project to equal params.

use crate::config::ClientConfig;
use crate::error::Error;
use crate::uris::BaseUri;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);
pub const DEFAULT_READ_WRITE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_EXPECT_CONTINUE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_HTTP2_READ_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HTTP2_PING_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_IDLE_CONNS: usize = 200;
pub const DEFAULT_MAX_IDLE_CONNS_PER_HOST: usize = 100;

const MAX_TAG_LENGTH: usize = 200;

/// Known-valid client parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientParams {
    pub service_name: String,
    /// Ordered, deduplicated pool.
    pub uris: Vec<BaseUri>,
    /// Budget for a single attempt: `max(read-timeout, write-timeout)`.
    pub attempt_timeout: Duration,
    pub dialer: DialerParams,
    pub transport: TransportParams,
    pub tls: TlsParams,
    pub retry: RetryParams,
    /// `None` resolves to `2 * len(uris)` at dispatch time; `Some(0)` means
    /// unlimited attempts.
    pub max_attempts: Option<u32>,
    pub bearer_token: Option<String>,
    pub basic_auth: Option<BasicCredentials>,
    pub metrics_enabled: bool,
    pub metrics_tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialerParams {
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    pub socks_proxy: Option<Url>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    pub disable_http2: bool,
    pub disable_keep_alives: bool,
    pub idle_conn_timeout: Duration,
    pub expect_continue_timeout: Duration,
    pub response_header_timeout: Option<Duration>,
    pub tls_handshake_timeout: Duration,
    pub http2_read_idle_timeout: Duration,
    pub http2_ping_timeout: Duration,
    pub http_proxy: Option<Url>,
    pub proxy_from_environment: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsParams {
    pub ca_files: Vec<PathBuf>,
    pub client_cert: Option<(PathBuf, PathBuf)>,
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryParams {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub randomization: f64,
}

impl Default for RetryParams {
    fn default() -> Self {
        Self {
            initial_backoff: crate::backoff::DEFAULT_INITIAL_BACKOFF,
            max_backoff: crate::backoff::DEFAULT_MAX_BACKOFF,
            multiplier: crate::backoff::DEFAULT_BACKOFF_MULTIPLIER,
            randomization: crate::backoff::DEFAULT_RANDOMIZATION_FACTOR,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ClientParams {
    pub fn try_from_config(config: &ClientConfig) -> Result<Self, Error> {
        let mut uris = Vec::with_capacity(config.uris.len());
        for raw in &config.uris {
            let parsed = BaseUri::parse(raw)?;
            if !uris.contains(&parsed) {
                uris.push(parsed);
            }
        }

        let read = config.read_timeout.unwrap_or(DEFAULT_READ_WRITE_TIMEOUT);
        let write = config.write_timeout.unwrap_or(DEFAULT_READ_WRITE_TIMEOUT);
        let attempt_timeout = read.max(write);

        let (socks_proxy, http_proxy) = split_proxy(config.proxy_url.as_deref())?;

        let keep_alive = config.keep_alive.unwrap_or(DEFAULT_KEEP_ALIVE);
        let dialer = DialerParams {
            connect_timeout: config.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            keep_alive,
            socks_proxy,
        };

        let transport = TransportParams {
            max_idle_conns: config.max_idle_conns.unwrap_or(DEFAULT_MAX_IDLE_CONNS),
            max_idle_conns_per_host: config
                .max_idle_conns_per_host
                .unwrap_or(DEFAULT_MAX_IDLE_CONNS_PER_HOST),
            disable_http2: config.disable_http2.unwrap_or(false),
            disable_keep_alives: keep_alive.is_zero(),
            idle_conn_timeout: config.idle_conn_timeout.unwrap_or(DEFAULT_IDLE_CONN_TIMEOUT),
            expect_continue_timeout: config
                .expect_continue_timeout
                .unwrap_or(DEFAULT_EXPECT_CONTINUE_TIMEOUT),
            response_header_timeout: config.response_header_timeout,
            tls_handshake_timeout: config
                .tls_handshake_timeout
                .unwrap_or(DEFAULT_TLS_HANDSHAKE_TIMEOUT),
            http2_read_idle_timeout: config
                .http2_read_idle_timeout
                .unwrap_or(DEFAULT_HTTP2_READ_IDLE_TIMEOUT),
            http2_ping_timeout: config.http2_ping_timeout.unwrap_or(DEFAULT_HTTP2_PING_TIMEOUT),
            http_proxy,
            proxy_from_environment: config.proxy_from_environment.unwrap_or(true),
        };

        let tls = validate_tls(config)?;

        let retry = RetryParams {
            initial_backoff: config
                .initial_backoff
                .unwrap_or(crate::backoff::DEFAULT_INITIAL_BACKOFF),
            max_backoff: config.max_backoff.unwrap_or(crate::backoff::DEFAULT_MAX_BACKOFF),
            ..RetryParams::default()
        };

        // Config speaks in retries; the dispatcher speaks in attempts.
        let max_attempts = config.max_num_retries.map(|retries| retries.saturating_add(1));

        let bearer_token = resolve_token(config)?;
        let basic_auth = config.basic_auth.as_ref().map(|auth| BasicCredentials {
            user: auth.user.clone(),
            password: auth.password.clone(),
        });

        let mut metrics_tags = BTreeMap::new();
        for (key, value) in &config.metrics.tags {
            validate_tag(key, value)?;
            metrics_tags.insert(key.clone(), value.clone());
        }

        Ok(Self {
            service_name: config.service_name.clone(),
            uris,
            attempt_timeout,
            dialer,
            transport,
            tls,
            retry,
            max_attempts,
            bearer_token,
            basic_auth,
            metrics_enabled: config.metrics.enabled.unwrap_or(false),
            metrics_tags,
        })
    }
}

fn split_proxy(proxy_url: Option<&str>) -> Result<(Option<Url>, Option<Url>), Error> {
    let Some(raw) = proxy_url else {
        return Ok((None, None));
    };
    let url = Url::parse(raw).map_err(|e| Error::ConfigInvalid {
        reason: format!("invalid proxy URL {raw:?}: {e}"),
    })?;
    match url.scheme() {
        "socks5" | "socks5h" => Ok((Some(url), None)),
        "http" | "https" => Ok((None, Some(url))),
        other => Err(Error::ConfigInvalid {
            reason: format!("proxy URL scheme {other:?} not supported"),
        }),
    }
}

fn validate_tls(config: &ClientConfig) -> Result<TlsParams, Error> {
    let security = &config.security;
    for path in &security.ca_files {
        require_readable(path, "ca-file")?;
    }
    let client_cert = match (&security.cert_file, &security.key_file) {
        (Some(cert), Some(key)) => {
            require_readable(cert, "cert-file")?;
            require_readable(key, "key-file")?;
            Some((cert.clone(), key.clone()))
        }
        (None, None) => None,
        _ => {
            return Err(Error::ConfigInvalid {
                reason: "cert-file and key-file must be set together".to_string(),
            })
        }
    };
    Ok(TlsParams {
        ca_files: security.ca_files.clone(),
        client_cert,
        insecure_skip_verify: security.insecure_skip_verify.unwrap_or(false),
    })
}

fn require_readable(path: &std::path::Path, what: &str) -> Result<(), Error> {
    std::fs::metadata(path).map(|_| ()).map_err(|e| Error::ConfigInvalid {
        reason: format!("{what} {path:?} is not readable: {e}"),
    })
}

fn resolve_token(config: &ClientConfig) -> Result<Option<String>, Error> {
    if let Some(token) = &config.api_token {
        return Ok(Some(token.clone()));
    }
    let Some(path) = &config.api_token_file else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(path).map_err(|e| Error::ConfigInvalid {
        reason: format!("api-token-file {path:?} is not readable: {e}"),
    })?;
    Ok(Some(raw.trim().to_string()))
}

fn validate_tag(key: &str, value: &str) -> Result<(), Error> {
    for (what, s) in [("key", key), ("value", value)] {
        if s.is_empty() || s.len() > MAX_TAG_LENGTH {
            return Err(Error::ConfigInvalid {
                reason: format!("metrics tag {what} {s:?} must be 1-{MAX_TAG_LENGTH} characters"),
            });
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')) {
            return Err(Error::ConfigInvalid {
                reason: format!("metrics tag {what} {s:?} has characters outside [a-zA-Z0-9_.-]"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ClientConfig {
        serde_json::from_value(serde_json::json!({
            "service-name": "recipes",
            "uris": ["https://a", "https://b"]
        }))
        .unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let params = ClientParams::try_from_config(&base_config()).unwrap();
        assert_eq!(params.attempt_timeout, DEFAULT_READ_WRITE_TIMEOUT);
        assert_eq!(params.dialer.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(params.transport.max_idle_conns, DEFAULT_MAX_IDLE_CONNS);
        assert!(!params.transport.disable_http2);
        assert!(params.transport.proxy_from_environment);
        assert!(params.max_attempts.is_none());
        assert!(!params.metrics_enabled);
    }

    #[test]
    fn attempt_timeout_is_max_of_read_and_write() {
        let mut config = base_config();
        config.read_timeout = Some(Duration::from_secs(30));
        config.write_timeout = Some(Duration::from_secs(45));
        let params = ClientParams::try_from_config(&config).unwrap();
        assert_eq!(params.attempt_timeout, Duration::from_secs(45));
    }

    #[test]
    fn uris_are_deduplicated_in_order() {
        let mut config = base_config();
        config.uris =
            vec!["https://a".into(), "https://b".into(), "https://a".into(), "https://c".into()];
        let params = ClientParams::try_from_config(&config).unwrap();
        let keys: Vec<_> = params.uris.iter().map(|u| u.selector_key()).collect();
        assert_eq!(keys, vec!["https://a", "https://b", "https://c"]);
    }

    #[test]
    fn invalid_uri_fails_projection() {
        let mut config = base_config();
        config.uris.push("ftp://nope".into());
        assert!(matches!(
            ClientParams::try_from_config(&config),
            Err(Error::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn zero_keep_alive_disables_connection_reuse() {
        let mut config = base_config();
        config.keep_alive = Some(Duration::ZERO);
        let params = ClientParams::try_from_config(&config).unwrap();
        assert!(params.transport.disable_keep_alives);
    }

    #[test]
    fn retries_project_to_attempts() {
        let mut config = base_config();
        config.max_num_retries = Some(0);
        let params = ClientParams::try_from_config(&config).unwrap();
        assert_eq!(params.max_attempts, Some(1), "zero retries is one attempt");

        config.max_num_retries = Some(3);
        let params = ClientParams::try_from_config(&config).unwrap();
        assert_eq!(params.max_attempts, Some(4));
    }

    #[test]
    fn socks_and_http_proxies_are_split_by_scheme() {
        let mut config = base_config();
        config.proxy_url = Some("socks5://proxy:1080".into());
        let params = ClientParams::try_from_config(&config).unwrap();
        assert!(params.dialer.socks_proxy.is_some());
        assert!(params.transport.http_proxy.is_none());

        config.proxy_url = Some("http://proxy:3128".into());
        let params = ClientParams::try_from_config(&config).unwrap();
        assert!(params.dialer.socks_proxy.is_none());
        assert!(params.transport.http_proxy.is_some());

        config.proxy_url = Some("ftp://proxy".into());
        assert!(ClientParams::try_from_config(&config).is_err());
    }

    #[test]
    fn token_precedence_is_literal_then_file() {
        let dir = std::env::temp_dir();
        let token_path = dir.join("quiver-test-token");
        std::fs::write(&token_path, "from-file\n").unwrap();

        let mut config = base_config();
        config.api_token = Some("literal".into());
        config.api_token_file = Some(token_path.clone());
        let params = ClientParams::try_from_config(&config).unwrap();
        assert_eq!(params.bearer_token.as_deref(), Some("literal"));

        config.api_token = None;
        let params = ClientParams::try_from_config(&config).unwrap();
        assert_eq!(params.bearer_token.as_deref(), Some("from-file"), "file token is trimmed");

        std::fs::remove_file(&token_path).ok();
    }

    #[test]
    fn missing_token_file_fails_projection() {
        let mut config = base_config();
        config.api_token_file = Some(PathBuf::from("/definitely/not/here"));
        assert!(ClientParams::try_from_config(&config).is_err());
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let mut config = base_config();
        config.security.cert_file = Some(PathBuf::from("/tmp/cert.pem"));
        assert!(matches!(
            ClientParams::try_from_config(&config),
            Err(Error::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn metrics_tags_are_validated() {
        let mut config = base_config();
        config.metrics.tags.insert("region".into(), "us-east-1".into());
        assert!(ClientParams::try_from_config(&config).is_ok());

        config.metrics.tags.insert("bad tag".into(), "x".into());
        assert!(ClientParams::try_from_config(&config).is_err());
    }

    #[test]
    fn equal_configs_project_to_equal_params() {
        let a = ClientParams::try_from_config(&base_config()).unwrap();
        let b = ClientParams::try_from_config(&base_config()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn credentials_do_not_leak_via_debug() {
        let creds = BasicCredentials { user: "alice".into(), password: "hunter2".into() };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("alice"));
    }
}
