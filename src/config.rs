//! Declarative client configuration, shaped for hot reload.
//!
//! These types are plain data: anything may be absent, nothing is validated
//! here. Validation happens in the projection to
//! [`ClientParams`](crate::params::ClientParams), so an operator typo never
//! poisons a running client: the refreshable layer keeps the last good
//! projection.

use duration_str::deserialize_option_duration;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Per-service client configuration.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ClientConfig {
    pub service_name: String,
    pub uris: Vec<String>,
    pub api_token: Option<String>,
    pub api_token_file: Option<PathBuf>,
    pub basic_auth: Option<BasicAuthConfig>,
    /// `None` means `2 * len(uris)`; `0` disables retries entirely.
    pub max_num_retries: Option<u32>,
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub initial_backoff: Option<Duration>,
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub max_backoff: Option<Duration>,
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub connect_timeout: Option<Duration>,
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub read_timeout: Option<Duration>,
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub write_timeout: Option<Duration>,
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub idle_conn_timeout: Option<Duration>,
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub tls_handshake_timeout: Option<Duration>,
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub expect_continue_timeout: Option<Duration>,
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub response_header_timeout: Option<Duration>,
    /// `0` disables keep-alives (and with them, connection reuse).
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub keep_alive: Option<Duration>,
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub http2_read_idle_timeout: Option<Duration>,
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub http2_ping_timeout: Option<Duration>,
    pub max_idle_conns: Option<usize>,
    pub max_idle_conns_per_host: Option<usize>,
    pub disable_http2: Option<bool>,
    /// Defaults to `true`: honor `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY`.
    pub proxy_from_environment: Option<bool>,
    pub proxy_url: Option<String>,
    pub metrics: MetricsConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BasicAuthConfig {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MetricsConfig {
    pub enabled: Option<bool>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SecurityConfig {
    pub ca_files: Vec<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub insecure_skip_verify: Option<bool>,
}

/// Top-level configuration: a `default` block plus per-service overrides.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServicesConfig {
    pub default: ClientConfig,
    pub services: BTreeMap<String, ClientConfig>,
}

impl ServicesConfig {
    /// Effective configuration for one service: the service block merged
    /// over the defaults, service fields winning.
    pub fn client_config(&self, service: &str) -> ClientConfig {
        match self.services.get(service) {
            Some(overrides) => {
                let mut merged = overrides.clone().merged_over(&self.default);
                if merged.service_name.is_empty() {
                    merged.service_name = service.to_string();
                }
                merged
            }
            None => {
                let mut base = self.default.clone();
                if base.service_name.is_empty() {
                    base.service_name = service.to_string();
                }
                base
            }
        }
    }
}

macro_rules! take_or {
    ($self:ident, $base:ident, $($field:ident),+ $(,)?) => {
        $( if $self.$field.is_none() { $self.$field = $base.$field.clone(); } )+
    };
}

impl ClientConfig {
    /// Right-biased merge: `self` wins wherever it says anything. List
    /// fields replace rather than append; metrics tags union with `self`
    /// taking precedence.
    pub fn merged_over(mut self, base: &ClientConfig) -> ClientConfig {
        if self.service_name.is_empty() {
            self.service_name = base.service_name.clone();
        }
        if self.uris.is_empty() {
            self.uris = base.uris.clone();
        }
        take_or!(
            self, base, api_token, api_token_file, basic_auth, max_num_retries,
            initial_backoff, max_backoff, connect_timeout, read_timeout, write_timeout,
            idle_conn_timeout, tls_handshake_timeout, expect_continue_timeout,
            response_header_timeout, keep_alive, http2_read_idle_timeout,
            http2_ping_timeout, max_idle_conns, max_idle_conns_per_host, disable_http2,
            proxy_from_environment, proxy_url,
        );

        if self.metrics.enabled.is_none() {
            self.metrics.enabled = base.metrics.enabled;
        }
        let mut tags = base.metrics.tags.clone();
        tags.extend(self.metrics.tags.clone());
        self.metrics.tags = tags;

        if self.security.ca_files.is_empty() {
            self.security.ca_files = base.security.ca_files.clone();
        }
        if self.security.cert_file.is_none() {
            self.security.cert_file = base.security.cert_file.clone();
        }
        if self.security.key_file.is_none() {
            self.security.key_file = base.security.key_file.clone();
        }
        if self.security.insecure_skip_verify.is_none() {
            self.security.insecure_skip_verify = base.security.insecure_skip_verify;
        }
        self
    }
}
