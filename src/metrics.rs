//! Client metrics: a sink trait plus the middleware that feeds it.
//!
//! Deliberately small. The crate does not pick a metrics backend; it emits
//! typed events tagged with the service name and the operator's static tags,
//! and the embedding application decides where they go. The default sink
//! logs at debug level.

use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::params::ClientParams;
use crate::refreshable::Refreshable;
use async_trait::async_trait;
use http::Extensions;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub enum MetricEvent {
    /// One end-to-end execution of the middleware chain.
    Attempt {
        service: String,
        status: Option<u16>,
        duration: Duration,
        tags: BTreeMap<String, String>,
    },
    /// A call finished, successfully or not.
    CallCompleted {
        service: String,
        attempts: u32,
        success: bool,
        tags: BTreeMap<String, String>,
    },
}

pub trait MetricsSink: Send + Sync + fmt::Debug {
    fn record(&self, event: &MetricEvent);
}

/// Default sink: structured debug logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn record(&self, event: &MetricEvent) {
        match event {
            MetricEvent::Attempt { service, status, duration, .. } => {
                tracing::debug!(service = %service, ?status, ?duration, "client.attempt")
            }
            MetricEvent::CallCompleted { service, attempts, success, .. } => {
                tracing::debug!(service = %service, attempts, success, "client.call")
            }
        }
    }
}

/// Records one [`MetricEvent::Attempt`] per chain execution when metrics are
/// enabled in the live config.
pub(crate) struct MetricsMiddleware {
    params: Refreshable<ClientParams>,
    sink: Arc<dyn MetricsSink>,
}

impl MetricsMiddleware {
    pub(crate) fn new(params: Refreshable<ClientParams>, sink: Arc<dyn MetricsSink>) -> Self {
        Self { params, sink }
    }
}

impl fmt::Debug for MetricsMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsMiddleware").finish_non_exhaustive()
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        ext: &mut Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response, Error> {
        let params = self.params.current();
        if !params.metrics_enabled {
            return next.run(req, ext).await;
        }
        let started = Instant::now();
        let result = next.run(req, ext).await;
        let status = match &result {
            Ok(response) => Some(response.status().as_u16()),
            Err(error) => error.status_code(),
        };
        self.sink.record(&MetricEvent::Attempt {
            service: params.service_name.clone(),
            status,
            duration: started.elapsed(),
            tags: params.metrics_tags.clone(),
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub(crate) struct CapturingSink {
        pub events: Mutex<Vec<MetricEvent>>,
    }

    impl MetricsSink for CapturingSink {
        fn record(&self, event: &MetricEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn log_sink_accepts_all_events() {
        let sink = LogSink;
        sink.record(&MetricEvent::Attempt {
            service: "svc".into(),
            status: Some(200),
            duration: Duration::from_millis(12),
            tags: BTreeMap::new(),
        });
        sink.record(&MetricEvent::CallCompleted {
            service: "svc".into(),
            attempts: 3,
            success: true,
            tags: BTreeMap::new(),
        });
    }

    #[test]
    fn capturing_sink_stores_events() {
        let sink = CapturingSink::default();
        sink.record(&MetricEvent::CallCompleted {
            service: "svc".into(),
            attempts: 1,
            success: false,
            tags: BTreeMap::new(),
        });
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            MetricEvent::CallCompleted { attempts: 1, success: false, .. }
        ));
    }
}
