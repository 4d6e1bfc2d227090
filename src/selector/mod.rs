//! URI selection across a pool of equivalent base URIs.
//!
//! Every selector shares the same shape: given the caller's snapshot of the
//! pool, return one URI plus a [`ScoreTracker`], the narrow capability the
//! scorer-observer middleware uses to maintain inflight counts and recent
//! failures without holding a reference back into the selector.

mod balanced;
mod rendezvous;
mod round_robin;

pub use balanced::BalancedSelector;
pub use rendezvous::RendezvousSelector;
pub use round_robin::RoundRobinSelector;

use crate::clock::Clock;
use crate::reservoir::DecayingReservoir;
use crate::uris::BaseUri;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Half-life of the recent-failure reservoirs.
pub const FAILURE_MEMORY: Duration = Duration::from_secs(30);

/// Score bump for transport errors, 5xx, and QoS hints (503/308).
pub const FAILURE_WEIGHT: f64 = 10.0;
/// Score bump for plain client errors; enough to nudge, not to exile.
pub const CLIENT_ERROR_WEIGHT: f64 = 0.1;

/// Chooses one URI for the next attempt.
pub trait UriSelector: Send + Sync + fmt::Debug {
    fn select(&self, uris: &[BaseUri], hints: &SelectionHints<'_>) -> Option<Selection>;

    /// Header whose value this selector wants passed in
    /// [`SelectionHints::header_value`], if any.
    fn key_header(&self) -> Option<&str> {
        None
    }
}

/// Per-call inputs a selector may consult.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectionHints<'a> {
    /// Value of the selector's [`key_header`](UriSelector::key_header) on the
    /// outgoing request, when present.
    pub header_value: Option<&'a str>,
}

/// A chosen URI and the capability to report what happened to it.
#[derive(Debug, Clone)]
pub struct Selection {
    pub uri: BaseUri,
    pub tracker: ScoreTracker,
}

#[derive(Debug)]
pub(crate) struct UriScore {
    inflight: AtomicU64,
    failures: DecayingReservoir,
}

impl UriScore {
    fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inflight: AtomicU64::new(0),
            failures: DecayingReservoir::with_clock(FAILURE_MEMORY, clock),
        }
    }

    fn score(&self) -> u64 {
        self.inflight.load(Ordering::Relaxed) + self.failures.get().round().max(0.0) as u64
    }
}

/// Narrow observer capability handed out with each [`Selection`].
#[derive(Debug, Clone)]
pub struct ScoreTracker {
    inner: Arc<UriScore>,
}

impl ScoreTracker {
    pub(crate) fn new(inner: Arc<UriScore>) -> Self {
        Self { inner }
    }

    /// Mark a request in flight; the guard decrements on drop.
    pub fn track(&self) -> InflightGuard {
        self.inner.inflight.fetch_add(1, Ordering::Relaxed);
        InflightGuard { score: self.inner.clone() }
    }

    /// Record the raw outcome of an attempt. `None` means no response was
    /// received at all (transport failure).
    pub fn observe(&self, status: Option<u16>) {
        let weight = match status {
            None => FAILURE_WEIGHT,
            Some(503) | Some(308) => FAILURE_WEIGHT,
            Some(s) if (500..=599).contains(&s) => FAILURE_WEIGHT,
            Some(429) => 0.0, // throttle: the retrier owns this signal
            Some(s) if (400..=499).contains(&s) => CLIENT_ERROR_WEIGHT,
            Some(_) => 0.0,
        };
        if weight > 0.0 {
            self.inner.failures.update(weight);
        }
    }

    pub fn inflight(&self) -> u64 {
        self.inner.inflight.load(Ordering::Relaxed)
    }

    pub fn recent_failures(&self) -> f64 {
        self.inner.failures.get()
    }
}

/// RAII inflight decrement.
#[derive(Debug)]
pub struct InflightGuard {
    score: Arc<UriScore>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.score.inflight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Keyed per-URI state, merged against the caller's pool snapshot: entries
/// for preserved URIs survive (inflight and failure history intact), new
/// URIs start fresh, removed URIs are dropped.
pub(crate) struct ScoreBoard {
    entries: HashMap<String, Arc<UriScore>>,
    clock: Arc<dyn Clock>,
}

impl ScoreBoard {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: HashMap::new(), clock }
    }

    pub(crate) fn merge(&mut self, uris: &[BaseUri]) -> Vec<(BaseUri, Arc<UriScore>)> {
        let mut next = HashMap::with_capacity(uris.len());
        let mut out = Vec::with_capacity(uris.len());
        for uri in uris {
            let key = uri.selector_key().to_string();
            let score = next
                .entry(key.clone())
                .or_insert_with(|| {
                    self.entries
                        .get(&key)
                        .cloned()
                        .unwrap_or_else(|| Arc::new(UriScore::new(self.clock.clone())))
                })
                .clone();
            out.push((uri.clone(), score));
        }
        self.entries = next;
        out
    }
}

impl fmt::Debug for ScoreBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoreBoard").field("uris", &self.entries.len()).finish()
    }
}
