//! Load-aware selection: fewest inflight requests, fewest recent failures.

use super::{ScoreBoard, ScoreTracker, Selection, SelectionHints, UriSelector};
use crate::clock::{Clock, SystemClock};
use crate::uris::BaseUri;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;
use std::sync::{Arc, Mutex};

/// The default selector. Scores each URI as `inflight + round(failures)` and
/// picks the lowest. The candidate order is shuffled before the stable sort
/// so equal scores do not bias toward the first configured host.
pub struct BalancedSelector {
    state: Mutex<Inner>,
}

struct Inner {
    board: ScoreBoard,
    rng: StdRng,
}

impl BalancedSelector {
    pub fn new() -> Self {
        Self::with_parts(Arc::new(SystemClock::default()), StdRng::from_os_rng())
    }

    /// Deterministic construction for tests and benchmarks.
    pub fn with_rng(rng: StdRng) -> Self {
        Self::with_parts(Arc::new(SystemClock::default()), rng)
    }

    pub(crate) fn with_parts(clock: Arc<dyn Clock>, rng: StdRng) -> Self {
        Self { state: Mutex::new(Inner { board: ScoreBoard::new(clock), rng }) }
    }
}

impl Default for BalancedSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BalancedSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BalancedSelector").finish_non_exhaustive()
    }
}

impl UriSelector for BalancedSelector {
    fn select(&self, uris: &[BaseUri], _hints: &SelectionHints<'_>) -> Option<Selection> {
        let mut inner = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let scored = inner.board.merge(uris);
        if scored.is_empty() {
            return None;
        }
        let mut order: Vec<usize> = (0..scored.len()).collect();
        order.shuffle(&mut inner.rng);
        // sort_by_key is stable, so the shuffle decides ties.
        order.sort_by_key(|&i| scored[i].1.score());
        let (uri, score) = &scored[order[0]];
        Some(Selection { uri: uri.clone(), tracker: ScoreTracker::new(score.clone()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn uris(names: &[&str]) -> Vec<BaseUri> {
        names.iter().map(|n| BaseUri::parse(&format!("https://{n}")).unwrap()).collect()
    }

    fn seeded() -> BalancedSelector {
        BalancedSelector::with_rng(StdRng::seed_from_u64(17))
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let selector = seeded();
        assert!(selector.select(&[], &SelectionHints::default()).is_none());
    }

    #[test]
    fn single_uri_is_always_chosen() {
        let selector = seeded();
        let pool = uris(&["only"]);
        for _ in 0..10 {
            let s = selector.select(&pool, &SelectionHints::default()).unwrap();
            assert_eq!(s.uri, pool[0]);
        }
    }

    #[test]
    fn avoids_uris_with_inflight_load() {
        let selector = seeded();
        let pool = uris(&["a", "b"]);
        let first = selector.select(&pool, &SelectionHints::default()).unwrap();
        let _guard = first.tracker.track();
        // With one request pinned on the first pick, the other URI wins.
        for _ in 0..10 {
            let next = selector.select(&pool, &SelectionHints::default()).unwrap();
            assert_ne!(next.uri, first.uri);
        }
    }

    #[test]
    fn avoids_uris_with_recent_failures() {
        let selector = seeded();
        let pool = uris(&["a", "b", "c"]);
        let bad = selector.select(&pool, &SelectionHints::default()).unwrap();
        bad.tracker.observe(Some(503));
        for _ in 0..20 {
            let next = selector.select(&pool, &SelectionHints::default()).unwrap();
            assert_ne!(next.uri, bad.uri);
        }
    }

    #[test]
    fn client_errors_barely_move_the_needle() {
        let selector = seeded();
        let pool = uris(&["a", "b"]);
        let picked = selector.select(&pool, &SelectionHints::default()).unwrap();
        picked.tracker.observe(Some(404));
        // 0.1 rounds to zero, so the URI remains in rotation.
        let mut saw_it_again = false;
        for _ in 0..50 {
            let next = selector.select(&pool, &SelectionHints::default()).unwrap();
            if next.uri == picked.uri {
                saw_it_again = true;
                break;
            }
        }
        assert!(saw_it_again);
    }

    #[test]
    fn equal_scores_spread_evenly() {
        // With no feedback, M calls over N uris should land close to M/N
        // each; allow a generous O(sqrt(M)) band.
        let selector = seeded();
        let pool = uris(&["a", "b", "c", "d"]);
        let total = 4000usize;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..total {
            let s = selector.select(&pool, &SelectionHints::default()).unwrap();
            *counts.entry(s.uri.selector_key().to_string()).or_default() += 1;
        }
        let expected = total / pool.len();
        let band = 4.0 * (total as f64).sqrt();
        for (key, count) in counts {
            let diff = (count as f64 - expected as f64).abs();
            assert!(diff < band, "{key}: {count} vs {expected} (band {band})");
        }
    }

    #[test]
    fn state_survives_pool_updates() {
        let selector = seeded();
        let pool = uris(&["a", "b"]);
        let bad = selector.select(&pool, &SelectionHints::default()).unwrap();
        bad.tracker.observe(Some(503));

        // Same URIs plus one new; failure memory must persist.
        let grown = uris(&["a", "b", "c"]);
        for _ in 0..10 {
            let next = selector.select(&grown, &SelectionHints::default()).unwrap();
            assert_ne!(next.uri, bad.uri);
        }
    }
}
