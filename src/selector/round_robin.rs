//! Offset-advancing selection, blind to load.

use super::{ScoreBoard, ScoreTracker, Selection, SelectionHints, UriSelector};
use crate::clock::SystemClock;
use crate::uris::BaseUri;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Walks the pool in order, one URI per call. When the pool size changes the
/// starting offset is re-randomized so every client in a fleet does not hit
/// the same host after a config rollout.
pub struct RoundRobinSelector {
    state: Mutex<Inner>,
}

struct Inner {
    board: ScoreBoard,
    offset: usize,
    prev_len: usize,
    rng: StdRng,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            state: Mutex::new(Inner {
                board: ScoreBoard::new(Arc::new(SystemClock::default())),
                offset: 0,
                prev_len: 0,
                rng,
            }),
        }
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RoundRobinSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundRobinSelector").finish_non_exhaustive()
    }
}

impl UriSelector for RoundRobinSelector {
    fn select(&self, uris: &[BaseUri], _hints: &SelectionHints<'_>) -> Option<Selection> {
        let mut inner = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let scored = inner.board.merge(uris);
        if scored.is_empty() {
            inner.prev_len = 0;
            return None;
        }
        if scored.len() != inner.prev_len {
            inner.prev_len = scored.len();
            inner.offset = inner.rng.random_range(0..scored.len());
        }
        let index = inner.offset % scored.len();
        inner.offset = inner.offset.wrapping_add(1);
        let (uri, score) = &scored[index];
        Some(Selection { uri: uri.clone(), tracker: ScoreTracker::new(score.clone()) })
    }
}
