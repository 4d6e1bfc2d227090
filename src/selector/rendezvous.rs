//! Rendezvous (highest-random-weight) selection keyed by a request header.

use super::{ScoreBoard, ScoreTracker, Selection, SelectionHints, UriSelector};
use crate::clock::SystemClock;
use crate::uris::BaseUri;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::{Arc, Mutex};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: impl IntoIterator<Item = u8>) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Orders the pool by `FNV(uri ‖ key)` where the key comes from a
/// caller-supplied header, so requests sharing a key stick to the same host
/// while the pool membership shifts underneath. Without the header the pick
/// is uniformly random.
pub struct RendezvousSelector {
    header: String,
    state: Mutex<Inner>,
}

struct Inner {
    board: ScoreBoard,
    rng: StdRng,
}

impl RendezvousSelector {
    pub fn new(header: impl Into<String>) -> Self {
        Self::with_rng(header, StdRng::from_os_rng())
    }

    pub fn with_rng(header: impl Into<String>, rng: StdRng) -> Self {
        Self {
            header: header.into(),
            state: Mutex::new(Inner { board: ScoreBoard::new(Arc::new(SystemClock::default())), rng }),
        }
    }
}

impl fmt::Debug for RendezvousSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendezvousSelector").field("header", &self.header).finish()
    }
}

impl UriSelector for RendezvousSelector {
    fn select(&self, uris: &[BaseUri], hints: &SelectionHints<'_>) -> Option<Selection> {
        let mut inner = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let scored = inner.board.merge(uris);
        if scored.is_empty() {
            return None;
        }
        let index = match hints.header_value {
            Some(key) => scored
                .iter()
                .enumerate()
                .max_by_key(|(_, (uri, _))| {
                    fnv1a(uri.selector_key().bytes().chain(key.bytes()))
                })
                .map(|(i, _)| i)
                .unwrap_or(0),
            None => inner.rng.random_range(0..scored.len()),
        };
        let (uri, score) = &scored[index];
        Some(Selection { uri: uri.clone(), tracker: ScoreTracker::new(score.clone()) })
    }

    fn key_header(&self) -> Option<&str> {
        Some(&self.header)
    }
}
