//! Per-call retry decisions.
//!
//! The retrier never sleeps and never picks URIs. It answers one question
//! per attempt (try again? where? after how long?) and the dispatcher acts
//! on the answer.

use crate::backoff::ExponentialBackoff;
use crate::error::Error;
use crate::params::RetryParams;
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

/// What the dispatcher should do after an attempt.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Decision {
    /// Return the last response or error to the caller.
    Stop,
    /// Attempt again. `backoff` is slept first; `target` overrides the
    /// selector (a followed redirect), otherwise the selector picks.
    Retry { backoff: Option<Duration>, target: Option<Url> },
}

/// Status + redirect target of a completed attempt, when a response arrived.
#[derive(Debug, Clone)]
pub(crate) struct AttemptMeta {
    pub status: u16,
    pub location: Option<String>,
}

#[derive(Debug)]
pub(crate) struct Retrier {
    /// 0 means unlimited.
    max_attempts: u32,
    attempts: u32,
    /// Mesh URIs and consumed one-shot bodies forbid further attempts.
    terminal: bool,
    backoff: ExponentialBackoff,
    attempted: HashSet<String>,
}

impl Retrier {
    pub fn new(max_attempts: u32, retry: &RetryParams) -> Self {
        Self {
            max_attempts,
            attempts: 0,
            terminal: false,
            backoff: ExponentialBackoff::new(
                retry.initial_backoff,
                retry.max_backoff,
                retry.multiplier,
                retry.randomization,
            ),
            attempted: HashSet::new(),
        }
    }

    /// Forbid any attempt after the current one.
    pub fn mark_terminal(&mut self) {
        self.terminal = true;
    }

    pub fn record_attempt(&mut self, selector_key: &str) {
        self.attempted.insert(selector_key.to_string());
    }

    pub fn attempted(&self) -> &HashSet<String> {
        &self.attempted
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Classify the previous attempt. First match wins, in decision-table
    /// order; terminal calls and exhausted budgets stop everything.
    pub fn next(
        &mut self,
        outcome: &Result<AttemptMeta, &Error>,
        current_url: &Url,
    ) -> Decision {
        self.attempts += 1;

        let decision = match outcome {
            Ok(meta) if (200..300).contains(&meta.status) => Decision::Stop,
            Ok(meta) if meta.status == 307 || meta.status == 308 => {
                // Relative Location resolves against the URL we just hit.
                let target =
                    meta.location.as_deref().and_then(|loc| current_url.join(loc).ok());
                Decision::Retry { backoff: None, target }
            }
            // Other statuses that reached us as a response (1xx/3xx) are the
            // caller's business.
            Ok(_) => Decision::Stop,
            Err(error) => self.classify_error(error),
        };

        match decision {
            Decision::Retry { .. } if self.terminal => Decision::Stop,
            Decision::Retry { .. }
                if self.max_attempts != 0 && self.attempts >= self.max_attempts =>
            {
                Decision::Stop
            }
            other => other,
        }
    }

    fn classify_error(&mut self, error: &Error) -> Decision {
        match error {
            Error::Status { status: 429, retry_after: Some(delay), .. } => {
                // An explicit server hint restarts the schedule: the next
                // unhinted failure backs off from the initial delay again.
                self.backoff.reset();
                Decision::Retry { backoff: Some(*delay), target: None }
            }
            Error::Status { status: 429, retry_after: None, .. } => {
                Decision::Retry { backoff: Some(self.backoff.next_delay()), target: None }
            }
            Error::Status { status, .. } if (500..=599).contains(status) => {
                Decision::Retry { backoff: Some(self.backoff.next_delay()), target: None }
            }
            // Remaining 4xx: the request itself is wrong; repeating it
            // cannot help.
            Error::Status { .. } => Decision::Stop,
            Error::Transport { .. } => {
                Decision::Retry { backoff: Some(self.backoff.next_delay()), target: None }
            }
            _ => Decision::Stop,
        }
    }
}
