//! Live-reloadable values with change notification and derivation.
//!
//! A [`Refreshable`] holds the current value behind an `ArcSwap` so reads are
//! lock-free; subscriber lists live behind a mutex that is released before
//! callbacks run. Updates propagate synchronously, in registration order, on
//! the updating thread. Derivations gate on structural equality at both ends:
//! a derived cell recomputes only when its input actually changed, and it
//! notifies only when the derived value itself changed.

use arc_swap::{ArcSwap, ArcSwapOption};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, ThreadId};
use thiserror::Error;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpdateError {
    /// A subscriber attempted to set the cell that is currently notifying it.
    /// The nested update is rejected and the cell keeps its prior value.
    #[error("recursive refreshable update detected; cell left unchanged")]
    RecursiveUpdate,
}

struct Cell<T> {
    value: ArcSwap<T>,
    subscribers: Mutex<Vec<(u64, Callback<T>)>>,
    next_id: AtomicU64,
    /// Serializes writers across threads.
    write: Mutex<()>,
    /// Thread currently delivering notifications for this cell.
    propagating: Mutex<Option<ThreadId>>,
}

/// A process-wide value with change notification and lazy derivation.
pub struct Refreshable<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Clone for Refreshable<T> {
    fn clone(&self) -> Self {
        Self { cell: self.cell.clone() }
    }
}

impl<T: fmt::Debug> fmt::Debug for Refreshable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Refreshable").field("current", &self.cell.value.load()).finish()
    }
}

/// Handle returned by [`Refreshable::subscribe`]. Dropping it leaves the
/// subscription registered; call [`unsubscribe`](Subscription::unsubscribe)
/// to remove it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

impl<T: PartialEq + Send + Sync + 'static> Refreshable<T> {
    pub fn new(value: T) -> Self {
        Self {
            cell: Arc::new(Cell {
                value: ArcSwap::from_pointee(value),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                write: Mutex::new(()),
                propagating: Mutex::new(None),
            }),
        }
    }

    /// Snapshot of the current value.
    pub fn current(&self) -> Arc<T> {
        self.cell.value.load_full()
    }

    /// Replace the value. Equal values are a no-op: subscribers only observe
    /// actual changes. Fails if called from inside one of this cell's own
    /// subscriber callbacks, which would mean a derivation cycle.
    pub fn set(&self, value: T) -> Result<(), UpdateError> {
        {
            let active = self.cell.propagating.lock().unwrap_or_else(|p| p.into_inner());
            if *active == Some(thread::current().id()) {
                return Err(UpdateError::RecursiveUpdate);
            }
        }
        let _write = self.cell.write.lock().unwrap_or_else(|p| p.into_inner());
        {
            let current = self.cell.value.load();
            if **current == value {
                return Ok(());
            }
        }
        self.cell.value.store(Arc::new(value));
        self.notify();
        Ok(())
    }

    fn notify(&self) {
        *self.cell.propagating.lock().unwrap_or_else(|p| p.into_inner()) =
            Some(thread::current().id());
        let callbacks: Vec<Callback<T>> = self
            .cell
            .subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        let current = self.cell.value.load_full();
        for cb in callbacks {
            cb(&current);
        }
        *self.cell.propagating.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    /// Register `f`; it runs immediately with the current value and again on
    /// every subsequent change, in registration order.
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let cb: Callback<T> = Arc::new(f);
        let id = self.register(cb.clone());
        cb(&self.current());
        let weak = Arc::downgrade(&self.cell);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(cell) = weak.upgrade() {
                    cell.subscribers
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .retain(|(sid, _)| *sid != id);
                }
            })),
        }
    }

    fn register(&self, cb: Callback<T>) -> u64 {
        let id = self.cell.next_id.fetch_add(1, Ordering::SeqCst);
        self.cell.subscribers.lock().unwrap_or_else(|p| p.into_inner()).push((id, cb));
        id
    }

    /// Derive a refreshable that recomputes only when this one actually
    /// changes, and notifies its own subscribers only when the derived value
    /// differs from the previous one.
    pub fn map<U, F>(&self, f: F) -> Refreshable<U>
    where
        U: PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let derived = Refreshable::new(f(&self.current()));
        let weak = Arc::downgrade(&derived.cell);
        self.register(Arc::new(move |t: &T| {
            if let Some(cell) = weak.upgrade() {
                let child = Refreshable { cell };
                if let Err(err) = child.set(f(t)) {
                    tracing::warn!(error = %err, "refreshable derivation update rejected");
                }
            }
        }));
        derived
    }

    /// Like [`map`](Refreshable::map), but the derivation can fail. The
    /// initial value must be valid. Later invalid snapshots are retained as
    /// [`Validated::last_error`] while consumers keep the prior valid value.
    pub fn map_validated<U, E, F>(&self, f: F) -> Result<Validated<U, E>, E>
    where
        U: PartialEq + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(&T) -> Result<U, E> + Send + Sync + 'static,
    {
        let initial = f(&self.current())?;
        let derived = Refreshable::new(initial);
        let last_error: Arc<ArcSwapOption<E>> = Arc::new(ArcSwapOption::empty());
        let weak = Arc::downgrade(&derived.cell);
        let error_slot = last_error.clone();
        self.register(Arc::new(move |t: &T| match f(t) {
            Ok(value) => {
                error_slot.store(None);
                if let Some(cell) = weak.upgrade() {
                    let child = Refreshable { cell };
                    if let Err(err) = child.set(value) {
                        tracing::warn!(error = %err, "refreshable derivation update rejected");
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "invalid config snapshot; keeping prior value");
                error_slot.store(Some(Arc::new(err)));
            }
        }));
        Ok(Validated { inner: derived, last_error })
    }
}

/// A validated derivation: the latest valid value plus the most recent
/// validation failure, if any.
pub struct Validated<U, E> {
    inner: Refreshable<U>,
    last_error: Arc<ArcSwapOption<E>>,
}

impl<U: PartialEq + Send + Sync + 'static, E> Validated<U, E> {
    pub fn refreshable(&self) -> Refreshable<U> {
        self.inner.clone()
    }

    pub fn current(&self) -> Arc<U> {
        self.inner.current()
    }

    /// The error from the most recent rejected snapshot. Cleared by the next
    /// valid one.
    pub fn last_error(&self) -> Option<Arc<E>> {
        self.last_error.load_full()
    }
}

impl<U: fmt::Debug, E> fmt::Debug for Validated<U, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validated").field("current", &self.inner.cell.value.load()).finish()
    }
}
