//! Ownership tokens for stream resources.
//!
//! A [`ReleaseToken`] runs its release callback exactly once: on explicit release, or on drop
//! if it was never released. Deferred-mode factories park tokens in [`PendingReleases`] until
//! the exported stream is released, and flush whatever is left when they close.
//!
//! Release callbacks never run while the pending-queue lock is held.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use scanbridge_common::{MetricsRegistry, ReleaseTicket};
use tracing::debug;

type ReleaseFn = Box<dyn FnOnce() + Send + 'static>;

/// Exactly-once release of a resource held on behalf of a stream.
pub struct ReleaseToken {
    release: Option<ReleaseFn>,
}

impl ReleaseToken {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A token with nothing to release.
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// Token whose release drops `value`.
    pub fn owning<T: Send + 'static>(value: T) -> Self {
        Self::new(move || drop(value))
    }

    pub fn is_pending(&self) -> bool {
        self.release.is_some()
    }

    /// Runs the release callback now.
    pub fn release(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        self.fire();
    }
}

impl fmt::Debug for ReleaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseToken")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// How a factory hands stream ownership to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    /// The exported stream owns the token and releases it when the stream is released.
    Immediate,
    /// The factory also tracks the token and force-releases it at close.
    Deferred,
}

impl ReleaseMode {
    pub fn from_deferred(deferred: bool) -> Self {
        if deferred {
            ReleaseMode::Deferred
        } else {
            ReleaseMode::Immediate
        }
    }
}

#[derive(Default)]
struct PendingState {
    next_ticket: u64,
    queue: VecDeque<(ReleaseTicket, ReleaseToken)>,
}

/// Mutex-guarded FIFO of deferred release tokens.
pub struct PendingReleases {
    view: String,
    metrics: MetricsRegistry,
    state: Mutex<PendingState>,
}

impl PendingReleases {
    pub fn new(view: impl Into<String>, metrics: MetricsRegistry) -> Arc<Self> {
        Arc::new(Self {
            view: view.into(),
            metrics,
            state: Mutex::new(PendingState::default()),
        })
    }

    /// Recovers a poisoned lock; no queue operation leaves the state half-updated.
    fn state(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `token` and returns the ticket that resolves it.
    pub fn enqueue(&self, token: ReleaseToken) -> ReleaseTicket {
        let (ticket, pending) = {
            let mut state = self.state();
            state.next_ticket += 1;
            let ticket = ReleaseTicket(state.next_ticket);
            state.queue.push_back((ticket, token));
            (ticket, state.queue.len())
        };
        self.metrics.inc_releases_queued(&self.view);
        self.metrics
            .set_pending_releases(&self.view, pending as u64);
        debug!(view = %self.view, %ticket, pending, "deferred release queued");
        ticket
    }

    /// Releases the token behind `ticket` if it is still queued.
    ///
    /// Returns `false` when the ticket was already resolved or flushed.
    pub fn resolve(&self, ticket: ReleaseTicket) -> bool {
        let (token, pending) = {
            let mut state = self.state();
            let position = state.queue.iter().position(|(t, _)| *t == ticket);
            let token = position
                .and_then(|pos| state.queue.remove(pos))
                .map(|(_, token)| token);
            (token, state.queue.len())
        };
        self.metrics
            .set_pending_releases(&self.view, pending as u64);
        match token {
            Some(token) => {
                token.release();
                true
            }
            None => false,
        }
    }

    /// Drains and releases every queued token in the order they were queued.
    pub fn flush(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state();
            state.queue.drain(..).collect()
        };
        let flushed = drained.len();
        for (_, token) in drained {
            token.release();
        }
        self.metrics.set_pending_releases(&self.view, 0);
        if flushed > 0 {
            self.metrics
                .add_releases_flushed(&self.view, flushed as u64);
            debug!(view = %self.view, flushed, "flushed deferred releases");
        }
        flushed
    }

    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Release handle carried by an exported stream; fires when the stream is dropped.
pub struct StreamGuard {
    inner: GuardInner,
}

enum GuardInner {
    Immediate(#[allow(dead_code)] ReleaseToken),
    Deferred {
        ticket: ReleaseTicket,
        queue: Weak<PendingReleases>,
    },
}

impl StreamGuard {
    /// Wraps `token` according to `mode`, queueing it on `pending` for deferred mode.
    pub fn new(token: ReleaseToken, mode: ReleaseMode, pending: &Arc<PendingReleases>) -> Self {
        let inner = match mode {
            ReleaseMode::Immediate => GuardInner::Immediate(token),
            ReleaseMode::Deferred => GuardInner::Deferred {
                ticket: pending.enqueue(token),
                queue: Arc::downgrade(pending),
            },
        };
        Self { inner }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let GuardInner::Deferred { ticket, queue } = &self.inner {
            // A flushed or dropped queue already released the token.
            if let Some(queue) = queue.upgrade() {
                queue.resolve(*ticket);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting() -> (Arc<AtomicUsize>, impl Fn() -> ReleaseToken) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let make = move || {
            let c = c.clone();
            ReleaseToken::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
        };
        (count, make)
    }

    fn pending() -> Arc<PendingReleases> {
        PendingReleases::new("t", MetricsRegistry::new())
    }

    #[test]
    fn tokens_release_once_explicitly_or_on_drop() {
        let (count, make) = counting();
        make().release();
        drop(make());
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(!ReleaseToken::noop().is_pending());
    }

    #[test]
    fn immediate_guards_release_on_drop() {
        let (count, make) = counting();
        let queue = pending();
        let guard = StreamGuard::new(make(), ReleaseMode::Immediate, &queue);
        assert!(queue.is_empty());
        drop(guard);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_guards_resolve_their_own_ticket() {
        let (count, make) = counting();
        let queue = pending();
        let first = StreamGuard::new(make(), ReleaseMode::Deferred, &queue);
        let second = StreamGuard::new(make(), ReleaseMode::Deferred, &queue);
        assert_eq!(queue.len(), 2);
        drop(second);
        assert_eq!(queue.len(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        drop(first);
        assert!(queue.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(queue.flush(), 0);
    }

    #[test]
    fn flush_releases_in_queue_order_and_never_twice() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let queue = pending();
        let guards: Vec<_> = (0..3)
            .map(|i| {
                let order = order.clone();
                let token = ReleaseToken::new(move || order.lock().expect("lock").push(i));
                StreamGuard::new(token, ReleaseMode::Deferred, &queue)
            })
            .collect();
        assert_eq!(queue.flush(), 3);
        assert_eq!(*order.lock().expect("lock"), vec![0, 1, 2]);
        // Streams finishing after the flush find nothing left to release.
        drop(guards);
        assert_eq!(order.lock().expect("lock").len(), 3);
    }

    #[test]
    fn flush_recovers_a_poisoned_queue() {
        let (count, make) = counting();
        let queue = pending();
        let guard = StreamGuard::new(make(), ReleaseMode::Deferred, &queue);
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _state = queue.state.lock().expect("first lock");
            panic!("panicked while queueing");
        }));
        assert!(poisoned.is_err());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.flush(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        drop(guard);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guards_outliving_the_queue_do_nothing() {
        let (count, make) = counting();
        let queue = pending();
        let guard = StreamGuard::new(make(), ReleaseMode::Deferred, &queue);
        drop(queue);
        // Dropping the queue dropped (and so released) its tokens.
        assert_eq!(count.load(Ordering::SeqCst), 1);
        drop(guard);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
