//! Async-to-sync rendezvous.
//!
//! A caller that issued an accepted driver request blocks on a [`Waiter`]
//! until the driver's callback, running on the dispatch thread, fires the
//! matching [`Signal`]. A fresh pair is created for every request:
//!
//! ```text
//!   caller thread                         dispatch thread
//!   ─────────────                         ───────────────
//!   (waiter, signal) = rendezvous()
//!   driver.request(.., callback(signal)) ──► PENDING
//!   waiter.wait(deadline) ─┐
//!                          │              callback(status)
//!                          │◄──────────── signal.complete(status)
//!   result ◄───────────────┘
//! ```
//!
//! The signal doubles as the validity token. Once the waiter is gone
//! (timed out, cancelled, or never waited because the request was refused)
//! the slot is abandoned and any later completion is discarded.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nfclink_core::NfcStatus;
use nfclink_driver::traits::StatusCallback;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::guard::log_completion;

/// Why a wait ended without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("wait timed out")]
    TimedOut,
    #[error("wait cancelled")]
    Cancelled,
}

enum Slot<T> {
    Waiting,
    Completed(T),
    Cancelled,
    Abandoned,
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// Blocking half of a rendezvous, owned by the caller.
pub struct Waiter<T> {
    inner: Arc<Inner<T>>,
}

/// Signalling half, captured by the driver callback.
pub struct Signal<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Create a single-use waiter/signal pair.
///
/// # Examples
///
/// ```
/// use nfclink_bridge::rendezvous::rendezvous;
/// use std::thread;
///
/// let (waiter, signal) = rendezvous::<u32>();
/// thread::spawn(move || {
///     signal.complete(7);
/// });
/// assert_eq!(waiter.wait(None), Ok(7));
/// ```
pub fn rendezvous<T>() -> (Waiter<T>, Signal<T>) {
    let inner = Arc::new(Inner {
        slot: Mutex::new(Slot::Waiting),
        ready: Condvar::new(),
    });
    (
        Waiter {
            inner: Arc::clone(&inner),
        },
        Signal { inner },
    )
}

impl<T> Waiter<T> {
    /// Block until signalled, cancelled or, with a timeout, until it elapses.
    ///
    /// `None` waits without bound.
    pub fn wait(self, timeout: Option<Duration>) -> Result<T, WaitError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut slot = self.inner.slot.lock();

        loop {
            if let Some(outcome) = take_outcome(&mut slot) {
                return outcome;
            }
            match deadline {
                Some(deadline) => {
                    if self.inner.ready.wait_until(&mut slot, deadline).timed_out() {
                        return take_outcome(&mut slot).unwrap_or_else(|| {
                            *slot = Slot::Abandoned;
                            Err(WaitError::TimedOut)
                        });
                    }
                }
                None => self.inner.ready.wait(&mut slot),
            }
        }
    }
}

impl<T> Drop for Waiter<T> {
    fn drop(&mut self) {
        let mut slot = self.inner.slot.lock();
        if !matches!(*slot, Slot::Abandoned) {
            *slot = Slot::Abandoned;
        }
    }
}

/// Take a settled outcome out of the slot, leaving it abandoned.
fn take_outcome<T>(slot: &mut Slot<T>) -> Option<Result<T, WaitError>> {
    match std::mem::replace(slot, Slot::Abandoned) {
        Slot::Completed(value) => Some(Ok(value)),
        Slot::Cancelled => Some(Err(WaitError::Cancelled)),
        other => {
            *slot = other;
            None
        }
    }
}

impl<T> Signal<T> {
    /// Deliver the result. Returns `false` if nobody is waiting anymore or
    /// the rendezvous already settled.
    pub fn complete(&self, value: T) -> bool {
        self.settle(Slot::Completed(value))
    }

    /// Wake the waiter with a cancellation. The driver is not told.
    pub fn cancel(&self) -> bool {
        self.settle(Slot::Cancelled)
    }

    /// Check whether a waiter can still observe a signal.
    pub fn is_live(&self) -> bool {
        matches!(*self.inner.slot.lock(), Slot::Waiting)
    }

    fn settle(&self, outcome: Slot<T>) -> bool {
        let mut slot = self.inner.slot.lock();
        if !matches!(*slot, Slot::Waiting) {
            return false;
        }
        *slot = outcome;
        self.inner.ready.notify_all();
        true
    }
}

struct Queue<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Multi-shot hand-off from a standing callback to a blocking taker.
///
/// Closing drops whatever is queued and wakes every taker.
pub struct Mailbox<T> {
    queue: Mutex<Queue<T>>,
    ready: Condvar,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            queue: Mutex::new(Queue {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `item`. Returns `false` and drops it once the mailbox is closed.
    pub fn post(&self, item: T) -> bool {
        let mut queue = self.queue.lock();
        if queue.closed {
            return false;
        }
        queue.items.push_back(item);
        self.ready.notify_one();
        true
    }

    /// Take the oldest item, blocking up to `timeout` (`None` waits forever).
    ///
    /// Returns `None` on timeout or once the mailbox is closed.
    pub fn take(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut queue = self.queue.lock();
        loop {
            if queue.closed {
                return None;
            }
            if let Some(item) = queue.items.pop_front() {
                return Some(item);
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut queue, deadline).timed_out() {
                        return if queue.closed { None } else { queue.items.pop_front() };
                    }
                }
                None => self.ready.wait(&mut queue),
            }
        }
    }

    pub fn close(&self) {
        let mut queue = self.queue.lock();
        queue.closed = true;
        queue.items.clear();
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }

    pub fn len(&self) -> usize {
        self.queue.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().items.is_empty()
    }
}

/// Convert a caller-facing timeout into a wait bound; zero waits forever.
pub fn bound(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

/// Driver callback that logs its status and completes `signal` with it.
pub fn completion(operation: &'static str, signal: Signal<NfcStatus>) -> StatusCallback {
    Box::new(move |status| {
        log_completion(operation, status);
        if !signal.complete(status) {
            debug!("{} callback arrived with no live waiter, discarded", operation);
        }
    })
}

/// Driver callback that logs its status and completes `signal` with the
/// status and the payload that came with it.
pub fn payload_completion<T: Send + 'static>(
    operation: &'static str,
    signal: Signal<(NfcStatus, T)>,
) -> Box<dyn FnOnce(NfcStatus, T) + Send + 'static> {
    Box::new(move |status, payload| {
        log_completion(operation, status);
        if !signal.complete((status, payload)) {
            debug!("{} callback arrived with no live waiter, discarded", operation);
        }
    })
}

/// Driver callback that only logs its status.
pub fn logged(operation: &'static str) -> StatusCallback {
    Box::new(move |status| log_completion(operation, status))
}
