//! Deferred-work channel between the driver and the dispatch thread.
//!
//! The driver never runs a callback on the thread that issued the request.
//! It wraps the callback and its captured result into a [`DeferredCall`] and
//! posts it here; a single dispatch thread drains the channel in order.

use std::fmt;
use tokio::sync::mpsc;

/// One unit of deferred work, typically a callback invocation.
pub type DeferredCall = Box<dyn FnOnce() + Send + 'static>;

/// Message carried by the deferred-work channel.
pub enum QueueMessage {
    /// Run the callback under the reentrancy guard.
    Call(DeferredCall),

    /// The transport delivered something the driver could not decode.
    Corrupt(String),

    /// Stop the dispatch loop. Delivered in order like any other item.
    Terminate,
}

impl fmt::Debug for QueueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueMessage::Call(_) => f.write_str("Call(..)"),
            QueueMessage::Corrupt(reason) => f.debug_tuple("Corrupt").field(reason).finish(),
            QueueMessage::Terminate => f.write_str("Terminate"),
        }
    }
}

/// Sending half of the deferred-work channel, cloned into the driver.
#[derive(Debug, Clone)]
pub struct DeferredQueue {
    tx: mpsc::UnboundedSender<QueueMessage>,
}

/// Receiving half, owned by the dispatch thread.
#[derive(Debug)]
pub struct DeferredReceiver {
    rx: mpsc::UnboundedReceiver<QueueMessage>,
}

impl DeferredQueue {
    /// Create a connected queue/receiver pair.
    ///
    /// # Examples
    ///
    /// ```
    /// use nfclink_driver::queue::{DeferredQueue, QueueMessage};
    ///
    /// let (queue, mut receiver) = DeferredQueue::channel();
    /// assert!(queue.defer(|| {}));
    /// assert!(matches!(receiver.blocking_recv(), Some(QueueMessage::Call(_))));
    /// ```
    pub fn channel() -> (DeferredQueue, DeferredReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DeferredQueue { tx }, DeferredReceiver { rx })
    }

    /// Post a callback. Returns `false` if the dispatch thread is gone.
    pub fn defer(&self, call: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(QueueMessage::Call(Box::new(call))).is_ok()
    }

    /// Report an undecodable transport message.
    pub fn report_corrupt(&self, reason: impl Into<String>) -> bool {
        self.tx.send(QueueMessage::Corrupt(reason.into())).is_ok()
    }

    /// Ask the dispatch loop to stop after the items already queued.
    pub fn terminate(&self) -> bool {
        self.tx.send(QueueMessage::Terminate).is_ok()
    }

    /// Check whether the receiving half has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl DeferredReceiver {
    /// Block the current OS thread until the next message arrives.
    ///
    /// Returns `None` once every [`DeferredQueue`] has been dropped.
    /// Must not be called from inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<QueueMessage> {
        self.rx.blocking_recv()
    }
}
