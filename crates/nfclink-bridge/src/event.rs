//! Events delivered to the application.
//!
//! Discovery notifications and secure element transactions arrive on the
//! dispatch thread. They are forwarded over an unbounded channel so the
//! application can consume them from async code or a plain thread.

use tokio::sync::mpsc;
use tracing::warn;

use crate::target::{NfcTag, P2pDevice};

/// Something that happened in the RF field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A tag was discovered.
    TagDiscovered(NfcTag),
    /// A peer-to-peer device was discovered.
    PeerDiscovered(P2pDevice),
    /// The current target left the field or was released.
    TargetDeselected,
    /// The peer link went down.
    LinkDeactivated,
    /// A secure element reported a card emulation transaction.
    Transaction { aid: Vec<u8> },
}

#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSender {
    pub(crate) fn emit(&self, event: SessionEvent) {
        if let Err(err) = self.tx.send(event) {
            warn!("Dropping session event, receiver gone: {:?}", err.0);
        }
    }
}

/// Receiving side of the session's event stream.
#[derive(Debug)]
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    /// Wait for the next event. Returns `None` once the session is dropped.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Block the current thread for the next event.
    ///
    /// Must not be called from inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<SessionEvent> {
        self.rx.blocking_recv()
    }

    /// Take an event if one is ready.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

pub(crate) fn channel() -> (EventSender, SessionEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, SessionEvents { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sender, mut events) = channel();
        sender.emit(SessionEvent::TargetDeselected);
        sender.emit(SessionEvent::Transaction { aid: vec![0xa0, 0x00] });

        assert_eq!(events.recv().await, Some(SessionEvent::TargetDeselected));
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Transaction { aid: vec![0xa0, 0x00] })
        );
        assert_eq!(events.try_recv(), None);
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (sender, events) = channel();
        drop(events);
        sender.emit(SessionEvent::LinkDeactivated);
    }
}
