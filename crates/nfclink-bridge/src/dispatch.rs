//! Dispatch thread.
//!
//! A single named OS thread drains the deferred-work channel and runs each
//! driver callback under the reentrancy guard. It lives from stack bring-up
//! to teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use nfclink_driver::queue::{DeferredQueue, DeferredReceiver, QueueMessage};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::guard::Guards;

const THREAD_NAME: &str = "nfc-dispatch";

/// Handle to a running dispatch thread.
pub struct Dispatcher {
    queue: DeferredQueue,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the dispatch thread draining `receiver`.
    ///
    /// `queue` must be the sending half paired with `receiver`; it is used to
    /// post the termination message.
    pub fn spawn(
        queue: DeferredQueue,
        receiver: DeferredReceiver,
        guards: Arc<Guards>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                run(receiver, &guards);
                flag.store(false, Ordering::SeqCst);
            })?;
        info!("Dispatch thread started");
        Ok(Self {
            queue,
            running,
            thread: Some(thread),
        })
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Post the termination message and detach.
    ///
    /// Callbacks queued before the call still run. Never joins, so it is safe
    /// to call from anywhere, the dispatch thread included.
    pub fn stop(mut self) {
        if !self.running.load(Ordering::SeqCst) {
            warn!("Dispatch thread already exited");
        }
        if !self.queue.terminate() {
            debug!("Dispatch channel already closed");
        }
        self.thread.take();
    }

    /// Stop and wait for the thread to exit.
    #[cfg(test)]
    pub fn stop_and_join(mut self) {
        self.queue.terminate();
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

fn run(mut receiver: DeferredReceiver, guards: &Guards) {
    loop {
        match receiver.blocking_recv() {
            Some(QueueMessage::Call(call)) => {
                let _guard = guards.enter_driver();
                call();
            }
            Some(QueueMessage::Corrupt(reason)) => {
                error!("Dropping undecodable driver message: {}", reason);
            }
            Some(QueueMessage::Terminate) => {
                info!("Dispatch thread terminated");
                break;
            }
            None => {
                warn!("Dispatch channel closed, stopping dispatch thread");
                break;
            }
        }
    }
}
