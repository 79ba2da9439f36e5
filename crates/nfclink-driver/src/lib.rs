//! Driver abstraction for the contactless bridge.
//!
//! This crate defines the boundary between the synchronous bridge and an
//! asynchronous contactless driver stack:
//!
//! - [`traits::NfcDriver`]: every driver entry point. Requests return a status
//!   immediately; accepted requests complete later through a callback.
//! - [`queue`]: the deferred-work channel the driver posts callbacks to.
//! - [`types`]: handles, discovery configuration, link parameters and
//!   remote device descriptions.
//! - [`mock`]: a scriptable driver for tests and the simulator binary.
//!
//! # Callback delivery
//!
//! ```no_run
//! use nfclink_core::NfcStatus;
//! use nfclink_driver::queue::{DeferredQueue, QueueMessage};
//! use nfclink_driver::traits::NfcDriver;
//! use nfclink_driver::types::DriverConfig;
//!
//! fn start<D: NfcDriver>(driver: &D) {
//!     let (queue, mut receiver) = DeferredQueue::channel();
//!     driver.configure(&DriverConfig::default(), queue);
//!
//!     let status = driver.initialize(Box::new(|status| println!("init: {status}")));
//!     if status == NfcStatus::PENDING {
//!         // The callback arrives through the queue, never inline.
//!         if let Some(QueueMessage::Call(call)) = receiver.blocking_recv() {
//!             call();
//!         }
//!     }
//! }
//! ```

#[cfg(feature = "mock")]
pub mod mock;
pub mod queue;
pub mod traits;
pub mod types;

pub use queue::{DeferredQueue, DeferredReceiver, QueueMessage};
pub use traits::NfcDriver;
