//! Synchronous bridge over an asynchronous contactless driver stack.
//!
//! The driver accepts requests immediately and completes them later through
//! callbacks posted to a deferred-work queue. This crate turns that into
//! plain blocking calls:
//!
//! - [`Session`]: lifecycle, discovery, tags, peers and secure elements;
//! - [`Socket`], [`ServiceSocket`], [`ConnectionlessSocket`]: link-layer
//!   sockets on top of an activated peer link;
//! - [`SessionEvents`]: discovery and transaction notifications.
//!
//! A dedicated dispatch thread drains the queue and runs every callback
//! under the same reentrancy guard that protects driver calls, so the
//! driver is never entered concurrently.
//!
//! # Recovery
//!
//! When the driver refuses to resume polling the session restarts the whole
//! stack and restores the discovery configuration it had before.

mod dispatch;
mod guard;
mod peer;
mod secure_element;
mod session;
mod tag;

pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod rendezvous;
pub mod socket;
pub mod target;

pub use config::SessionConfig;
pub use discovery::{DiscoveryMode, Property};
pub use error::{BridgeError, Result};
pub use event::{SessionEvent, SessionEvents};
pub use lifecycle::LifecycleState;
pub use peer::LinkState;
pub use session::{Session, Teardown};
pub use socket::{ConnectionlessSocket, ServiceSocket, Socket, SocketState};
pub use target::{DiscoveredTarget, NfcTag, P2pDevice, P2pMode};
