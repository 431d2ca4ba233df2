//! Message handlers.
//!
//! A worker hands every inbound line to a single [`MessageHandler`], normally a
//! [`ChainedHandler`] that tries its members in order until one claims the
//! message.

mod broadcast;
mod chain;

pub use broadcast::BroadcastHandler;
pub use chain::ChainedHandler;

use crate::connection::ConnectionRef;

/// Capability shared by every handler: try to handle one message.
#[cfg_attr(test, mockall::automock)]
pub trait MessageHandler: Send + Sync {
    /// Returns `true` if this handler claimed the message.
    fn handle(&self, sender: &ConnectionRef, message: &[u8]) -> bool;
}
