use std::sync::Arc;

use super::MessageHandler;
use crate::connection::{ConnectionRef, ConnectionRegistry};

/// Relays every message to all registered connections except the sender.
///
/// Always claims the message. Sends happen under the registry lock, so each
/// recipient sees messages in a single total order.
///
/// A recipient that stops reading while its send buffer is full blocks the
/// broadcast, and with it every other registry user, until it reads again or
/// its socket is shut down. `ConnectionManager::stop` shuts client sockets
/// down without taking the registry lock, so it still completes.
///
/// A recipient whose send fails is shut down: its stream may already hold a
/// partial message, and its worker then leaves the registry.
pub struct BroadcastHandler {
    registry: ConnectionRegistry,
}

impl BroadcastHandler {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }
}

impl MessageHandler for BroadcastHandler {
    fn handle(&self, sender: &ConnectionRef, message: &[u8]) -> bool {
        let (delivered, failed) = self.registry.with_connections(|connections| {
            let mut delivered = 0;
            let mut failed = 0;
            for recipient in connections.iter().filter(|c| !Arc::ptr_eq(c, sender)) {
                // ブロードキャストでは一部の送信失敗を許容
                match recipient.send(message) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        failed += 1;
                        tracing::warn!(
                            "Failed to send message to {}, disconnecting it: {}",
                            recipient,
                            e
                        );
                        recipient.shutdown();
                    }
                }
            }
            (delivered, failed)
        });

        tracing::debug!(
            "Broadcasted {} bytes from {} to {} recipient(s), {} failed",
            message.len(),
            sender,
            delivered,
            failed
        );
        true
    }
}
