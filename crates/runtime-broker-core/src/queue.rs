// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hand-off of operation IDs to the executor.

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Best-effort hand-off of a stored operation to its executor.
///
/// The operation row exists before `add` is called, so a lost hand-off is
/// recovered by re-reading pending operations rather than reported here.
pub trait Queue: Send + Sync {
    /// Schedule `operation_id` for execution.
    fn add(&self, operation_id: &str);
}

/// Queue backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    name: &'static str,
    sender: mpsc::UnboundedSender<String>,
}

impl ChannelQueue {
    /// Create a queue and the receiver an executor drains.
    pub fn new(name: &'static str) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { name, sender }, receiver)
    }
}

impl Queue for ChannelQueue {
    fn add(&self, operation_id: &str) {
        match self.sender.send(operation_id.to_string()) {
            Ok(()) => debug!(queue = self.name, operation_id, "Operation queued"),
            Err(_) => warn!(
                queue = self.name,
                operation_id, "Executor gone, operation left for the next sweep"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_queue_delivers_in_order() {
        let (queue, mut rx) = ChannelQueue::new("provisioning");
        queue.add("op-1");
        queue.add("op-2");
        assert_eq!(rx.recv().await.as_deref(), Some("op-1"));
        assert_eq!(rx.recv().await.as_deref(), Some("op-2"));
    }

    #[tokio::test]
    async fn test_closed_queue_does_not_panic() {
        let (queue, rx) = ChannelQueue::new("update");
        drop(rx);
        queue.add("op-1");
    }
}
