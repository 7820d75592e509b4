//! Outstanding commands awaiting acknowledgement, keyed by request id.
//!
//! Every entry is resolved or rejected exactly once: completion removes the
//! entry before touching its sender, so a concurrent ack and instance
//! disconnect cannot both fire.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::oneshot;

use deskbridge_core::error::{Error, Result};
use deskbridge_core::protocol::AckFrame;

struct PendingEntry {
    tx: oneshot::Sender<Result<AckFrame>>,
    client_id: String,
    #[allow(dead_code)]
    issued_at: Instant,
}

#[derive(Default)]
pub struct PendingCommands {
    entries: HashMap<String, PendingEntry>,
}

impl PendingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh request id. The receiver resolves on ack, instance
    /// disconnect, or is dropped by the dispatcher's own deadline cleanup.
    pub fn insert(
        &mut self,
        request_id: String,
        client_id: String,
    ) -> oneshot::Receiver<Result<AckFrame>> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            request_id,
            PendingEntry {
                tx,
                client_id,
                issued_at: Instant::now(),
            },
        );
        rx
    }

    /// Resolve one pending command with its ack. Returns false when the
    /// request id is unknown (already timed out, disconnected, or stale).
    pub fn complete(&mut self, ack: AckFrame) -> bool {
        match self.entries.remove(&ack.request_id) {
            Some(entry) => {
                let _ = entry.tx.send(Ok(ack));
                true
            }
            None => false,
        }
    }

    /// Drop a pending command without resolving it (dispatch-side cleanup
    /// after a send failure or deadline expiry).
    pub fn discard(&mut self, request_id: &str) {
        self.entries.remove(request_id);
    }

    /// Fail every pending command for a disconnected instance immediately,
    /// rather than leaving them to time out. Returns the number failed.
    pub fn fail_all_for_client(&mut self, client_id: &str) -> usize {
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.client_id == client_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            if let Some(entry) = self.entries.remove(id) {
                let _ = entry
                    .tx
                    .send(Err(Error::Channel("runtime disconnected".into())));
            }
        }
        ids.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn ack_resolves_pending_once() {
        let mut pending = PendingCommands::new();
        let rx = pending.insert("r1".into(), "c1".into());

        assert!(pending.complete(AckFrame::success("r1".into(), json!({"viewId": "v1"}))));
        // Second resolution attempt finds nothing.
        assert!(!pending.complete(AckFrame::success("r1".into(), json!({}))));

        let ack = rx.await.unwrap().unwrap();
        assert!(ack.ok);
    }

    #[tokio::test]
    async fn disconnect_fails_all_for_instance() {
        let mut pending = PendingCommands::new();
        let rx1 = pending.insert("r1".into(), "c1".into());
        let rx2 = pending.insert("r2".into(), "c1".into());
        let rx3 = pending.insert("r3".into(), "c2".into());

        assert_eq!(pending.fail_all_for_client("c1"), 2);
        assert_eq!(pending.len(), 1);

        assert!(matches!(rx1.await.unwrap(), Err(Error::Channel(_))));
        assert!(matches!(rx2.await.unwrap(), Err(Error::Channel(_))));

        // The other instance's command is untouched.
        assert!(pending.complete(AckFrame::success("r3".into(), json!(null))));
        assert!(rx3.await.unwrap().unwrap().ok);
    }

    #[tokio::test]
    async fn ack_and_disconnect_race_resolves_exactly_once() {
        // Whichever side removes the entry first wins; the loser is a no-op.
        let mut pending = PendingCommands::new();
        let rx = pending.insert("r1".into(), "c1".into());

        assert!(pending.complete(AckFrame::failure("r1".into(), "nope".into())));
        assert_eq!(pending.fail_all_for_client("c1"), 0);

        let ack = rx.await.unwrap().unwrap();
        assert!(!ack.ok);
    }
}
