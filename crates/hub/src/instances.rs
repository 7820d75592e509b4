//! Connected desktop runtime instances, keyed by client id.
//!
//! The table keeps the most recent instance per client id: a re-handshake
//! from the same client replaces the prior entry. Connection sequence
//! numbers stop a replaced connection's close handler from unregistering
//! its replacement.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use deskbridge_core::protocol::{Capabilities, ServerMessage};

#[derive(Debug)]
pub struct RuntimeInstance {
    pub client_id: String,
    pub instance_id: String,
    pub capabilities: Capabilities,
    pub sender: mpsc::Sender<ServerMessage>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub conn_seq: u64,
}

/// Where (and on what platform) a runtime's embedded engine can be
/// debugged. Read off the handshake capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEndpoint {
    pub debug_host: String,
    pub debug_port: u16,
    pub platform: String,
}

/// Summary shape for the `/v1/instances` status surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub client_id: String,
    pub instance_id: String,
    pub version: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct InstanceTable {
    instances: HashMap<String, RuntimeInstance>,
    next_seq: u64,
}

impl InstanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly handshaken instance, replacing any prior one for
    /// the same client id. Returns the connection sequence number.
    pub fn register(
        &mut self,
        client_id: String,
        instance_id: String,
        capabilities: Capabilities,
        sender: mpsc::Sender<ServerMessage>,
    ) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        let now = Utc::now();
        self.instances.insert(
            client_id.clone(),
            RuntimeInstance {
                client_id,
                instance_id,
                capabilities,
                sender,
                connected_at: now,
                last_seen: now,
                conn_seq: seq,
            },
        );
        seq
    }

    /// Remove the instance only if it is still the one identified by `seq`.
    /// Returns true when an entry was actually removed.
    pub fn remove_if_current(&mut self, client_id: &str, seq: u64) -> bool {
        match self.instances.get(client_id) {
            Some(instance) if instance.conn_seq == seq => {
                self.instances.remove(client_id);
                true
            }
            _ => false,
        }
    }

    pub fn has(&self, client_id: &str) -> bool {
        self.instances.contains_key(client_id)
    }

    pub fn sender(&self, client_id: &str) -> Option<mpsc::Sender<ServerMessage>> {
        self.instances.get(client_id).map(|i| i.sender.clone())
    }

    pub fn debug_endpoint(&self, client_id: &str) -> Option<InstanceEndpoint> {
        self.instances.get(client_id).map(|i| InstanceEndpoint {
            debug_host: i.capabilities.debug_host.clone(),
            debug_port: i.capabilities.debug_port,
            platform: i.capabilities.platform.clone(),
        })
    }

    pub fn touch(&mut self, client_id: &str) {
        if let Some(instance) = self.instances.get_mut(client_id) {
            instance.last_seen = Utc::now();
        }
    }

    pub fn list(&self) -> Vec<InstanceSummary> {
        let mut summaries: Vec<_> = self
            .instances
            .values()
            .map(|i| InstanceSummary {
                client_id: i.client_id.clone(),
                instance_id: i.instance_id.clone(),
                version: i.capabilities.version.clone(),
                connected_at: i.connected_at,
                last_seen: i.last_seen,
            })
            .collect();
        summaries.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        summaries
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Capabilities {
        Capabilities {
            version: "0.2.1".into(),
            platform: "linux".into(),
            debug_host: "127.0.0.1".into(),
            debug_port: 9222,
            features: vec![],
        }
    }

    #[test]
    fn rehandshake_replaces_prior_instance() {
        let mut table = InstanceTable::new();
        let (tx1, _rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);

        let seq1 = table.register("c1".into(), "inst-a".into(), caps(), tx1);
        let seq2 = table.register("c1".into(), "inst-b".into(), caps(), tx2);
        assert_ne!(seq1, seq2);
        assert_eq!(table.len(), 1);

        // The replaced connection's close must not evict the replacement.
        assert!(!table.remove_if_current("c1", seq1));
        assert!(table.has("c1"));
        assert!(table.remove_if_current("c1", seq2));
        assert!(!table.has("c1"));
    }

    #[test]
    fn debug_endpoint_comes_from_capabilities() {
        let mut table = InstanceTable::new();
        let (tx, _rx) = mpsc::channel(4);
        table.register("c1".into(), "inst-a".into(), caps(), tx);
        let endpoint = table.debug_endpoint("c1").unwrap();
        assert_eq!(endpoint.debug_host, "127.0.0.1");
        assert_eq!(endpoint.debug_port, 9222);
        assert_eq!(endpoint.platform, "linux");
        assert!(table.debug_endpoint("c2").is_none());
    }
}
