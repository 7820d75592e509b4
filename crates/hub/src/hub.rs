//! The server hub: routes commands to connected desktop runtimes and
//! correlates their acknowledgements.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use deskbridge_core::error::{Error, Result};
use deskbridge_core::protocol::{AckFrame, CommandFrame, CommandKind, Hello, ServerMessage};
use deskbridge_core::records::RecordStores;
use deskbridge_core::Config;

use crate::instances::{InstanceEndpoint, InstanceSummary, InstanceTable};
use crate::pending::PendingCommands;
use crate::registry::{PageTargetRecord, PageTargetRegistry, RuntimeInfoUpdate};

pub struct Hub {
    config: Config,
    instances: Mutex<InstanceTable>,
    pending: Mutex<PendingCommands>,
    registry: Mutex<PageTargetRegistry>,
    records: Arc<Mutex<RecordStores>>,
}

impl Hub {
    pub fn new(config: Config) -> Self {
        let records = RecordStores::new(
            config.automation.network_capacity,
            config.automation.console_capacity,
        );
        Self {
            config,
            instances: Mutex::new(InstanceTable::new()),
            pending: Mutex::new(PendingCommands::new()),
            registry: Mutex::new(PageTargetRegistry::new()),
            records: Arc::new(Mutex::new(records)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared record stores, handed to automation-session collectors and
    /// read-only history tools.
    pub fn records(&self) -> Arc<Mutex<RecordStores>> {
        self.records.clone()
    }

    // ── Instance lifecycle ────────────────────────────────────────────

    /// Complete one handshake. Replaces any prior instance for the client
    /// id and returns the connection sequence number for later cleanup.
    pub async fn register_instance(
        &self,
        hello: &Hello,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<u64> {
        hello.validate()?;
        let mut instances = self.instances.lock().await;
        let seq = instances.register(
            hello.client_id.clone(),
            hello.instance_id.clone(),
            hello.capabilities.clone(),
            sender,
        );
        info!(
            client_id = %hello.client_id,
            instance_id = %hello.instance_id,
            "Runtime instance registered"
        );
        Ok(seq)
    }

    /// Connection closed: drop the instance (if still current) and fail all
    /// of its pending commands immediately rather than letting them time
    /// out.
    pub async fn unregister_instance(&self, client_id: &str, conn_seq: u64) {
        let removed = {
            let mut instances = self.instances.lock().await;
            instances.remove_if_current(client_id, conn_seq)
        };
        if removed {
            let failed = self.pending.lock().await.fail_all_for_client(client_id);
            info!(
                client_id = %client_id,
                failed_commands = failed,
                "Runtime instance disconnected"
            );
        }
    }

    /// Synchronous capability check used by tools before dispatching, so
    /// the caller gets an actionable error instead of a timeout.
    pub async fn has_instance(&self, client_id: &str) -> bool {
        self.instances.lock().await.has(client_id)
    }

    pub async fn debug_endpoint(&self, client_id: &str) -> Option<InstanceEndpoint> {
        self.instances.lock().await.debug_endpoint(client_id)
    }

    pub async fn touch_instance(&self, client_id: &str) {
        self.instances.lock().await.touch(client_id);
    }

    pub async fn list_instances(&self) -> Vec<InstanceSummary> {
        self.instances.lock().await.list()
    }

    // ── Command dispatch ──────────────────────────────────────────────

    /// Send one command to a runtime and await its ack or the deadline.
    /// Fails immediately when the runtime is offline; never queues.
    pub async fn dispatch(&self, client_id: &str, kind: CommandKind) -> Result<Value> {
        let sender = {
            let instances = self.instances.lock().await;
            instances.sender(client_id)
        };
        let Some(sender) = sender else {
            return Err(Error::RuntimeOffline(format!(
                "no desktop runtime connected for client '{}'",
                client_id
            )));
        };

        let request_id = Uuid::new_v4().to_string();
        let frame = CommandFrame::new(request_id.clone(), &kind)?;
        let rx = {
            let mut pending = self.pending.lock().await;
            pending.insert(request_id.clone(), client_id.to_string())
        };

        if sender
            .send(ServerMessage::Command(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.discard(&request_id);
            return Err(Error::RuntimeOffline(format!(
                "runtime '{}' went away before the command was sent",
                client_id
            )));
        }

        let deadline = Duration::from_secs(self.config.hub.dispatch_timeout_secs);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(Ok(ack))) => {
                if ack.ok {
                    Ok(ack.result.unwrap_or(Value::Null))
                } else {
                    Err(Error::Channel(format!(
                        "runtime rejected command: {}",
                        ack.error.unwrap_or_else(|| "unknown error".into())
                    )))
                }
            }
            // Pending entry resolved with a failure (instance disconnect).
            Ok(Ok(Err(e))) => Err(e),
            // Sender dropped without resolution; treat as disconnect.
            Ok(Err(_)) => Err(Error::Channel("runtime disconnected".into())),
            Err(_) => {
                self.pending.lock().await.discard(&request_id);
                Err(Error::DispatchTimeout(format!(
                    "no ack for request {} within {:?}",
                    request_id, deadline
                )))
            }
        }
    }

    /// Ack arrived on the channel. Unknown request ids are logged and
    /// dropped (stale ack after timeout or disconnect).
    pub async fn handle_ack(&self, ack: AckFrame) {
        let request_id = ack.request_id.clone();
        let resolved = self.pending.lock().await.complete(ack);
        if resolved {
            debug!(request_id = %request_id, "Ack resolved pending command");
        } else {
            warn!(request_id = %request_id, "Ack for unknown request id (stale)");
        }
    }

    // ── Page target registry ──────────────────────────────────────────

    pub async fn register_page(&self, record: PageTargetRecord) {
        self.registry.lock().await.register(record);
    }

    pub async fn get_page(&self, page_target_id: &str) -> Option<PageTargetRecord> {
        self.registry.lock().await.get(page_target_id)
    }

    pub async fn update_page_url(&self, page_target_id: &str, url: String) -> bool {
        self.registry.lock().await.update_url(page_target_id, url)
    }

    pub async fn update_page_runtime_info(
        &self,
        page_target_id: &str,
        update: RuntimeInfoUpdate,
    ) -> bool {
        self.registry
            .lock()
            .await
            .update_runtime_info(page_target_id, update)
    }

    pub async fn remove_page(&self, page_target_id: &str) -> Option<PageTargetRecord> {
        let removed = self.registry.lock().await.remove(page_target_id);
        if removed.is_some() {
            self.records.lock().await.remove_page(page_target_id);
        }
        removed
    }

    /// Tab teardown hook: evict all page records owned by the tab and purge
    /// their history buffers.
    pub async fn remove_tab(&self, tab_id: &str) -> usize {
        let removed = self.registry.lock().await.remove_tab(tab_id);
        let mut records = self.records.lock().await;
        for page_target_id in &removed {
            records.remove_page(page_target_id);
        }
        removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskbridge_core::protocol::{Capabilities, ClientMessage};
    use std::time::Instant;

    fn hub() -> Hub {
        Hub::new(Config::default())
    }

    fn hello(client_id: &str) -> Hello {
        Hello {
            runtime_type: "desktop".into(),
            instance_id: "inst-1".into(),
            client_id: client_id.into(),
            capabilities: Capabilities {
                version: "0.2.1".into(),
                platform: "linux".into(),
                debug_host: "127.0.0.1".into(),
                debug_port: 9222,
                features: vec![],
            },
        }
    }

    fn open_page_kind() -> CommandKind {
        CommandKind::OpenPage {
            window_id: "w1".into(),
            key: "main".into(),
            url: "https://example.com".into(),
            bounds: None,
            visible: true,
        }
    }

    #[tokio::test]
    async fn dispatch_without_instance_fails_immediately() {
        let hub = hub();
        assert!(!hub.has_instance("c1").await);

        let started = Instant::now();
        let err = hub.dispatch("c1", open_page_kind()).await.unwrap_err();
        assert!(matches!(err, Error::RuntimeOffline(_)));
        // Near-zero latency, never the dispatch timeout.
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn dispatch_resolves_on_ack() {
        let hub = hub();
        let (tx, mut rx) = mpsc::channel(8);
        hub.register_instance(&hello("c1"), tx).await.unwrap();

        let dispatch = hub.dispatch("c1", open_page_kind());
        let responder = async {
            match rx.recv().await {
                Some(ServerMessage::Command(frame)) => {
                    hub.handle_ack(AckFrame::success(
                        frame.request_id,
                        serde_json::json!({"viewId": "v1", "debugTargetId": "T1"}),
                    ))
                    .await;
                }
                other => panic!("expected command, got {other:?}"),
            }
        };

        let (result, _) = tokio::join!(dispatch, responder);
        let value = result.unwrap();
        assert_eq!(value["viewId"], "v1");
    }

    #[tokio::test]
    async fn disconnect_fails_inflight_dispatch() {
        let hub = hub();
        let (tx, mut rx) = mpsc::channel(8);
        let seq = hub.register_instance(&hello("c1"), tx).await.unwrap();

        let dispatch = hub.dispatch("c1", open_page_kind());
        let disconnector = async {
            // Wait for the command to be in flight, then drop the instance.
            let _ = rx.recv().await;
            hub.unregister_instance("c1", seq).await;
        };

        let (result, _) = tokio::join!(dispatch, disconnector);
        assert!(matches!(result.unwrap_err(), Error::Channel(_)));
    }

    #[tokio::test]
    async fn malformed_hello_is_rejected() {
        let hub = hub();
        let (tx, _rx) = mpsc::channel(8);
        let mut bad = hello("c1");
        bad.capabilities.debug_port = 0;
        assert!(hub.register_instance(&bad, tx).await.is_err());
        assert!(!hub.has_instance("c1").await);
    }

    #[tokio::test]
    async fn stale_ack_is_ignored() {
        let hub = hub();
        // No pending entry; must not panic or resolve anything.
        hub.handle_ack(AckFrame::success("ghost".into(), Value::Null))
            .await;
    }

    #[test]
    fn hello_frame_parses_from_wire_shape() {
        let text = serde_json::json!({
            "type": "hello",
            "runtimeType": "desktop",
            "instanceId": "inst-1",
            "clientId": "c1",
            "capabilities": {
                "version": "0.2.1",
                "debugHost": "127.0.0.1",
                "debugPort": 9222,
            },
        })
        .to_string();
        match ClientMessage::parse(&text).unwrap() {
            ClientMessage::Hello(h) => assert_eq!(h.client_id, "c1"),
            other => panic!("expected hello, got {other:?}"),
        }
    }
}
