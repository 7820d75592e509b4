//! Desktop runtime client: the reconnecting control-channel endpoint.
//!
//! One connection per running desktop instance. Handshake, periodic
//! liveness pings, exponential-backoff reconnect, and command dispatch into
//! the view manager. Every inbound command gets exactly one ack.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use deskbridge_core::error::{Error, Result};
use deskbridge_core::protocol::{
    AckFrame, Capabilities, ClientMessage, CommandFrame, CommandKind, Hello, ServerMessage,
};
use deskbridge_core::Config;

use crate::backoff::Backoff;
use crate::views::ViewManager;

pub struct RuntimeClient {
    config: Config,
    instance_id: String,
    views: Arc<ViewManager>,
}

impl RuntimeClient {
    pub fn new(config: Config, views: Arc<ViewManager>) -> Arc<Self> {
        Arc::new(Self {
            config,
            instance_id: Uuid::new_v4().to_string(),
            views,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn hello(&self) -> Hello {
        Hello {
            runtime_type: "desktop".to_string(),
            instance_id: self.instance_id.clone(),
            client_id: self.config.channel.client_id.clone(),
            capabilities: Capabilities {
                version: env!("CARGO_PKG_VERSION").to_string(),
                platform: std::env::consts::OS.to_string(),
                debug_host: self.config.engine.debug_host.clone(),
                debug_port: self.config.engine.debug_port,
                features: vec!["views".to_string(), "uiEvents".to_string()],
            },
        }
    }

    /// Supervised connection loop: connect, run until failure, back off,
    /// repeat. Backoff resets once a handshake completes.
    pub async fn run_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut backoff = Backoff::new(
            Duration::from_secs(1),
            Duration::from_secs(self.config.channel.reconnect_cap_secs),
        );

        loop {
            let delay = backoff.next_delay();
            if !delay.is_zero() {
                debug!(delay_secs = delay.as_secs(), "Waiting before reconnect");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.recv() => {
                        info!("Runtime client shutting down");
                        return;
                    }
                }
            }

            tokio::select! {
                result = self.clone().run_connection(&mut backoff) => {
                    match result {
                        Ok(()) => info!("Control channel closed normally"),
                        Err(e) => {
                            error!(error = %e, "Control channel error, reconnecting");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Runtime client shutting down");
                    return;
                }
            }
        }
    }

    async fn run_connection(self: Arc<Self>, backoff: &mut Backoff) -> Result<()> {
        let url = url::Url::parse(&self.config.channel.url)
            .map_err(|e| Error::Channel(format!("invalid channel url: {}", e)))?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Channel(format!("bad channel request: {}", e)))?;
        if !self.config.channel.token.is_empty() {
            let bearer = format!("Bearer {}", self.config.channel.token)
                .parse()
                .map_err(|_| Error::Channel("channel token is not header-safe".into()))?;
            request
                .headers_mut()
                .insert(tokio_tungstenite::tungstenite::http::header::AUTHORIZATION, bearer);
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| Error::Channel(format!("channel connect failed: {}", e)))?;
        info!(url = %self.config.channel.url, "Control channel connected");

        let (mut ws_sink, mut ws_read) = ws_stream.split();

        // Writer task owns the sink; everything outbound goes through it so
        // command handlers can ack from spawned tasks.
        let (out_tx, mut out_rx) = mpsc::channel::<WsMessage>(64);
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = ws_sink.send(msg).await {
                    error!(error = %e, "Channel write error");
                    break;
                }
            }
        });

        let result = self
            .clone()
            .drive_connection(&mut ws_read, &out_tx, backoff)
            .await;

        drop(out_tx);
        writer.abort();
        result
    }

    async fn drive_connection(
        self: Arc<Self>,
        ws_read: &mut (impl futures::Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
                  + Unpin),
        out_tx: &mpsc::Sender<WsMessage>,
        backoff: &mut Backoff,
    ) -> Result<()> {
        // connecting -> connected: send hello.
        let hello = ClientMessage::Hello(self.hello());
        out_tx
            .send(WsMessage::Text(hello.encode()))
            .await
            .map_err(|_| Error::Channel("writer gone before hello".into()))?;

        // connected -> ready: wait for the hello ack.
        self.await_hello_ack(ws_read).await?;
        info!(client_id = %self.config.channel.client_id, "Handshake acknowledged, channel ready");
        backoff.reset();

        // ready: liveness pings and command dispatch.
        let ping_every = Duration::from_secs(self.config.channel.ping_interval_secs);
        let pong_deadline = ping_every * self.config.channel.pong_timeout_intervals;
        let mut ping_interval = tokio::time::interval(ping_every);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so the deadline math
        // starts from a clean slate.
        ping_interval.tick().await;
        let mut last_pong = Instant::now();

        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    if last_pong.elapsed() > pong_deadline {
                        // Half-open connection: force-close and reconnect.
                        return Err(Error::Channel(format!(
                            "no pong within {:?}, treating connection as dead",
                            pong_deadline
                        )));
                    }
                    let ping = ClientMessage::Ping {
                        client_time: chrono::Utc::now().timestamp_millis(),
                    };
                    if out_tx.send(WsMessage::Text(ping.encode())).await.is_err() {
                        return Err(Error::Channel("writer gone".into()));
                    }
                }
                frame = ws_read.next() => {
                    match frame {
                        None => return Err(Error::Channel("channel stream ended".into())),
                        Some(Err(e)) => {
                            return Err(Error::Channel(format!("channel read error: {}", e)))
                        }
                        Some(Ok(WsMessage::Text(text))) => {
                            match ServerMessage::parse(&text) {
                                Ok(ServerMessage::Pong) => {
                                    last_pong = Instant::now();
                                }
                                Ok(ServerMessage::Command(frame)) => {
                                    Self::spawn_command(self.clone(), frame, out_tx.clone());
                                }
                                Ok(ServerMessage::HelloAck { .. }) => {
                                    debug!("Late hello ack ignored");
                                }
                                Err(e) => {
                                    debug!(error = %e, "Unparseable channel frame");
                                }
                            }
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            let _ = out_tx.send(WsMessage::Pong(data)).await;
                        }
                        Some(Ok(WsMessage::Close(_))) => {
                            return Err(Error::Channel("closed by hub".into()));
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    async fn await_hello_ack(
        &self,
        ws_read: &mut (impl futures::Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
                  + Unpin),
    ) -> Result<()> {
        let deadline = Duration::from_secs(self.config.channel.hello_timeout_secs);
        let wait = async {
            while let Some(frame) = ws_read.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) => {
                        return Err(Error::Channel("closed during handshake".into()))
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        return Err(Error::Channel(format!("handshake read error: {}", e)))
                    }
                };
                match ServerMessage::parse(&text) {
                    Ok(ServerMessage::HelloAck { ok: true, .. }) => return Ok(()),
                    Ok(ServerMessage::HelloAck { ok: false, error }) => {
                        return Err(Error::Channel(format!(
                            "hub rejected handshake: {}",
                            error.unwrap_or_else(|| "unknown".into())
                        )))
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(error = %e, "Skipping frame while waiting for hello ack");
                    }
                }
            }
            Err(Error::Channel("channel ended during handshake".into()))
        };
        tokio::time::timeout(deadline, wait)
            .await
            .map_err(|_| Error::Channel("hello ack timed out".into()))?
    }

    /// Execute one command off the read loop and send exactly one ack;
    /// commands are never silently dropped.
    fn spawn_command(client: Arc<Self>, frame: CommandFrame, out_tx: mpsc::Sender<WsMessage>) {
        tokio::spawn(async move {
            let ack = client.handle_command(frame).await;
            let msg = ClientMessage::Ack(ack);
            if out_tx.send(WsMessage::Text(msg.encode())).await.is_err() {
                warn!("Connection gone before ack could be sent");
            }
        });
    }

    pub async fn handle_command(&self, frame: CommandFrame) -> AckFrame {
        let request_id = frame.request_id.clone();
        let kind = match frame.kind() {
            Ok(kind) => kind,
            Err(e) => return AckFrame::failure(request_id, e.to_string()),
        };

        let result = match kind {
            CommandKind::OpenPage {
                window_id,
                key,
                url,
                bounds,
                visible,
            } => {
                let outcome = async {
                    self.views
                        .upsert(&window_id, &key, &url, bounds, visible)
                        .await?;
                    let ensured = self.views.ensure(&window_id, &key, &url).await?;
                    Ok(serde_json::to_value(ensured)?)
                }
                .await;
                outcome
            }
            CommandKind::ClosePage { window_id, key } => self
                .views
                .destroy(&window_id, &key)
                .await
                .map(|_| json!({"closed": true})),
            CommandKind::UiEvent { window_id, event } => {
                self.views.forward_ui_event(&window_id, &event);
                Ok(json!({"forwarded": true}))
            }
        };

        match result {
            Ok(value) => AckFrame::success(request_id, value),
            Err(e) => AckFrame::failure(request_id, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::NullHost;
    use deskbridge_core::config::{AutomationConfig, EngineConfig};

    fn client() -> Arc<RuntimeClient> {
        let views = Arc::new(ViewManager::new(
            EngineConfig::default(),
            AutomationConfig::default(),
            Arc::new(NullHost),
        ));
        RuntimeClient::new(Config::default(), views)
    }

    #[tokio::test]
    async fn unknown_command_kind_gets_failure_ack() {
        let client = client();
        let frame = CommandFrame {
            request_id: "req-1".into(),
            payload: json!({"kind": "teleport", "where": "mars"}),
        };
        let ack = client.handle_command(frame).await;
        assert_eq!(ack.request_id, "req-1");
        assert!(!ack.ok);
        assert!(ack.error.is_some());
    }

    #[tokio::test]
    async fn ui_event_acks_success() {
        let client = client();
        let frame = CommandFrame {
            request_id: "req-2".into(),
            payload: json!({
                "kind": "uiEvent",
                "windowId": "w1",
                "event": {"kind": "focus"},
            }),
        };
        let ack = client.handle_command(frame).await;
        assert!(ack.ok);
        assert_eq!(ack.result.unwrap()["forwarded"], true);
    }

    #[tokio::test]
    async fn close_page_for_unknown_view_acks_failure() {
        let client = client();
        let frame = CommandFrame {
            request_id: "req-3".into(),
            payload: json!({
                "kind": "closePage",
                "windowId": "w1",
                "key": "missing",
            }),
        };
        let ack = client.handle_command(frame).await;
        assert!(!ack.ok);
    }

    #[tokio::test]
    async fn open_page_with_invalid_url_acks_failure() {
        let client = client();
        let frame = CommandFrame {
            request_id: "req-4".into(),
            payload: json!({
                "kind": "openPage",
                "windowId": "w1",
                "key": "main",
                "url": "ftp://example.com",
            }),
        };
        let ack = client.handle_command(frame).await;
        assert!(!ack.ok);
        assert!(ack.error.unwrap().contains("scheme"));
    }

    #[test]
    fn hello_carries_engine_endpoint() {
        let client = client();
        let hello = client.hello();
        assert_eq!(hello.runtime_type, "desktop");
        assert_eq!(hello.capabilities.debug_port, 9222);
        assert!(hello.validate().is_ok());
    }
}
