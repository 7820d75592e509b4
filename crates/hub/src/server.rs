//! HTTP/WebSocket surface of the hub.
//!
//! `/channel` upgrades to the control channel for desktop runtimes;
//! `/v1/health` and `/v1/instances` are the status surface. A bearer token
//! (when configured) guards everything except health.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use deskbridge_core::error::Result;
use deskbridge_core::protocol::{ClientMessage, Hello, ServerMessage};
use deskbridge_core::Error;

use crate::hub::Hub;

#[derive(Clone)]
struct ServerState {
    hub: Arc<Hub>,
    api_token: Option<String>,
}

fn secure_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (&x, &y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

async fn auth_middleware(
    State(state): State<ServerState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let token = match &state.api_token {
        Some(t) if !t.is_empty() => t,
        _ => return next.run(req).await,
    };

    if req.uri().path() == "/v1/health" {
        return next.run(req).await;
    }

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let authorized = match auth_header {
        Some(h) if h.starts_with("Bearer ") => secure_eq(&h[7..], token.as_str()),
        _ => false,
    };

    if authorized {
        next.run(req).await
    } else {
        (StatusCode::UNAUTHORIZED, "Unauthorized: invalid or missing Bearer token").into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    instances: usize,
}

async fn handle_health(State(state): State<ServerState>) -> impl IntoResponse {
    let instances = state.hub.list_instances().await.len();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        instances,
    })
}

async fn handle_instances(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.hub.list_instances().await)
}

async fn handle_channel_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_channel(socket, state))
}

/// One control-channel connection. The first frame must be a hello; after
/// a successful handshake the connection carries ping/pong and command/ack
/// frames until either side closes.
async fn handle_channel(socket: WebSocket, state: ServerState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let hub = state.hub;

    // The instance's outbound queue; the writer task owns the sink.
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(64);
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if ws_sender
                .send(WsMessage::Text(msg.encode()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Handshake: one hello within the timeout, or close.
    let hello_timeout = Duration::from_secs(10);
    let hello = match await_hello(&mut ws_receiver, hello_timeout).await {
        Ok(h) => h,
        Err(e) => {
            warn!(error = %e, "Channel handshake failed");
            let _ = out_tx
                .send(ServerMessage::HelloAck {
                    ok: false,
                    error: Some(e.to_string()),
                })
                .await;
            drop(out_tx);
            let _ = writer.await;
            return;
        }
    };

    let conn_seq = match hub.register_instance(&hello, out_tx.clone()).await {
        Ok(seq) => seq,
        Err(e) => {
            let _ = out_tx
                .send(ServerMessage::HelloAck {
                    ok: false,
                    error: Some(e.to_string()),
                })
                .await;
            drop(out_tx);
            let _ = writer.await;
            return;
        }
    };
    let _ = out_tx
        .send(ServerMessage::HelloAck { ok: true, error: None })
        .await;

    let client_id = hello.client_id.clone();

    while let Some(frame) = ws_receiver.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Ping(_)) => {
                // Transport-level ping; axum answers it itself.
                continue;
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Channel receive error");
                break;
            }
        };

        match ClientMessage::parse(&text) {
            Ok(ClientMessage::Ping { .. }) => {
                hub.touch_instance(&client_id).await;
                if out_tx.send(ServerMessage::Pong).await.is_err() {
                    break;
                }
            }
            Ok(ClientMessage::Ack(ack)) => {
                hub.handle_ack(ack).await;
            }
            Ok(ClientMessage::Hello(_)) => {
                warn!(client_id = %client_id, "Duplicate hello on open channel, ignoring");
            }
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Unparseable channel frame");
            }
        }
    }

    hub.unregister_instance(&client_id, conn_seq).await;
    drop(out_tx);
    let _ = writer.await;
    info!(client_id = %client_id, "Channel closed");
}

async fn await_hello(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    timeout: Duration,
) -> Result<Hello> {
    let frame = tokio::time::timeout(timeout, receiver.next())
        .await
        .map_err(|_| Error::Protocol("no hello within handshake timeout".into()))?
        .ok_or_else(|| Error::Protocol("channel closed before hello".into()))?
        .map_err(|e| Error::Protocol(format!("handshake receive error: {}", e)))?;

    let text = match frame {
        WsMessage::Text(text) => text,
        other => {
            return Err(Error::Protocol(format!(
                "expected hello text frame, got {:?}",
                other
            )))
        }
    };

    match ClientMessage::parse(&text)? {
        ClientMessage::Hello(hello) => {
            hello.validate()?;
            Ok(hello)
        }
        _ => Err(Error::Protocol("first frame was not a hello".into())),
    }
}

pub fn router(hub: Arc<Hub>) -> Router {
    let api_token = {
        let token = hub.config().hub.api_token.clone();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    };
    let state = ServerState { hub, api_token };

    Router::new()
        .route("/channel", get(handle_channel_upgrade))
        .route("/v1/health", get(handle_health))
        .route("/v1/instances", get(handle_instances))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(hub: Arc<Hub>) -> Result<()> {
    let host = hub.config().hub.host.clone();
    let port = hub.config().hub.port;
    let app = router(hub);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Hub listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Channel(format!("hub server error: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_rejects_length_and_content_mismatch() {
        assert!(secure_eq("token", "token"));
        assert!(!secure_eq("token", "token2"));
        assert!(!secure_eq("tokee", "token"));
        assert!(!secure_eq("", "token"));
    }
}
