//! `deskbridge hub`: the server hub plus the agent-facing tool surface.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use deskbridge_core::{Config, Paths};
use deskbridge_hub::{server, Hub};
use deskbridge_tools::{ToolContext, ToolRegistry, UidTable};

#[derive(Clone)]
struct ToolState {
    hub: Arc<Hub>,
    config: Config,
    registry: Arc<ToolRegistry>,
    uids: UidTable,
    workspace: std::path::PathBuf,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallRequest {
    tab_id: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default)]
    params: Value,
}

fn default_client_id() -> String {
    "desktop-default".to_string()
}

async fn handle_tool_call(
    State(state): State<ToolState>,
    AxumPath(name): AxumPath<String>,
    headers: axum::http::HeaderMap,
    Json(request): Json<ToolCallRequest>,
) -> impl IntoResponse {
    let token = &state.config.hub.api_token;
    if !token.is_empty() {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "));
        if presented != Some(token.as_str()) {
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    }

    let Some(tool) = state.registry.get(&name) else {
        return (StatusCode::NOT_FOUND, format!("no tool '{}'", name)).into_response();
    };
    if let Err(e) = tool.validate(&request.params) {
        return Json(deskbridge_tools::err_envelope(&e)).into_response();
    }

    let ctx = ToolContext {
        hub: state.hub.clone(),
        config: state.config.clone(),
        workspace: state.workspace.clone(),
        tab_id: request.tab_id,
        client_id: request.client_id,
        uids: state.uids.clone(),
        cancel: tokio_util::sync::CancellationToken::new(),
    };

    match tool.execute(ctx, request.params).await {
        Ok(envelope) => Json(envelope).into_response(),
        Err(e) => Json(deskbridge_tools::err_envelope(&e)).into_response(),
    }
}

pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let mut config = Config::load(&paths)?;
    if let Some(host) = host {
        config.hub.host = host;
    }
    if let Some(port) = port {
        config.hub.port = port;
    }

    let hub = Arc::new(Hub::new(config.clone()));
    let registry = Arc::new(ToolRegistry::with_defaults());
    let tool_state = ToolState {
        hub: hub.clone(),
        config: config.clone(),
        registry,
        uids: UidTable::default(),
        workspace: paths.workspace(),
    };

    let app: Router = server::router(hub)
        .merge(
            Router::new()
                .route("/v1/tools/:name", post(handle_tool_call))
                .with_state(tool_state),
        );

    let addr = format!("{}:{}", config.hub.host, config.hub.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Hub listening (channel + tools)");
    axum::serve(listener, app).await?;
    Ok(())
}
