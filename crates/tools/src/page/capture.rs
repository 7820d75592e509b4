//! Screenshot capture into the workspace media directory.

use base64::Engine;
use serde_json::{json, Value};

use deskbridge_cdp::session::with_page;
use deskbridge_core::error::{Error, Result};

use super::support::{prepare_session, required_str};
use crate::ToolContext;

pub async fn action_screenshot(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let prepared = prepare_session(
        ctx,
        page_target_id,
        params.get("debugTargetId").and_then(|v| v.as_str()),
    )
    .await?;

    let base64_data = with_page(
        prepared.params,
        ctx.hub.records(),
        ctx.cancel.clone(),
        |client| async move {
            client.enable_domain("Page").await?;
            client.capture_screenshot().await
        },
    )
    .await?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&base64_data)
        .map_err(|e| Error::Protocol(format!("screenshot decode failed: {}", e)))?;

    let media_dir = ctx.workspace.join("media");
    std::fs::create_dir_all(&media_dir)?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = media_dir.join(format!("screenshot_{}_{}.png", page_target_id, ts));
    std::fs::write(&path, &bytes)?;

    Ok(json!({
        "path": path.display().to_string(),
        "sizeBytes": bytes.len(),
    }))
}
