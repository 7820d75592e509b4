//! Page handle lifecycle: open, close, navigate.

use serde_json::{json, Value};
use uuid::Uuid;

use deskbridge_cdp::session::with_page;
use deskbridge_core::error::{Error, Result};
use deskbridge_core::protocol::CommandKind;
use deskbridge_core::urlnorm::normalize_url;
use deskbridge_hub::{PageBackend, PageTargetRecord, RuntimeInfoUpdate};

use super::support::{
    prepare_session, required_str, view_key_for_handle, window_for_tab,
};
use crate::ToolContext;

/// Open a page in the desktop host and hand back a fresh page handle.
/// Fails fast with RuntimeOffline before any dispatch when no desktop
/// instance is connected.
pub async fn action_open(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let url = required_str(params, "url")?;
    let resolved = normalize_url(url)?;

    if !ctx.hub.has_instance(&ctx.client_id).await {
        return Err(Error::RuntimeOffline(format!(
            "no desktop runtime connected for client '{}'",
            ctx.client_id
        )));
    }

    let page_target_id = Uuid::new_v4().to_string();
    let window_id = window_for_tab(&ctx.tab_id);
    let key = view_key_for_handle(&page_target_id);

    // Record first, runtime info once the ack arrives.
    ctx.hub
        .register_page(PageTargetRecord {
            page_target_id: page_target_id.clone(),
            tab_id: ctx.tab_id.clone(),
            url: resolved.clone(),
            backend: PageBackend::DesktopView,
            client_id: ctx.client_id.clone(),
            debug_target_id: None,
            view_id: None,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        })
        .await;

    let ack = ctx
        .hub
        .dispatch(
            &ctx.client_id,
            CommandKind::OpenPage {
                window_id,
                key,
                url: resolved.clone(),
                bounds: None,
                visible: true,
            },
        )
        .await?;

    let debug_target_id = ack
        .get("debugTargetId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let view_id = ack
        .get("viewId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    ctx.hub
        .update_page_runtime_info(
            &page_target_id,
            RuntimeInfoUpdate {
                debug_target_id: debug_target_id.clone(),
                view_id: view_id.clone(),
            },
        )
        .await;

    Ok(json!({
        "pageTargetId": page_target_id,
        "url": resolved,
        "debugTargetId": debug_target_id,
        "viewId": view_id,
    }))
}

/// Close the page's view and drop the handle and its history buffers.
pub async fn action_close(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let record = ctx.hub.get_page(page_target_id).await.ok_or_else(|| {
        Error::UnknownHandle(format!("unknown page handle '{}'", page_target_id))
    })?;
    if record.tab_id != ctx.tab_id {
        return Err(Error::OwnershipMismatch(format!(
            "page handle '{}' belongs to another conversation",
            page_target_id
        )));
    }

    if ctx.hub.has_instance(&record.client_id).await {
        let result = ctx
            .hub
            .dispatch(
                &record.client_id,
                CommandKind::ClosePage {
                    window_id: window_for_tab(&record.tab_id),
                    key: view_key_for_handle(page_target_id),
                },
            )
            .await;
        if let Err(e) = result {
            // The handle is dropped either way; report what the runtime said.
            tracing::warn!(page_target_id = %page_target_id, error = %e, "Close command failed");
        }
    }

    ctx.hub.remove_page(page_target_id).await;
    Ok(json!({"closed": true, "pageTargetId": page_target_id}))
}

/// Navigate the already-open page. Validation happens before any
/// connection attempt; the registry URL is updated after the navigation
/// is issued.
pub async fn action_navigate(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let url = required_str(params, "url")?;
    let resolved = normalize_url(url)?;

    let prepared = prepare_session(
        ctx,
        page_target_id,
        params.get("debugTargetId").and_then(|v| v.as_str()),
    )
    .await?;

    let nav_url = resolved.clone();
    with_page(
        prepared.params,
        ctx.hub.records(),
        ctx.cancel.clone(),
        move |client| async move {
            client.navigate(&nav_url).await?;
            Ok(Value::Null)
        },
    )
    .await?;

    ctx.hub
        .update_page_url(page_target_id, resolved.clone())
        .await;

    // A fresh document invalidates previously issued uids.
    ctx.uids.lock().await.remove(page_target_id);

    Ok(json!({"pageTargetId": page_target_id, "url": resolved}))
}
