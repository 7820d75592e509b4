//! Pointer and keyboard interaction by uid: click, hover, fill, drag,
//! press-key. Uids come from a prior snapshot; each action resolves its
//! uid to an on-screen coordinate and synthesizes input at that point.

use serde_json::{json, Value};

use deskbridge_cdp::input::{parse_key_spec, select_all_chord};
use deskbridge_cdp::session::with_page;
use deskbridge_core::error::{Error, Result};

use super::support::{
    element_center, prepare_session, required_str, required_u32, resolve_uid, scroll_into_view,
};
use crate::ToolContext;

fn backing_node(entry: &deskbridge_cdp::snapshot::UidEntry, uid: u32) -> Result<i64> {
    entry.backend_node_id.ok_or_else(|| {
        Error::Validation(format!("uid {} has no backing DOM node", uid))
    })
}

pub async fn action_click(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let uid = required_u32(params, "uid")?;
    let entry = resolve_uid(ctx, page_target_id, uid).await?;
    let backend_node_id = backing_node(&entry, uid)?;

    let prepared = prepare_session(
        ctx,
        page_target_id,
        params.get("debugTargetId").and_then(|v| v.as_str()),
    )
    .await?;

    let (x, y) = with_page(
        prepared.params,
        ctx.hub.records(),
        ctx.cancel.clone(),
        move |client| async move {
            client.enable_domain("DOM").await?;
            scroll_into_view(&client, backend_node_id).await?;
            let (x, y) = element_center(&client, backend_node_id).await?;
            client.dispatch_mouse_event("mousePressed", x, y, "left", 1).await?;
            client.dispatch_mouse_event("mouseReleased", x, y, "left", 1).await?;
            Ok((x, y))
        },
    )
    .await?;

    Ok(json!({
        "clicked": {"uid": uid, "role": entry.role, "name": entry.name},
        "at": {"x": x, "y": y},
    }))
}

pub async fn action_hover(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let uid = required_u32(params, "uid")?;
    let entry = resolve_uid(ctx, page_target_id, uid).await?;
    let backend_node_id = backing_node(&entry, uid)?;

    let prepared = prepare_session(
        ctx,
        page_target_id,
        params.get("debugTargetId").and_then(|v| v.as_str()),
    )
    .await?;

    let (x, y) = with_page(
        prepared.params,
        ctx.hub.records(),
        ctx.cancel.clone(),
        move |client| async move {
            client.enable_domain("DOM").await?;
            scroll_into_view(&client, backend_node_id).await?;
            let (x, y) = element_center(&client, backend_node_id).await?;
            client.dispatch_mouse_move(x, y, 0).await?;
            Ok((x, y))
        },
    )
    .await?;

    Ok(json!({"hovered": {"uid": uid}, "at": {"x": x, "y": y}}))
}

/// Replace the element's text: focus, platform select-all, delete, type.
/// Robust against framework-managed inputs that ignore direct value
/// assignment.
pub async fn action_fill(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let uid = required_u32(params, "uid")?;
    let text = required_str(params, "text")?.to_string();
    let entry = resolve_uid(ctx, page_target_id, uid).await?;
    let backend_node_id = backing_node(&entry, uid)?;

    let prepared = prepare_session(
        ctx,
        page_target_id,
        params.get("debugTargetId").and_then(|v| v.as_str()),
    )
    .await?;
    let (select_key, select_code, select_mods) = select_all_chord(&prepared.platform);

    let typed_len = text.chars().count();
    with_page(
        prepared.params,
        ctx.hub.records(),
        ctx.cancel.clone(),
        move |client| async move {
            client.enable_domain("DOM").await?;
            scroll_into_view(&client, backend_node_id).await?;
            client.focus_backend_node(backend_node_id).await?;

            client
                .dispatch_key_event("keyDown", &select_key, &select_code, select_mods)
                .await?;
            client
                .dispatch_key_event("keyUp", &select_key, &select_code, select_mods)
                .await?;
            client.dispatch_key_event("keyDown", "Delete", "Delete", 0).await?;
            client.dispatch_key_event("keyUp", "Delete", "Delete", 0).await?;

            client.insert_text(&text).await?;
            // Framework change detection rides on an input event.
            client
                .evaluate_js(
                    "document.activeElement && document.activeElement.dispatchEvent(new Event('input', {bubbles: true}))",
                )
                .await?;
            Ok(Value::Null)
        },
    )
    .await?;

    Ok(json!({"filled": {"uid": uid}, "chars": typed_len}))
}

/// Drag from one uid to another with interpolated pointer moves.
pub async fn action_drag(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let from_uid = required_u32(params, "uid")?;
    let to_uid = required_u32(params, "toUid")?;
    let from_entry = resolve_uid(ctx, page_target_id, from_uid).await?;
    let to_entry = resolve_uid(ctx, page_target_id, to_uid).await?;
    let from_node = backing_node(&from_entry, from_uid)?;
    let to_node = backing_node(&to_entry, to_uid)?;

    let prepared = prepare_session(
        ctx,
        page_target_id,
        params.get("debugTargetId").and_then(|v| v.as_str()),
    )
    .await?;

    let (from, to) = with_page(
        prepared.params,
        ctx.hub.records(),
        ctx.cancel.clone(),
        move |client| async move {
            client.enable_domain("DOM").await?;
            scroll_into_view(&client, from_node).await?;
            let from = element_center(&client, from_node).await?;
            let to = element_center(&client, to_node).await?;

            client
                .dispatch_mouse_event("mousePressed", from.0, from.1, "left", 1)
                .await?;
            const STEPS: u32 = 6;
            for step in 1..=STEPS {
                let t = step as f64 / STEPS as f64;
                let x = from.0 + (to.0 - from.0) * t;
                let y = from.1 + (to.1 - from.1) * t;
                client.dispatch_mouse_move(x, y, 1).await?;
            }
            client
                .dispatch_mouse_event("mouseReleased", to.0, to.1, "left", 1)
                .await?;
            Ok((from, to))
        },
    )
    .await?;

    Ok(json!({
        "dragged": {"fromUid": from_uid, "toUid": to_uid},
        "from": {"x": from.0, "y": from.1},
        "to": {"x": to.0, "y": to.1},
    }))
}

pub async fn action_press_key(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let key_spec = required_str(params, "key")?;
    let (key, code, modifiers) = parse_key_spec(key_spec);

    let prepared = prepare_session(
        ctx,
        page_target_id,
        params.get("debugTargetId").and_then(|v| v.as_str()),
    )
    .await?;

    with_page(
        prepared.params,
        ctx.hub.records(),
        ctx.cancel.clone(),
        move |client| async move {
            client.dispatch_key_event("keyDown", &key, &code, modifiers).await?;
            client.dispatch_key_event("keyUp", &key, &code, modifiers).await?;
            Ok(Value::Null)
        },
    )
    .await?;

    Ok(json!({"pressed": key_spec}))
}
