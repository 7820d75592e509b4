//! Script evaluation, web storage, and cookies.

use serde_json::{json, Value};

use deskbridge_cdp::session::with_page;
use deskbridge_core::error::{Error, Result};

use super::support::{prepare_session, required_str, resolve_uid};
use crate::{bounded_text, ToolContext};

/// Evaluate a script in the page. With a `uid`, the expression must be a
/// function declaration; it is called on the addressed element (`this`).
pub async fn action_evaluate(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let expression = required_str(params, "expression")?.to_string();

    let element_node = match params.get("uid").and_then(|v| v.as_u64()) {
        Some(uid) => {
            let uid = u32::try_from(uid)
                .map_err(|_| Error::Validation("uid out of range".into()))?;
            let entry = resolve_uid(ctx, page_target_id, uid).await?;
            Some(entry.backend_node_id.ok_or_else(|| {
                Error::Validation(format!("uid {} has no backing DOM node", uid))
            })?)
        }
        None => None,
    };

    let prepared = prepare_session(
        ctx,
        page_target_id,
        params.get("debugTargetId").and_then(|v| v.as_str()),
    )
    .await?;

    let raw = with_page(
        prepared.params,
        ctx.hub.records(),
        ctx.cancel.clone(),
        move |client| async move {
            match element_node {
                Some(backend_node_id) => {
                    client.enable_domain("DOM").await?;
                    let object_id = client.resolve_backend_node(backend_node_id).await?;
                    client.call_function_on(&object_id, &expression, vec![]).await
                }
                None => client.evaluate_js(&expression).await,
            }
        },
    )
    .await?;

    let value = raw
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null);
    let exception = raw
        .get("exceptionDetails")
        .and_then(|e| e.get("exception"))
        .and_then(|ex| ex.get("description"))
        .or_else(|| raw.get("exceptionDetails").and_then(|e| e.get("text")))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let rendered = match &value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Ok(json!({
        "value": bounded_text(&rendered, ctx.config.automation.text_budget),
        "exception": exception,
    }))
}

fn storage_object(scope: &str) -> Result<&'static str> {
    match scope {
        "local" => Ok("localStorage"),
        "session" => Ok("sessionStorage"),
        other => Err(Error::Validation(format!(
            "storage scope must be 'local' or 'session', got '{}'",
            other
        ))),
    }
}

pub async fn action_storage_get(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let scope = params.get("scope").and_then(|v| v.as_str()).unwrap_or("local");
    let store = storage_object(scope)?;

    let prepared = prepare_session(
        ctx,
        page_target_id,
        params.get("debugTargetId").and_then(|v| v.as_str()),
    )
    .await?;

    let expression = format!("JSON.stringify(Object.fromEntries(Object.entries({})))", store);
    let raw = with_page(
        prepared.params,
        ctx.hub.records(),
        ctx.cancel.clone(),
        move |client| async move { client.evaluate_js(&expression).await },
    )
    .await?;

    let serialized = raw
        .get("result")
        .and_then(|r| r.get("value"))
        .and_then(|v| v.as_str())
        .unwrap_or("{}")
        .to_string();
    Ok(json!({
        "scope": scope,
        "entries": bounded_text(&serialized, ctx.config.automation.text_budget),
    }))
}

pub async fn action_storage_set(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let scope = params.get("scope").and_then(|v| v.as_str()).unwrap_or("local");
    let store = storage_object(scope)?;
    let key = required_str(params, "storageKey")?;
    let value = required_str(params, "storageValue")?;

    let prepared = prepare_session(
        ctx,
        page_target_id,
        params.get("debugTargetId").and_then(|v| v.as_str()),
    )
    .await?;

    // serde_json string encoding doubles as JS string escaping.
    let expression = format!(
        "{}.setItem({}, {})",
        store,
        serde_json::to_string(key)?,
        serde_json::to_string(value)?
    );
    with_page(
        prepared.params,
        ctx.hub.records(),
        ctx.cancel.clone(),
        move |client| async move { client.evaluate_js(&expression).await },
    )
    .await?;

    Ok(json!({"scope": scope, "set": key}))
}

pub async fn action_cookies(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let prepared = prepare_session(
        ctx,
        page_target_id,
        params.get("debugTargetId").and_then(|v| v.as_str()),
    )
    .await?;

    let raw = with_page(
        prepared.params,
        ctx.hub.records(),
        ctx.cancel.clone(),
        |client| async move {
            client.enable_domain("Network").await?;
            client.get_cookies().await
        },
    )
    .await?;

    let cookies = raw.get("cookies").cloned().unwrap_or(json!([]));
    let count = cookies.as_array().map(|a| a.len()).unwrap_or(0);
    let serialized = cookies.to_string();
    Ok(json!({
        "count": count,
        "cookies": bounded_text(&serialized, ctx.config.automation.text_budget),
    }))
}
