//! Network and console history reads. These never open a debugging
//! connection: they read the bounded record stores populated by session
//! collectors.

use serde_json::{json, Value};

use deskbridge_core::error::{Error, Result};

use super::support::required_str;
use crate::{bounded_text, ToolContext};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 200;

/// Shared handle/ownership validation for history reads. A page with no
/// debug target yet still has (empty) history.
async fn validate_handle(ctx: &ToolContext, page_target_id: &str) -> Result<()> {
    let record = ctx.hub.get_page(page_target_id).await.ok_or_else(|| {
        Error::UnknownHandle(format!(
            "unknown page handle '{}'; call open first",
            page_target_id
        ))
    })?;
    if record.tab_id != ctx.tab_id {
        return Err(Error::OwnershipMismatch(format!(
            "page handle '{}' belongs to another conversation",
            page_target_id
        )));
    }
    Ok(())
}

fn limit_param(params: &Value) -> usize {
    params
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|l| (l as usize).min(MAX_LIMIT))
        .unwrap_or(DEFAULT_LIMIT)
}

pub async fn action_network_list(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    validate_handle(ctx, page_target_id).await?;
    let limit = limit_param(params);

    let records = ctx.hub.records();
    let listed = records.lock().await.list_network(page_target_id, limit);
    Ok(json!({
        "pageTargetId": page_target_id,
        "count": listed.len(),
        "requests": listed,
    }))
}

pub async fn action_network_get(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let request_id = required_str(params, "requestId")?;
    validate_handle(ctx, page_target_id).await?;

    let records = ctx.hub.records();
    let found = records.lock().await.get_network(page_target_id, request_id);
    match found {
        Some(record) => Ok(json!({"request": record})),
        None => Err(Error::Validation(format!(
            "request '{}' is not in the bounded history (evicted or never seen)",
            request_id
        ))),
    }
}

pub async fn action_console_list(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    validate_handle(ctx, page_target_id).await?;
    let limit = limit_param(params);

    let records = ctx.hub.records();
    let listed = records.lock().await.list_console(page_target_id, limit);
    let budget = ctx.config.automation.text_budget / listed.len().max(1);
    let messages: Vec<Value> = listed
        .iter()
        .map(|m| {
            json!({
                "messageId": m.message_id,
                "level": m.level,
                "text": bounded_text(&m.text, budget.max(200)),
                "sourceUrl": m.source_url,
                "line": m.line,
                "atMs": m.at_ms,
            })
        })
        .collect();
    Ok(json!({
        "pageTargetId": page_target_id,
        "count": messages.len(),
        "messages": messages,
    }))
}

pub async fn action_console_get(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let message_id = params
        .get("messageId")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| Error::Validation("'messageId' is required".into()))?;
    validate_handle(ctx, page_target_id).await?;

    let records = ctx.hub.records();
    let found = records.lock().await.get_console(page_target_id, message_id);
    match found {
        Some(message) => Ok(json!({
            "message": {
                "messageId": message.message_id,
                "level": message.level,
                "text": bounded_text(&message.text, ctx.config.automation.text_budget),
                "sourceUrl": message.source_url,
                "line": message.line,
                "atMs": message.at_ms,
            },
        })),
        None => Err(Error::Validation(format!(
            "console message {} is not in the bounded history (evicted or never seen)",
            message_id
        ))),
    }
}
