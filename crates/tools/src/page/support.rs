//! Shared pre-flight and resolution helpers for the page tool actions.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use deskbridge_cdp::client::CdpClient;
use deskbridge_cdp::input::{center_from_box_model, center_from_quads};
use deskbridge_cdp::session::SessionParams;
use deskbridge_cdp::snapshot::UidEntry;
use deskbridge_core::error::{Error, Result};
use deskbridge_hub::{PageTargetRecord, RuntimeInfoUpdate};

use crate::ToolContext;

/// Everything a session-backed action needs after validation.
pub struct PreparedSession {
    pub params: SessionParams,
    pub record: PageTargetRecord,
    /// Host OS of the desktop runtime, for platform-appropriate chords.
    pub platform: String,
}

/// Validate handle, ownership, target id, and runtime presence, in that
/// order, so the caller gets the most actionable error. Never connects.
pub async fn prepare_session(
    ctx: &ToolContext,
    page_target_id: &str,
    expected_target_id: Option<&str>,
) -> Result<PreparedSession> {
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

    // One current debug target per record. A caller-supplied target id
    // either matches the stored one, or is adopted when the record has
    // none. A mismatch is a hard error, never a silent fallback.
    let target_id = match (&record.debug_target_id, expected_target_id) {
        (Some(stored), Some(expected)) if stored != expected => {
            return Err(Error::OwnershipMismatch(format!(
                "debug target id mismatch for page '{}' (stored {}, caller {})",
                page_target_id, stored, expected
            )));
        }
        (Some(stored), _) => stored.clone(),
        (None, Some(expected)) => {
            ctx.hub
                .update_page_runtime_info(
                    page_target_id,
                    RuntimeInfoUpdate {
                        debug_target_id: Some(expected.to_string()),
                        view_id: None,
                    },
                )
                .await;
            expected.to_string()
        }
        (None, None) => {
            return Err(Error::UnknownHandle(format!(
                "page '{}' has no debug target yet; call open first",
                page_target_id
            )));
        }
    };

    if !ctx.hub.has_instance(&record.client_id).await {
        return Err(Error::RuntimeOffline(format!(
            "desktop runtime '{}' is not connected",
            record.client_id
        )));
    }
    let endpoint = ctx
        .hub
        .debug_endpoint(&record.client_id)
        .await
        .ok_or_else(|| {
            Error::RuntimeOffline(format!(
                "desktop runtime '{}' went away",
                record.client_id
            ))
        })?;

    let automation = &ctx.config.automation;
    Ok(PreparedSession {
        params: SessionParams {
            debug_host: endpoint.debug_host,
            debug_port: endpoint.debug_port,
            target_id,
            page_target_id: page_target_id.to_string(),
            pick_timeout: Duration::from_millis(automation.page_pick_timeout_ms),
            pick_poll: Duration::from_millis(automation.page_pick_poll_ms),
            command_timeout: Duration::from_secs(automation.command_timeout_secs),
        },
        record,
        platform: endpoint.platform,
    })
}

/// Resolve a uid from the page's last snapshot.
pub async fn resolve_uid(ctx: &ToolContext, page_target_id: &str, uid: u32) -> Result<UidEntry> {
    let uids = ctx.uids.lock().await;
    uids.get(page_target_id)
        .and_then(|map| map.get(&uid))
        .cloned()
        .ok_or_else(|| {
            Error::Validation(format!(
                "unknown uid {} for page '{}'; take a snapshot first",
                uid, page_target_id
            ))
        })
}

/// On-screen center of an element: content geometry first, box model as
/// fallback. A node with no geometry (detached after navigation, hidden)
/// is reported as NoMatchingPage so a stale uid is never a silent no-op.
pub async fn element_center(client: &Arc<CdpClient>, backend_node_id: i64) -> Result<(f64, f64)> {
    if let Ok(quads) = client.get_content_quads(backend_node_id).await {
        if let Some(center) = center_from_quads(&quads) {
            return Ok(center);
        }
    }
    let box_model = client.get_box_model(backend_node_id).await.map_err(|e| {
        Error::NoMatchingPage(format!(
            "element geometry unavailable (stale snapshot?): {}",
            e
        ))
    })?;
    center_from_box_model(&box_model).ok_or_else(|| {
        Error::NoMatchingPage("element has no on-screen geometry (stale snapshot?)".into())
    })
}

/// Scroll the element into view so synthesized pointer input lands on it.
pub async fn scroll_into_view(client: &Arc<CdpClient>, backend_node_id: i64) -> Result<()> {
    let object_id = client.resolve_backend_node(backend_node_id).await?;
    client
        .call_function_on(
            &object_id,
            "function() { this.scrollIntoView({block: 'center', inline: 'center'}); }",
            vec![],
        )
        .await?;
    Ok(())
}

pub fn required_str<'a>(params: &'a Value, field: &str) -> Result<&'a str> {
    params
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Validation(format!("'{}' is required", field)))
}

pub fn required_u32(params: &Value, field: &str) -> Result<u32> {
    params
        .get(field)
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| Error::Validation(format!("'{}' is required", field)))
}

/// Window/key addressing convention: a conversation tab owns one desktop
/// window context, and each page handle maps to a deterministic view key.
pub fn window_for_tab(tab_id: &str) -> String {
    tab_id.to_string()
}

pub fn view_key_for_handle(page_target_id: &str) -> String {
    let prefix: String = page_target_id.chars().take(8).collect();
    format!("page-{}", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_str_rejects_missing_and_empty() {
        assert!(required_str(&json!({"url": "x"}), "url").is_ok());
        assert!(required_str(&json!({"url": ""}), "url").is_err());
        assert!(required_str(&json!({}), "url").is_err());
        assert!(required_str(&json!({"url": 7}), "url").is_err());
    }

    #[test]
    fn view_key_is_deterministic_per_handle() {
        let key = view_key_for_handle("0a1b2c3d-rest-of-uuid");
        assert_eq!(key, "page-0a1b2c3d");
        assert_eq!(key, view_key_for_handle("0a1b2c3d-rest-of-uuid"));
    }
}
