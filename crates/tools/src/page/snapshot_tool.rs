//! Accessibility snapshot action: the source of element uids.

use serde_json::{json, Value};

use deskbridge_cdp::session::with_page;
use deskbridge_cdp::snapshot::{assign_uids, parse_ax_tree, render_tree};
use deskbridge_core::error::Result;

use super::support::{prepare_session, required_str};
use crate::{bounded_text, ToolContext};

pub async fn action_snapshot(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let compact = params.get("compact").and_then(|v| v.as_bool()).unwrap_or(true);

    let prepared = prepare_session(
        ctx,
        page_target_id,
        params.get("debugTargetId").and_then(|v| v.as_str()),
    )
    .await?;

    let ax_tree = with_page(
        prepared.params,
        ctx.hub.records(),
        ctx.cancel.clone(),
        |client| async move {
            client.enable_domain("Accessibility").await?;
            client.get_full_ax_tree().await
        },
    )
    .await?;

    let mut nodes = parse_ax_tree(&ax_tree);
    // Fresh numbering per snapshot; stale uids resolve to nothing.
    let (_, uid_map) = assign_uids(&mut nodes, 0, false);
    let uid_count = uid_map.len();
    ctx.uids
        .lock()
        .await
        .insert(page_target_id.to_string(), uid_map);

    let tree_text = render_tree(&nodes, compact, Some(30));
    Ok(json!({
        "pageTargetId": page_target_id,
        "snapshot": bounded_text(&tree_text, ctx.config.automation.snapshot_budget),
        "uidCount": uid_count,
    }))
}
