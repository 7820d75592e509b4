//! Bounded wait-for-condition: poll for a selector, checking the abort
//! signal at every sleep boundary.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use deskbridge_cdp::session::with_page;
use deskbridge_core::error::{Error, Result};

use super::support::{prepare_session, required_str};
use crate::ToolContext;

const POLL_MS: u64 = 200;
const MAX_TIMEOUT_MS: u64 = 30_000;

pub async fn action_wait_for(ctx: &ToolContext, params: &Value) -> Result<Value> {
    let page_target_id = required_str(params, "pageTargetId")?;
    let selector = required_str(params, "selector")?.to_string();
    let timeout_ms = params
        .get("timeoutMs")
        .and_then(|v| v.as_u64())
        .unwrap_or(5000)
        .min(MAX_TIMEOUT_MS);

    let prepared = prepare_session(
        ctx,
        page_target_id,
        params.get("debugTargetId").and_then(|v| v.as_str()),
    )
    .await?;

    let cancel = ctx.cancel.clone();
    let probe = format!(
        "!!document.querySelector({})",
        serde_json::to_string(&selector)?
    );

    let outcome = with_page(
        prepared.params,
        ctx.hub.records(),
        ctx.cancel.clone(),
        move |client| async move {
            let started = Instant::now();
            let deadline = Duration::from_millis(timeout_ms);
            loop {
                if cancel.is_cancelled() {
                    return Err(Error::Aborted);
                }
                let result = client.evaluate_js(&probe).await?;
                let found = result
                    .get("result")
                    .and_then(|r| r.get("value"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if found {
                    return Ok((true, started.elapsed().as_millis() as u64));
                }
                if started.elapsed() >= deadline {
                    return Ok((false, started.elapsed().as_millis() as u64));
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Aborted),
                    _ = tokio::time::sleep(Duration::from_millis(POLL_MS)) => {}
                }
            }
        },
    )
    .await?;

    let (found, waited_ms) = outcome;
    Ok(json!({
        "selector": selector,
        "found": found,
        "waitedMs": waited_ms,
    }))
}
