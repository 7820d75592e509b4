//! Transient automation session scoped to one tool call.
//!
//! Connects to the desktop instance's debugging endpoint, attaches to
//! exactly one existing page by target id, installs popup suppression and
//! the event collectors, runs the caller's action, and always tears the
//! connection down on success, failure, and cancellation alike.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use deskbridge_core::error::{Error, Result};

use crate::client::CdpClient;
use crate::collectors::{install_collectors, SharedRecords};
use crate::targets::{fetch_targets, wait_for_target};

/// Everything a session needs to find and drive its page.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub debug_host: String,
    pub debug_port: u16,
    /// The exact debug target id to attach to.
    pub target_id: String,
    /// Page handle owning the record buffers the collectors feed.
    pub page_target_id: String,
    pub pick_timeout: Duration,
    pub pick_poll: Duration,
    pub command_timeout: Duration,
}

/// Run `action` against the page identified by `params.target_id`.
///
/// The abort signal is honored at every checkpoint: before discovery,
/// during the bounded pick poll, before connecting, and while the action
/// runs. A triggered signal yields `Error::Aborted`, never a generic
/// failure, so a stop request terminates in-flight automation silently.
pub async fn with_page<F, Fut, T>(
    params: SessionParams,
    records: SharedRecords,
    cancel: CancellationToken,
    action: F,
) -> Result<T>
where
    F: FnOnce(Arc<CdpClient>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Aborted);
    }

    let host = params.debug_host.clone();
    let port = params.debug_port;
    let target = wait_for_target(
        || fetch_targets(&host, port),
        &params.target_id,
        params.pick_poll,
        params.pick_timeout,
        &cancel,
    )
    .await?;

    let ws_url = target.web_socket_debugger_url.clone().ok_or_else(|| {
        Error::Protocol(format!(
            "target '{}' has no debugger url (already attached elsewhere?)",
            params.target_id
        ))
    })?;

    if cancel.is_cancelled() {
        return Err(Error::Aborted);
    }

    let client = Arc::new(CdpClient::connect(&ws_url, params.command_timeout).await?);

    // Everything after the connect runs under a guaranteed-teardown guard.
    let result = drive(&params, &client, records, &cancel, action).await;
    client.shutdown();
    result
}

async fn drive<F, Fut, T>(
    params: &SessionParams,
    client: &Arc<CdpClient>,
    records: SharedRecords,
    cancel: &CancellationToken,
    action: F,
) -> Result<T>
where
    F: FnOnce(Arc<CdpClient>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let popup_guard = install_popup_guard(client, &params.target_id).await?;
    let collector_handles =
        install_collectors(client, &params.page_target_id, records).await?;

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(Error::Aborted),
        result = action(client.clone()) => result,
    };

    popup_guard.abort();
    for handle in collector_handles {
        handle.abort();
    }
    outcome
}

/// Close any page spawned as a child of the selected page. The agent must
/// not lose control to a spawned tab; only the selected page survives.
async fn install_popup_guard(
    client: &Arc<CdpClient>,
    selected_target_id: &str,
) -> Result<JoinHandle<()>> {
    client.set_discover_targets(true).await?;
    let mut rx = client.subscribe_event("Target.targetCreated").await;
    let client = client.clone();
    let selected = selected_target_id.to_string();

    Ok(tokio::spawn(async move {
        while let Some(params) = rx.recv().await {
            let Some(info) = params.get("targetInfo") else {
                continue;
            };
            let target_type = info.get("type").and_then(|v| v.as_str()).unwrap_or("");
            let target_id = info.get("targetId").and_then(|v| v.as_str()).unwrap_or("");
            let opener = info.get("openerId").and_then(|v| v.as_str());

            if target_type == "page" && target_id != selected && opener == Some(selected.as_str()) {
                debug!(target_id = %target_id, "Closing popup spawned by automated page");
                if let Err(e) = client.close_target(target_id).await {
                    warn!(target_id = %target_id, error = %e, "Failed to close popup");
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskbridge_core::records::RecordStores;
    use tokio::sync::Mutex;

    fn params() -> SessionParams {
        SessionParams {
            debug_host: "127.0.0.1".into(),
            // Nothing listens here; sessions must fail before connecting.
            debug_port: 1,
            target_id: "TARGET1".into(),
            page_target_id: "p1".into(),
            pick_timeout: Duration::from_millis(300),
            pick_poll: Duration::from_millis(100),
            command_timeout: Duration::from_secs(5),
        }
    }

    fn records() -> SharedRecords {
        Arc::new(Mutex::new(RecordStores::new(16, 16)))
    }

    #[tokio::test]
    async fn pre_triggered_abort_short_circuits_session() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = ran.clone();
        let err = with_page(params(), records(), cancel, move |_client| {
            let ran = ran_clone.clone();
            async move {
                ran.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(serde_json::Value::Null)
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Aborted));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_no_matching_page() {
        // The pick window expires without the target index ever answering.
        let cancel = CancellationToken::new();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = ran.clone();
        let err = with_page(params(), records(), cancel, move |_client| {
            let ran = ran_clone.clone();
            async move {
                ran.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(serde_json::Value::Null)
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NoMatchingPage(_)));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
