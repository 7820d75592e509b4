//! Debugging-target discovery and exact-match page picking.
//!
//! A session must attach to the one page whose target id matches the
//! registry record. URL-similarity fallbacks are forbidden: with several
//! tabs open they attach to the wrong page.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use deskbridge_core::error::{Error, Result};

/// One entry from the engine's `/json/list` target index.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub web_socket_debugger_url: Option<String>,
}

/// Fetch the engine's open targets over its HTTP index.
pub async fn fetch_targets(debug_host: &str, debug_port: u16) -> Result<Vec<TargetInfo>> {
    let url = format!("http://{}:{}/json/list", debug_host, debug_port);
    let resp = reqwest::get(&url)
        .await
        .map_err(|e| Error::Protocol(format!("target index unreachable at {}: {}", url, e)))?;
    let targets: Vec<TargetInfo> = resp
        .json()
        .await
        .map_err(|e| Error::Protocol(format!("bad target index response: {}", e)))?;
    Ok(targets)
}

/// Select the one page with this exact target id. A page sharing only a
/// similar URL is never selected.
pub fn pick_exact<'a>(targets: &'a [TargetInfo], target_id: &str) -> Option<&'a TargetInfo> {
    targets
        .iter()
        .find(|t| t.target_type == "page" && t.id == target_id)
}

/// Poll for the matching page within a bounded window, honoring the abort
/// signal at every poll boundary.
pub async fn wait_for_target<F, Fut>(
    mut fetch: F,
    target_id: &str,
    poll: Duration,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<TargetInfo>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<TargetInfo>>>,
{
    let started = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Aborted);
        }

        match fetch().await {
            Ok(targets) => {
                if let Some(found) = pick_exact(&targets, target_id) {
                    return Ok(found.clone());
                }
            }
            Err(e) => {
                debug!(error = %e, "Target index fetch failed, will retry");
            }
        }

        if started.elapsed() + poll > deadline {
            return Err(Error::NoMatchingPage(format!(
                "target '{}' did not appear within {:?}",
                target_id, deadline
            )));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Aborted),
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: &str, url: &str) -> TargetInfo {
        TargetInfo {
            id: id.into(),
            target_type: "page".into(),
            title: String::new(),
            url: url.into(),
            web_socket_debugger_url: Some(format!("ws://127.0.0.1:9222/devtools/page/{id}")),
        }
    }

    #[test]
    fn pick_matches_target_id_exactly() {
        let targets = vec![
            page("AAA", "https://example.com/login"),
            page("BBB", "https://example.com/login"),
        ];
        assert_eq!(pick_exact(&targets, "BBB").unwrap().id, "BBB");
        assert!(pick_exact(&targets, "CCC").is_none());
    }

    #[test]
    fn pick_never_selects_by_url_similarity() {
        // Same URL as what the caller wants, different target id: no match.
        let targets = vec![page("AAA", "https://example.com/app")];
        assert!(pick_exact(&targets, "ZZZ").is_none());
    }

    #[test]
    fn pick_ignores_non_page_targets() {
        let mut worker = page("AAA", "https://example.com");
        worker.target_type = "service_worker".into();
        let targets = vec![worker];
        assert!(pick_exact(&targets, "AAA").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_resolves_when_target_appears() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let cancel = CancellationToken::new();

        let found = wait_for_target(
            move || {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    if n < 2 {
                        Ok(vec![])
                    } else {
                        Ok(vec![page("AAA", "https://example.com")])
                    }
                }
            },
            "AAA",
            Duration::from_millis(100),
            Duration::from_secs(5),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(found.id, "AAA");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_with_no_matching_page() {
        let cancel = CancellationToken::new();
        let err = wait_for_target(
            || async { Ok(vec![page("OTHER", "https://example.com")]) },
            "AAA",
            Duration::from_millis(100),
            Duration::from_millis(500),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NoMatchingPage(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn pre_cancelled_wait_aborts_without_polling() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let polled = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let polled_clone = polled.clone();
        let err = wait_for_target(
            move || {
                let polled = polled_clone.clone();
                async move {
                    polled.store(true, std::sync::atomic::Ordering::SeqCst);
                    Ok(vec![])
                }
            },
            "AAA",
            Duration::from_millis(100),
            Duration::from_secs(5),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Aborted));
        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_poll_aborts_within_one_tick() {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        // Cancel shortly after the first empty poll result.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let started = Instant::now();
        let err = wait_for_target(
            || async { Ok(vec![]) },
            "AAA",
            Duration::from_millis(200),
            Duration::from_secs(60),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Aborted));
        // Unwound at the sleep boundary, not after the full deadline.
        assert!(started.elapsed() < Duration::from_millis(400));
    }
}
