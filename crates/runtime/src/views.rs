//! Browser View Manager: the per-window pool of embedded pages.
//!
//! Owns view lifecycle against the embedded engine's debugging endpoint and
//! forwards normalized status to the host window layer over a broadcast
//! channel. Surface placement (bounds, visibility, attachment) goes through
//! the [`ViewHost`] trait implemented by the window/UI layer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use deskbridge_cdp::client::CdpClient;
use deskbridge_cdp::targets::{fetch_targets, wait_for_target};
use deskbridge_core::config::{AutomationConfig, EngineConfig};
use deskbridge_core::error::{Error, Result};
use deskbridge_core::protocol::Bounds;
use deskbridge_core::urlnorm::normalize_url;

use crate::netstats::NetStats;
use crate::pool::{UpsertOutcome, ViewPool};
use crate::status::{PageEvent, StatusSnapshot, ViewStatus};

/// Host-window operations the excluded UI layer implements.
pub trait ViewHost: Send + Sync {
    fn attach(&self, window_id: &str, view_id: &str, bounds: Option<Bounds>, visible: bool);
    fn set_bounds(&self, window_id: &str, view_id: &str, bounds: Bounds);
    fn set_visible(&self, window_id: &str, view_id: &str, visible: bool);
    fn detach(&self, window_id: &str, view_id: &str);
    fn ui_event(&self, window_id: &str, event: &Value);
}

/// No-op host for headless runs and tests.
pub struct NullHost;

impl ViewHost for NullHost {
    fn attach(&self, _window_id: &str, _view_id: &str, _bounds: Option<Bounds>, _visible: bool) {}
    fn set_bounds(&self, _window_id: &str, _view_id: &str, _bounds: Bounds) {}
    fn set_visible(&self, _window_id: &str, _view_id: &str, _visible: bool) {}
    fn detach(&self, _window_id: &str, _view_id: &str) {}
    fn ui_event(&self, _window_id: &str, _event: &Value) {}
}

/// Events the manager emits toward the host window layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewEvent {
    #[serde(rename_all = "camelCase")]
    Status {
        window_id: String,
        key: String,
        status: StatusSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    NetStats {
        window_id: String,
        key: String,
        stats: crate::netstats::NetStatsSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    Shortcut {
        window_id: String,
        key: String,
        chord: String,
    },
    #[serde(rename_all = "camelCase")]
    WindowOpen {
        window_id: String,
        key: String,
        url: String,
    },
    #[serde(rename_all = "camelCase")]
    Destroyed { window_id: String, key: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureResult {
    pub view_id: String,
    pub debug_target_id: String,
    pub url: String,
}

/// Chords the host intercepts before the page sees them.
const SHORTCUT_BRIDGE_SCRIPT: &str = r#"
(() => {
  if (window.__hostShortcutInstalled) return;
  window.__hostShortcutInstalled = true;
  const reserved = (e) => {
    const mod = e.ctrlKey || e.metaKey;
    if (!mod && e.key !== 'F5' && e.key !== 'F12') return null;
    const key = e.key.toLowerCase();
    if (mod && ['r', 'l', 'w', 't', '[', ']'].includes(key)) return key;
    if (e.key === 'F5') return 'f5';
    if (e.key === 'F12') return 'f12';
    return null;
  };
  window.addEventListener('keydown', (e) => {
    const chord = reserved(e);
    if (chord && typeof window.__hostShortcut === 'function') {
      e.preventDefault();
      e.stopImmediatePropagation();
      window.__hostShortcut(chord);
    }
  }, true);
})();
"#;

struct ViewWatcher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ViewManager {
    engine: EngineConfig,
    automation: AutomationConfig,
    host: Arc<dyn ViewHost>,
    pool: Mutex<ViewPool>,
    watchers: Mutex<HashMap<String, ViewWatcher>>,
    events: broadcast::Sender<ViewEvent>,
}

fn watcher_key(window_id: &str, key: &str) -> String {
    format!("{}\u{1f}{}", window_id, key)
}

impl ViewManager {
    pub fn new(engine: EngineConfig, automation: AutomationConfig, host: Arc<dyn ViewHost>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            engine,
            automation,
            host,
            pool: Mutex::new(ViewPool::new()),
            watchers: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Status/stats/shortcut stream for the host window layer.
    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    pub fn host(&self) -> Arc<dyn ViewHost> {
        self.host.clone()
    }

    // ── Core operations ───────────────────────────────────────────────

    /// Idempotent create-or-update of a named view. A navigation is issued
    /// only when the resolved URL differs from the last one this manager
    /// itself requested.
    pub async fn upsert(
        &self,
        window_id: &str,
        key: &str,
        url: &str,
        bounds: Option<Bounds>,
        visible: bool,
    ) -> Result<UpsertOutcome> {
        let resolved = normalize_url(url)?;
        let outcome = {
            let mut pool = self.pool.lock().await;
            pool.upsert(window_id, key, &resolved, bounds, visible)
        };

        if outcome.created {
            if let Err(e) = self.provision_view(window_id, key, &outcome, bounds, visible).await {
                // Roll the half-created entry back so a retry starts clean.
                self.pool.lock().await.destroy(window_id, key);
                return Err(e);
            }
        } else {
            if outcome.bounds_changed {
                if let Some(b) = bounds {
                    self.host.set_bounds(window_id, &outcome.view_id, b);
                }
            }
            if outcome.visibility_changed {
                self.host.set_visible(window_id, &outcome.view_id, visible);
            }
            if let Some(nav_url) = &outcome.navigate {
                self.navigate_view(window_id, key, nav_url).await?;
            }
        }

        Ok(outcome)
    }

    /// Resolve or create the view and hand back its debug target id for
    /// the server side.
    pub async fn ensure(&self, window_id: &str, key: &str, url: &str) -> Result<EnsureResult> {
        self.upsert(window_id, key, url, None, true).await?;
        let entry = {
            let pool = self.pool.lock().await;
            pool.get(window_id, key).cloned()
        }
        .ok_or_else(|| Error::Protocol(format!("view '{}' vanished during ensure", key)))?;

        let debug_target_id = entry.debug_target_id.ok_or_else(|| {
            Error::Protocol(format!("view '{}' has no debug target id", key))
        })?;
        Ok(EnsureResult {
            view_id: entry.view_id,
            debug_target_id,
            url: entry.last_requested_url.unwrap_or_default(),
        })
    }

    /// Destroy one view: stop its watcher, close its page, detach its
    /// surface, purge its stats.
    pub async fn destroy(&self, window_id: &str, key: &str) -> Result<()> {
        let entry = {
            let mut pool = self.pool.lock().await;
            pool.destroy(window_id, key)
        }
        .ok_or_else(|| Error::Validation(format!("no view '{}' in window '{}'", key, window_id)))?;

        if let Some(watcher) = self.watchers.lock().await.remove(&watcher_key(window_id, key)) {
            watcher.cancel.cancel();
            watcher.handle.abort();
        }

        if let Some(target_id) = &entry.debug_target_id {
            if let Err(e) = self.close_page_target(target_id).await {
                warn!(target_id = %target_id, error = %e, "Failed to close page target");
            }
        }
        self.host.detach(window_id, &entry.view_id);
        let _ = self.events.send(ViewEvent::Destroyed {
            window_id: window_id.to_string(),
            key: key.to_string(),
        });
        Ok(())
    }

    /// Cascading destroy when a window closes. Iterates a snapshot of
    /// keys, never the live collection.
    pub async fn destroy_all(&self, window_id: &str) -> usize {
        let keys: Vec<String> = {
            let pool = self.pool.lock().await;
            pool.snapshot_keys(window_id)
        };
        let mut destroyed = 0;
        for key in keys {
            if self.destroy(window_id, &key).await.is_ok() {
                destroyed += 1;
            }
        }
        destroyed
    }

    pub async fn view_count(&self, window_id: &str) -> usize {
        self.pool.lock().await.count(window_id)
    }

    pub async fn go_back(&self, window_id: &str, key: &str) -> Result<()> {
        self.eval_on_view(window_id, key, "history.back()").await
    }

    pub async fn go_forward(&self, window_id: &str, key: &str) -> Result<()> {
        self.eval_on_view(window_id, key, "history.forward()").await
    }

    /// Forward a host UI event (from the server side) to the window layer.
    pub fn forward_ui_event(&self, window_id: &str, event: &Value) {
        self.host.ui_event(window_id, event);
    }

    // ── Engine plumbing ───────────────────────────────────────────────

    async fn browser_ws_url(&self) -> Result<String> {
        let url = format!(
            "http://{}:{}/json/version",
            self.engine.debug_host, self.engine.debug_port
        );
        let resp = reqwest::get(&url)
            .await
            .map_err(|e| Error::Protocol(format!("engine endpoint unreachable: {}", e)))?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("bad /json/version response: {}", e)))?;
        body.get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Protocol("engine exposes no browser debugger url".into()))
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.automation.command_timeout_secs)
    }

    /// Short-lived browser-level attach.
    async fn with_browser_client<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<CdpClient>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let ws_url = self.browser_ws_url().await?;
        let client = Arc::new(CdpClient::connect(&ws_url, self.command_timeout()).await?);
        let result = f(client.clone()).await;
        client.shutdown();
        result
    }

    /// Short-lived page-level attach by exact target id.
    async fn with_page_client<T, F, Fut>(&self, target_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(Arc<CdpClient>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let host = self.engine.debug_host.clone();
        let port = self.engine.debug_port;
        let cancel = CancellationToken::new();
        let target = wait_for_target(
            || fetch_targets(&host, port),
            target_id,
            Duration::from_millis(self.automation.page_pick_poll_ms),
            Duration::from_millis(self.automation.page_pick_timeout_ms),
            &cancel,
        )
        .await?;
        let ws_url = target
            .web_socket_debugger_url
            .ok_or_else(|| Error::Protocol(format!("target '{}' has no debugger url", target_id)))?;
        let client = Arc::new(CdpClient::connect(&ws_url, self.command_timeout()).await?);
        let result = f(client.clone()).await;
        client.shutdown();
        result
    }

    async fn close_page_target(&self, target_id: &str) -> Result<()> {
        let target_id = target_id.to_string();
        self.with_browser_client(|client| async move { client.close_target(&target_id).await })
            .await
    }

    async fn navigate_view(&self, window_id: &str, key: &str, url: &str) -> Result<()> {
        let target_id = self.target_id_for(window_id, key).await?;
        let url = url.to_string();
        self.with_page_client(&target_id, |client| async move {
            client.navigate(&url).await?;
            Ok(())
        })
        .await
    }

    async fn eval_on_view(&self, window_id: &str, key: &str, expression: &str) -> Result<()> {
        let target_id = self.target_id_for(window_id, key).await?;
        let expression = expression.to_string();
        self.with_page_client(&target_id, |client| async move {
            client.evaluate_js(&expression).await?;
            Ok(())
        })
        .await
    }

    async fn target_id_for(&self, window_id: &str, key: &str) -> Result<String> {
        let pool = self.pool.lock().await;
        pool.get(window_id, key)
            .and_then(|e| e.debug_target_id.clone())
            .ok_or_else(|| {
                Error::Validation(format!("no live view '{}' in window '{}'", key, window_id))
            })
    }

    /// Create the page target and install the per-view feature set. Runs
    /// once, on view creation.
    async fn provision_view(
        &self,
        window_id: &str,
        key: &str,
        outcome: &UpsertOutcome,
        bounds: Option<Bounds>,
        visible: bool,
    ) -> Result<()> {
        let url = outcome
            .navigate
            .clone()
            .unwrap_or_else(|| "about:blank".to_string());
        let target_id = self
            .with_browser_client(|client| async move { client.create_target(&url).await })
            .await?;

        {
            let mut pool = self.pool.lock().await;
            pool.set_debug_target(window_id, key, target_id.clone());
        }
        self.host.attach(window_id, &outcome.view_id, bounds, visible);

        self.spawn_watcher(window_id, key, &target_id).await;
        self.pool.lock().await.mark_features_installed(window_id, key);
        info!(
            window_id = %window_id,
            key = %key,
            target_id = %target_id,
            "View provisioned"
        );
        Ok(())
    }

    async fn spawn_watcher(&self, window_id: &str, key: &str, target_id: &str) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_view_watcher(
            self.engine.clone(),
            self.automation.clone(),
            self.events.clone(),
            window_id.to_string(),
            key.to_string(),
            target_id.to_string(),
            cancel.clone(),
        ));
        let mut watchers = self.watchers.lock().await;
        if let Some(old) = watchers.insert(watcher_key(window_id, key), ViewWatcher { cancel, handle })
        {
            old.cancel.cancel();
            old.handle.abort();
        }
    }
}

/// The view's own debugging attachment: feeds the status state machine and
/// network statistics, intercepts window-open requests, and bridges
/// host-reserved shortcuts.
#[allow(clippy::too_many_arguments)]
async fn run_view_watcher(
    engine: EngineConfig,
    automation: AutomationConfig,
    events: broadcast::Sender<ViewEvent>,
    window_id: String,
    key: String,
    target_id: String,
    cancel: CancellationToken,
) {
    let pick_poll = Duration::from_millis(automation.page_pick_poll_ms);
    let pick_timeout = Duration::from_millis(automation.page_pick_timeout_ms);
    let host = engine.debug_host.clone();
    let port = engine.debug_port;

    let target = match wait_for_target(
        || fetch_targets(&host, port),
        &target_id,
        pick_poll,
        pick_timeout,
        &cancel,
    )
    .await
    {
        Ok(t) => t,
        Err(e) => {
            warn!(target_id = %target_id, error = %e, "View watcher could not find its page");
            return;
        }
    };
    let Some(ws_url) = target.web_socket_debugger_url else {
        warn!(target_id = %target_id, "View page has no debugger url");
        return;
    };

    let client = match CdpClient::connect(&ws_url, Duration::from_secs(automation.command_timeout_secs)).await
    {
        Ok(c) => Arc::new(c),
        Err(e) => {
            warn!(target_id = %target_id, error = %e, "View watcher failed to attach");
            return;
        }
    };

    if let Err(e) = install_watch_domains(&client).await {
        warn!(target_id = %target_id, error = %e, "View watcher setup failed");
        client.shutdown();
        return;
    }

    // Main frame id for sub-frame filtering.
    let main_frame_id = client
        .send_command("Page.getFrameTree", json!({}))
        .await
        .ok()
        .and_then(|tree| {
            tree.get("frameTree")
                .and_then(|t| t.get("frame"))
                .and_then(|f| f.get("id"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_default();

    let mut status = ViewStatus::new();
    let mut stats = NetStats::new();
    let debounce_ms = automation.status_debounce_ms as i64;

    let mut ev_start = client.subscribe_event("Page.frameStartedLoading").await;
    let mut ev_stop = client.subscribe_event("Page.frameStoppedLoading").await;
    let mut ev_dom = client.subscribe_event("Page.domContentEventFired").await;
    let mut ev_nav = client.subscribe_event("Page.frameNavigated").await;
    let mut ev_inplace = client.subscribe_event("Page.navigatedWithinDocument").await;
    let mut ev_info = client.subscribe_event("Target.targetInfoChanged").await;
    let mut ev_created = client.subscribe_event("Target.targetCreated").await;
    let mut ev_binding = client.subscribe_event("Runtime.bindingCalled").await;
    let mut ev_req = client.subscribe_event("Network.requestWillBeSent").await;
    let mut ev_fin = client.subscribe_event("Network.loadingFinished").await;
    let mut ev_fail = client.subscribe_event("Network.loadingFailed").await;
    let mut ticker = tokio::time::interval(Duration::from_millis(automation.status_debounce_ms.max(50)));

    let emit_status = |snapshot: StatusSnapshot| {
        let _ = events.send(ViewEvent::Status {
            window_id: window_id.clone(),
            key: key.clone(),
            status: snapshot,
        });
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            Some(p) = ev_start.recv() => {
                let main = frame_field(&p) == main_frame_id;
                if let Some(s) = status.apply(PageEvent::LoadStarted { main_frame: main }) {
                    emit_status(s);
                }
            }
            Some(p) = ev_stop.recv() => {
                let main = frame_field(&p) == main_frame_id;
                if let Some(s) = status.apply(PageEvent::LoadStopped { main_frame: main }) {
                    emit_status(s);
                }
            }
            Some(_) = ev_dom.recv() => {
                if let Some(s) = status.apply(PageEvent::DomReady) {
                    emit_status(s);
                }
                if let Some(href) = probe_favicon(&client).await {
                    if let Some(s) = status.apply(PageEvent::FaviconChanged(href)) {
                        emit_status(s);
                    }
                }
            }
            Some(p) = ev_nav.recv() => {
                let frame = p.get("frame").cloned().unwrap_or(Value::Null);
                let main = frame.get("parentId").is_none();
                let url = frame.get("url").and_then(|v| v.as_str()).unwrap_or("").to_string();
                if main {
                    stats.reset();
                    if let Some(s) = refresh_history(&client, &mut status).await {
                        emit_status(s);
                    }
                }
                if let Some(s) = status.apply(PageEvent::NavigationCommitted {
                    url,
                    main_frame: main,
                    in_place: false,
                }) {
                    emit_status(s);
                }
            }
            Some(p) = ev_inplace.recv() => {
                let main = frame_field(&p) == main_frame_id;
                let url = p.get("url").and_then(|v| v.as_str()).unwrap_or("").to_string();
                if let Some(s) = status.apply(PageEvent::NavigationCommitted {
                    url,
                    main_frame: main,
                    in_place: true,
                }) {
                    emit_status(s);
                }
            }
            Some(p) = ev_info.recv() => {
                let info = p.get("targetInfo").cloned().unwrap_or(Value::Null);
                if info.get("targetId").and_then(|v| v.as_str()) == Some(target_id.as_str()) {
                    let title = info.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    if let Some(s) = status.apply(PageEvent::TitleChanged(title)) {
                        emit_status(s);
                    }
                }
            }
            Some(p) = ev_created.recv() => {
                handle_spawned_target(&client, &events, &window_id, &key, &target_id, &p).await;
            }
            Some(p) = ev_binding.recv() => {
                if p.get("name").and_then(|v| v.as_str()) == Some("__hostShortcut") {
                    let chord = p.get("payload").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let _ = events.send(ViewEvent::Shortcut {
                        window_id: window_id.clone(),
                        key: key.clone(),
                        chord,
                    });
                }
            }
            Some(_) = ev_req.recv() => {
                stats.on_request();
            }
            Some(p) = ev_fin.recv() => {
                let bytes = p.get("encodedDataLength").and_then(|v| v.as_f64()).unwrap_or(0.0) as u64;
                stats.on_finished(bytes);
            }
            Some(p) = ev_fail.recv() => {
                stats.on_failed();
                let is_document = p.get("type").and_then(|v| v.as_str()) == Some("Document");
                if is_document {
                    let error = p.get("errorText").and_then(|v| v.as_str()).unwrap_or("load failed").to_string();
                    if let Some(s) = status.apply(PageEvent::LoadFailed { error, main_frame: true }) {
                        emit_status(s);
                    }
                }
            }
            _ = ticker.tick() => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                if let Some(snapshot) = stats.maybe_emit(now_ms, debounce_ms) {
                    let _ = events.send(ViewEvent::NetStats {
                        window_id: window_id.clone(),
                        key: key.clone(),
                        stats: snapshot,
                    });
                }
            }
        }
    }

    client.shutdown();
    debug!(window_id = %window_id, key = %key, "View watcher stopped");
}

async fn install_watch_domains(client: &Arc<CdpClient>) -> Result<()> {
    client.enable_domain("Page").await?;
    client.enable_domain("Network").await?;
    client.enable_domain("Runtime").await?;
    client.set_discover_targets(true).await?;
    client
        .send_command("Runtime.addBinding", json!({"name": "__hostShortcut"}))
        .await?;
    client
        .send_command(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({"source": SHORTCUT_BRIDGE_SCRIPT}),
        )
        .await?;
    Ok(())
}

/// Window-open interception: surface the request to the host layer, keep
/// the agent on its own page by redirecting the URL into the current view,
/// and close the spawned page.
async fn handle_spawned_target(
    client: &Arc<CdpClient>,
    events: &broadcast::Sender<ViewEvent>,
    window_id: &str,
    key: &str,
    own_target_id: &str,
    params: &Value,
) {
    let Some(info) = params.get("targetInfo") else {
        return;
    };
    let target_type = info.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let spawned_id = info.get("targetId").and_then(|v| v.as_str()).unwrap_or("");
    let opener = info.get("openerId").and_then(|v| v.as_str());
    if target_type != "page" || spawned_id == own_target_id || opener != Some(own_target_id) {
        return;
    }

    let url = info.get("url").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let _ = events.send(ViewEvent::WindowOpen {
        window_id: window_id.to_string(),
        key: key.to_string(),
        url: url.clone(),
    });

    if let Err(e) = client.close_target(spawned_id).await {
        warn!(target_id = %spawned_id, error = %e, "Failed to close spawned page");
    }
    if !url.is_empty() && url != "about:blank" {
        if let Err(e) = client.navigate(&url).await {
            warn!(url = %url, error = %e, "Popup redirect navigation failed");
        }
    }
}

async fn probe_favicon(client: &Arc<CdpClient>) -> Option<String> {
    let result = client
        .evaluate_js("(document.querySelector(\"link[rel*='icon']\") || {}).href || ''")
        .await
        .ok()?;
    result
        .get("result")
        .and_then(|r| r.get("value"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

async fn refresh_history(client: &Arc<CdpClient>, status: &mut ViewStatus) -> Option<StatusSnapshot> {
    let history = client
        .send_command("Page.getNavigationHistory", json!({}))
        .await
        .ok()?;
    let current = history.get("currentIndex").and_then(|v| v.as_i64())?;
    let count = history
        .get("entries")
        .and_then(|v| v.as_array())
        .map(|a| a.len() as i64)?;
    status.set_history(current > 0, current + 1 < count)
}

fn frame_field(params: &Value) -> String {
    params
        .get("frameId")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}
