//! Action tool layer: the agent-facing operations over page handles.
//!
//! Every tool call takes a page handle, validates input shape, performs one
//! focused operation (over a transient automation session, or straight
//! against the record stores for history reads), and returns a truncated,
//! size-bounded `{ok, data|error}` envelope. Expected failure modes never
//! throw past the tool boundary.

pub mod page;
pub mod registry;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use deskbridge_cdp::snapshot::UidMap;
use deskbridge_core::error::{Error, Result};
use deskbridge_core::Config;
use deskbridge_hub::Hub;

pub use registry::ToolRegistry;

/// Truncate a string to at most `max_chars` bytes, respecting UTF-8 char
/// boundaries. Returns a borrowed slice if no truncation needed.
pub fn safe_truncate(s: &str, max_chars: usize) -> &str {
    if s.len() <= max_chars {
        return s;
    }
    let mut end = max_chars;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Bounded text payload for the result envelope: the text plus an explicit
/// truncation marker, because unbounded output would be re-injected into
/// the agent's context.
pub fn bounded_text(s: &str, budget: usize) -> Value {
    if s.len() <= budget {
        json!({"text": s, "truncated": false})
    } else {
        json!({
            "text": safe_truncate(s, budget),
            "truncated": true,
            "totalChars": s.len(),
        })
    }
}

/// Success envelope.
pub fn ok_envelope(data: Value) -> Value {
    json!({"ok": true, "data": data})
}

/// Failure envelope with a stable error code and actionable message.
pub fn err_envelope(error: &Error) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": error.code(),
            "message": error.to_string(),
        },
    })
}

/// Uid maps from prior snapshots, keyed by page handle. Persisted across
/// tool calls so click/fill can resolve uids without re-snapshotting.
pub type UidTable = Arc<Mutex<HashMap<String, UidMap>>>;

#[derive(Clone)]
pub struct ToolContext {
    pub hub: Arc<Hub>,
    pub config: Config,
    pub workspace: PathBuf,
    /// Owning conversation context; page handles from other tabs are a
    /// hard ownership error.
    pub tab_id: String,
    /// Desktop instance serving this conversation.
    pub client_id: String,
    pub uids: UidTable,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(hub: Arc<Hub>, config: Config, workspace: PathBuf, tab_id: &str, client_id: &str) -> Self {
        Self {
            hub,
            config,
            workspace,
            tab_id: tab_id.to_string(),
            client_id: client_id.to_string(),
            uids: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }
}

pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    fn validate(&self, params: &Value) -> Result<()>;
    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        let t = safe_truncate(s, 3);
        assert!(t.len() <= 3);
        assert!(s.starts_with(t));
    }

    #[test]
    fn bounded_text_flags_truncation() {
        let long = "x".repeat(100);
        let v = bounded_text(&long, 10);
        assert_eq!(v["truncated"], true);
        assert_eq!(v["totalChars"], 100);
        assert_eq!(v["text"].as_str().unwrap().len(), 10);

        let v = bounded_text("short", 10);
        assert_eq!(v["truncated"], false);
    }

    #[test]
    fn envelopes_have_stable_shape() {
        let ok = ok_envelope(json!({"x": 1}));
        assert_eq!(ok["ok"], true);
        assert_eq!(ok["data"]["x"], 1);

        let err = err_envelope(&Error::RuntimeOffline("no instance".into()));
        assert_eq!(err["ok"], false);
        assert_eq!(err["error"]["code"], "runtime_offline");
    }
}
