//! PageTool: drives a page rendered inside the desktop host.

mod capture;
mod handles;
mod history;
mod interact;
mod script;
mod snapshot_tool;
mod support;
mod wait;

use async_trait::async_trait;
use serde_json::{json, Value};

use deskbridge_core::error::{Error, Result};

use crate::{err_envelope, ok_envelope, Tool, ToolContext, ToolSchema};

pub struct PageTool;

const ACTIONS: &[&str] = &[
    "open", "close", "navigate", "snapshot",
    "click", "hover", "fill", "drag", "press_key",
    "evaluate", "storage_get", "storage_set", "cookies",
    "network_list", "network_get", "console_list", "console_get",
    "wait_for", "screenshot",
];

#[async_trait]
impl Tool for PageTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "page",
            description: "Drive a web page rendered inside the connected desktop app. 'open'=open a URL and get a pageTargetId; every other action takes that pageTargetId. 'snapshot'=accessibility tree with numeric element uids; 'click'/'hover'/'fill'/'drag' address elements by uid from the last snapshot; 'press_key'=keyboard input ('Enter', 'Ctrl+A'); 'evaluate'=run JavaScript (with uid: a function called on that element); 'storage_get'/'storage_set'=web storage; 'cookies'=read cookies; 'network_list'/'network_get' and 'console_list'/'console_get'=recorded page activity (no connection needed); 'wait_for'=wait for a CSS selector; 'screenshot'=capture the page. Results are size-bounded; check the 'truncated' flag.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ACTIONS,
                        "description": "What to do. ALWAYS specify explicitly."
                    },
                    "pageTargetId": {
                        "type": "string",
                        "description": "Page handle from a prior 'open' (required for everything except 'open')"
                    },
                    "debugTargetId": {
                        "type": "string",
                        "description": "Debug target id from 'open', when available; mismatches are rejected"
                    },
                    "url": {
                        "type": "string",
                        "description": "URL for 'open'/'navigate'. Bare hosts get https://, localhost gets http://"
                    },
                    "uid": {
                        "type": "integer",
                        "description": "Element uid from the last snapshot (click/hover/fill/drag/evaluate)"
                    },
                    "toUid": {
                        "type": "integer",
                        "description": "Drop target uid for 'drag'"
                    },
                    "text": {
                        "type": "string",
                        "description": "Text for 'fill'"
                    },
                    "key": {
                        "type": "string",
                        "description": "Key spec for 'press_key' (e.g. 'Enter', 'Tab', 'Ctrl+A')"
                    },
                    "expression": {
                        "type": "string",
                        "description": "JavaScript for 'evaluate'. With uid: a function declaration called on the element"
                    },
                    "scope": {
                        "type": "string",
                        "enum": ["local", "session"],
                        "description": "Storage scope (default 'local')"
                    },
                    "storageKey": { "type": "string" },
                    "storageValue": { "type": "string" },
                    "selector": {
                        "type": "string",
                        "description": "CSS selector for 'wait_for'"
                    },
                    "timeoutMs": {
                        "type": "integer",
                        "description": "Wait timeout in ms (default 5000, max 30000)"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Max entries for list actions (default 50, max 200)"
                    },
                    "requestId": {
                        "type": "string",
                        "description": "Request id for 'network_get' (from 'network_list')"
                    },
                    "messageId": {
                        "type": "integer",
                        "description": "Message id for 'console_get' (from 'console_list')"
                    },
                    "compact": {
                        "type": "boolean",
                        "description": "Compact snapshot (skip empty structural nodes, default true)"
                    }
                },
                "required": ["action"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        let action = params
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validation("'action' is required".into()))?;
        if !ACTIONS.contains(&action) {
            return Err(Error::Validation(format!("unknown page action '{}'", action)));
        }
        Ok(())
    }

    /// Expected failures come back inside the `{ok:false, error}` envelope;
    /// nothing throws past the tool boundary.
    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let action = params.get("action").and_then(|v| v.as_str()).unwrap_or("");

        let result = match action {
            "open" => handles::action_open(&ctx, &params).await,
            "close" => handles::action_close(&ctx, &params).await,
            "navigate" => handles::action_navigate(&ctx, &params).await,
            "snapshot" => snapshot_tool::action_snapshot(&ctx, &params).await,
            "click" => interact::action_click(&ctx, &params).await,
            "hover" => interact::action_hover(&ctx, &params).await,
            "fill" => interact::action_fill(&ctx, &params).await,
            "drag" => interact::action_drag(&ctx, &params).await,
            "press_key" => interact::action_press_key(&ctx, &params).await,
            "evaluate" => script::action_evaluate(&ctx, &params).await,
            "storage_get" => script::action_storage_get(&ctx, &params).await,
            "storage_set" => script::action_storage_set(&ctx, &params).await,
            "cookies" => script::action_cookies(&ctx, &params).await,
            "network_list" => history::action_network_list(&ctx, &params).await,
            "network_get" => history::action_network_get(&ctx, &params).await,
            "console_list" => history::action_console_list(&ctx, &params).await,
            "console_get" => history::action_console_get(&ctx, &params).await,
            "wait_for" => wait::action_wait_for(&ctx, &params).await,
            "screenshot" => capture::action_screenshot(&ctx, &params).await,
            other => Err(Error::Validation(format!("unknown page action '{}'", other))),
        };

        Ok(match result {
            Ok(data) => ok_envelope(data),
            Err(e) => err_envelope(&e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolContext;
    use deskbridge_core::Config;
    use deskbridge_hub::{Hub, PageBackend, PageTargetRecord};
    use std::sync::Arc;

    fn ctx() -> ToolContext {
        let hub = Arc::new(Hub::new(Config::default()));
        ToolContext::new(
            hub,
            Config::default(),
            std::env::temp_dir(),
            "tab-1",
            "c1",
        )
    }

    async fn register_foreign_page(ctx: &ToolContext) {
        ctx.hub
            .register_page(PageTargetRecord {
                page_target_id: "p-foreign".into(),
                tab_id: "tab-other".into(),
                url: "https://example.com".into(),
                backend: PageBackend::DesktopView,
                client_id: "c1".into(),
                debug_target_id: Some("T1".into()),
                view_id: Some("v1".into()),
                created_at_ms: 0,
            })
            .await;
    }

    #[test]
    fn schema_lists_every_action() {
        let tool = PageTool;
        let schema = tool.schema();
        assert_eq!(schema.name, "page");
        let listed = schema.parameters["properties"]["action"]["enum"]
            .as_array()
            .unwrap()
            .len();
        assert_eq!(listed, ACTIONS.len());
    }

    #[test]
    fn validate_rejects_unknown_actions() {
        let tool = PageTool;
        assert!(tool.validate(&json!({"action": "open"})).is_ok());
        assert!(tool.validate(&json!({"action": "teleport"})).is_err());
        assert!(tool.validate(&json!({})).is_err());
    }

    #[tokio::test]
    async fn open_without_runtime_fails_with_runtime_offline() {
        let tool = PageTool;
        let envelope = tool
            .execute(ctx(), json!({"action": "open", "url": "example.com"}))
            .await
            .unwrap();
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["error"]["code"], "runtime_offline");
    }

    #[tokio::test]
    async fn open_with_bad_url_is_a_validation_error_before_dispatch() {
        let tool = PageTool;
        let envelope = tool
            .execute(ctx(), json!({"action": "open", "url": "ftp://example.com"}))
            .await
            .unwrap();
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["error"]["code"], "validation");
    }

    #[tokio::test]
    async fn unknown_handle_is_reported_as_such() {
        let tool = PageTool;
        let envelope = tool
            .execute(
                ctx(),
                json!({"action": "snapshot", "pageTargetId": "p-ghost"}),
            )
            .await
            .unwrap();
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["error"]["code"], "unknown_handle");
        assert!(envelope["error"]["message"]
            .as_str()
            .unwrap()
            .contains("open"));
    }

    #[tokio::test]
    async fn foreign_tab_handle_is_an_ownership_error() {
        let tool = PageTool;
        let ctx = ctx();
        register_foreign_page(&ctx).await;
        let envelope = tool
            .execute(
                ctx,
                json!({"action": "click", "pageTargetId": "p-foreign", "uid": 1}),
            )
            .await
            .unwrap();
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["error"]["code"], "ownership_mismatch");
    }

    #[tokio::test]
    async fn history_reads_work_without_any_connection() {
        let tool = PageTool;
        let ctx = ctx();
        ctx.hub
            .register_page(PageTargetRecord {
                page_target_id: "p1".into(),
                tab_id: "tab-1".into(),
                url: "https://example.com".into(),
                backend: PageBackend::DesktopView,
                client_id: "c1".into(),
                debug_target_id: None,
                view_id: None,
                created_at_ms: 0,
            })
            .await;

        let envelope = tool
            .execute(
                ctx,
                json!({"action": "network_list", "pageTargetId": "p1"}),
            )
            .await
            .unwrap();
        assert_eq!(envelope["ok"], true);
        assert_eq!(envelope["data"]["count"], 0);
    }

    #[tokio::test]
    async fn click_with_unknown_uid_asks_for_a_snapshot() {
        let tool = PageTool;
        let ctx = ctx();
        ctx.hub
            .register_page(PageTargetRecord {
                page_target_id: "p1".into(),
                tab_id: "tab-1".into(),
                url: "https://example.com".into(),
                backend: PageBackend::DesktopView,
                client_id: "c1".into(),
                debug_target_id: Some("T1".into()),
                view_id: Some("v1".into()),
                created_at_ms: 0,
            })
            .await;

        let envelope = tool
            .execute(ctx, json!({"action": "click", "pageTargetId": "p1", "uid": 5}))
            .await
            .unwrap();
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["error"]["code"], "validation");
        assert!(envelope["error"]["message"]
            .as_str()
            .unwrap()
            .contains("snapshot"));
    }

    #[tokio::test]
    async fn stored_and_caller_target_id_mismatch_is_hard_error() {
        let tool = PageTool;
        let ctx = ctx();
        ctx.hub
            .register_page(PageTargetRecord {
                page_target_id: "p1".into(),
                tab_id: "tab-1".into(),
                url: "https://example.com".into(),
                backend: PageBackend::DesktopView,
                client_id: "c1".into(),
                debug_target_id: Some("T1".into()),
                view_id: Some("v1".into()),
                created_at_ms: 0,
            })
            .await;

        let envelope = tool
            .execute(
                ctx,
                json!({
                    "action": "snapshot",
                    "pageTargetId": "p1",
                    "debugTargetId": "T2",
                }),
            )
            .await
            .unwrap();
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["error"]["code"], "ownership_mismatch");
    }
}
