//! Event collectors: network and console activity observed during an
//! automation session, written into the bounded record stores.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use deskbridge_core::error::Result;
use deskbridge_core::records::{NetworkRecord, RecordStores};

use crate::client::CdpClient;

pub type SharedRecords = Arc<Mutex<RecordStores>>;

/// Enable the collector domains and start the collector tasks. The enables
/// are idempotent so two concurrent sessions on the same page tolerate each
/// other. Returned handles must be aborted on session teardown.
pub async fn install_collectors(
    client: &Arc<CdpClient>,
    page_target_id: &str,
    records: SharedRecords,
) -> Result<Vec<JoinHandle<()>>> {
    client.enable_domain("Network").await?;
    client.enable_domain("Runtime").await?;

    let mut handles = Vec::with_capacity(6);

    // Network.requestWillBeSent -> new record
    {
        let mut rx = client.subscribe_event("Network.requestWillBeSent").await;
        let records = records.clone();
        let page = page_target_id.to_string();
        handles.push(tokio::spawn(async move {
            while let Some(params) = rx.recv().await {
                let Some(request_id) = str_field(&params, "requestId") else {
                    continue;
                };
                let request = params.get("request");
                let record = NetworkRecord {
                    request_id,
                    url: request
                        .and_then(|r| r.get("url"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    method: request
                        .and_then(|r| r.get("method"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("GET")
                        .to_string(),
                    resource_type: str_field(&params, "type"),
                    status: None,
                    mime_type: None,
                    finished: false,
                    failed: false,
                    error_text: None,
                    encoded_bytes: 0,
                    at_ms: chrono::Utc::now().timestamp_millis(),
                };
                records.lock().await.push_network(&page, record);
            }
        }));
    }

    // Network.responseReceived -> status/mime
    {
        let mut rx = client.subscribe_event("Network.responseReceived").await;
        let records = records.clone();
        let page = page_target_id.to_string();
        handles.push(tokio::spawn(async move {
            while let Some(params) = rx.recv().await {
                let Some(request_id) = str_field(&params, "requestId") else {
                    continue;
                };
                let status = params
                    .get("response")
                    .and_then(|r| r.get("status"))
                    .and_then(|v| v.as_u64())
                    .map(|s| s as u16);
                let mime = params
                    .get("response")
                    .and_then(|r| r.get("mimeType"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                records.lock().await.update_network(&page, &request_id, |r| {
                    r.status = status;
                    r.mime_type = mime.clone();
                });
            }
        }));
    }

    // Network.loadingFinished -> completion + byte count
    {
        let mut rx = client.subscribe_event("Network.loadingFinished").await;
        let records = records.clone();
        let page = page_target_id.to_string();
        handles.push(tokio::spawn(async move {
            while let Some(params) = rx.recv().await {
                let Some(request_id) = str_field(&params, "requestId") else {
                    continue;
                };
                let bytes = params
                    .get("encodedDataLength")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0) as u64;
                records.lock().await.update_network(&page, &request_id, |r| {
                    r.finished = true;
                    r.encoded_bytes = bytes;
                });
            }
        }));
    }

    // Network.loadingFailed -> failure detail
    {
        let mut rx = client.subscribe_event("Network.loadingFailed").await;
        let records = records.clone();
        let page = page_target_id.to_string();
        handles.push(tokio::spawn(async move {
            while let Some(params) = rx.recv().await {
                let Some(request_id) = str_field(&params, "requestId") else {
                    continue;
                };
                let error_text = str_field(&params, "errorText");
                records.lock().await.update_network(&page, &request_id, |r| {
                    r.failed = true;
                    r.error_text = error_text.clone();
                });
            }
        }));
    }

    // Runtime.consoleAPICalled -> console record
    {
        let mut rx = client.subscribe_event("Runtime.consoleAPICalled").await;
        let records = records.clone();
        let page = page_target_id.to_string();
        handles.push(tokio::spawn(async move {
            while let Some(params) = rx.recv().await {
                let level = str_field(&params, "type").unwrap_or_else(|| "log".into());
                let text = console_args_preview(&params);
                let (source_url, line) = call_frame_origin(&params);
                records.lock().await.push_console(
                    &page,
                    level,
                    text,
                    source_url,
                    line,
                    chrono::Utc::now().timestamp_millis(),
                );
            }
        }));
    }

    // Runtime.exceptionThrown -> console record at error level
    {
        let mut rx = client.subscribe_event("Runtime.exceptionThrown").await;
        let records = records.clone();
        let page = page_target_id.to_string();
        handles.push(tokio::spawn(async move {
            while let Some(params) = rx.recv().await {
                let details = params.get("exceptionDetails");
                let text = details
                    .and_then(|d| d.get("exception"))
                    .and_then(|e| e.get("description"))
                    .and_then(|v| v.as_str())
                    .or_else(|| {
                        details
                            .and_then(|d| d.get("text"))
                            .and_then(|v| v.as_str())
                    })
                    .unwrap_or("uncaught exception")
                    .to_string();
                let source_url = details
                    .and_then(|d| d.get("url"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                let line = details
                    .and_then(|d| d.get("lineNumber"))
                    .and_then(|v| v.as_u64())
                    .map(|l| l as u32);
                records.lock().await.push_console(
                    &page,
                    "error".into(),
                    text,
                    source_url,
                    line,
                    chrono::Utc::now().timestamp_millis(),
                );
            }
        }));
    }

    Ok(handles)
}

fn str_field(params: &Value, field: &str) -> Option<String> {
    params.get(field).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Compact preview of console call arguments.
pub fn console_args_preview(params: &Value) -> String {
    let Some(args) = params.get("args").and_then(|v| v.as_array()) else {
        return String::new();
    };
    let parts: Vec<String> = args.iter().map(remote_object_preview).collect();
    parts.join(" ")
}

fn remote_object_preview(obj: &Value) -> String {
    if let Some(value) = obj.get("value") {
        return match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    }
    if let Some(desc) = obj.get("description").and_then(|v| v.as_str()) {
        return desc.to_string();
    }
    obj.get("type")
        .and_then(|v| v.as_str())
        .map(|t| format!("[{}]", t))
        .unwrap_or_default()
}

fn call_frame_origin(params: &Value) -> (Option<String>, Option<u32>) {
    let frame = params
        .get("stackTrace")
        .and_then(|st| st.get("callFrames"))
        .and_then(|cf| cf.as_array())
        .and_then(|frames| frames.first());
    match frame {
        Some(frame) => (
            frame
                .get("url")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            frame
                .get("lineNumber")
                .and_then(|v| v.as_u64())
                .map(|l| l as u32),
        ),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn console_preview_joins_mixed_args() {
        let params = json!({
            "type": "log",
            "args": [
                {"type": "string", "value": "count:"},
                {"type": "number", "value": 3},
                {"type": "object", "description": "HTMLDivElement"},
                {"type": "function"},
            ],
        });
        assert_eq!(console_args_preview(&params), "count: 3 HTMLDivElement [function]");
    }

    #[test]
    fn call_frame_origin_reads_top_frame() {
        let params = json!({
            "stackTrace": {
                "callFrames": [
                    {"url": "https://example.com/app.js", "lineNumber": 41},
                    {"url": "https://example.com/vendor.js", "lineNumber": 9},
                ],
            },
        });
        let (url, line) = call_frame_origin(&params);
        assert_eq!(url.as_deref(), Some("https://example.com/app.js"));
        assert_eq!(line, Some(41));
    }

    #[test]
    fn call_frame_origin_tolerates_missing_stack() {
        let (url, line) = call_frame_origin(&json!({}));
        assert!(url.is_none());
        assert!(line.is_none());
    }
}
