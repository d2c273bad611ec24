//! Browser ownership: target management and the per-page event pump.
//!
//! The daemon exclusively owns the browser process. Pages are CDP targets;
//! each registered page gets a dedicated session whose pump task records
//! `Runtime.consoleAPICalled` events into the page's console ring and keeps
//! the harness installed for future documents.

use std::sync::Arc;

use serde_json::Value;

use devbrowser_cdp::{CdpClient, CdpError, CdpEvent, HARNESS_INIT_JS};

use crate::pages::PageHandle;

/// Format one CDP RemoteObject for console text.
fn format_remote_object(obj: &Value) -> String {
    if let Some(value) = obj.get("value") {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    } else if let Some(desc) = obj.get("description").and_then(|v| v.as_str()) {
        desc.to_string()
    } else if let Some(t) = obj.get("type").and_then(|v| v.as_str()) {
        format!("[{t}]")
    } else {
        String::new()
    }
}

/// Extract `(text, url, line, column)` from a `Runtime.consoleAPICalled`.
pub fn console_event_fields(params: &Value) -> (String, String, String, i64, i64) {
    let kind = params
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("log")
        .to_string();

    let text = params
        .get("args")
        .and_then(|v| v.as_array())
        .map(|args| {
            args.iter()
                .map(format_remote_object)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();

    let frame = params
        .get("stackTrace")
        .and_then(|st| st.get("callFrames"))
        .and_then(|cf| cf.as_array())
        .and_then(|cf| cf.first());
    let url = frame
        .and_then(|f| f.get("url"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let line = frame
        .and_then(|f| f.get("lineNumber"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let column = frame
        .and_then(|f| f.get("columnNumber"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    (kind, text, url, line, column)
}

/// List open page targets as `(target_id, url, title)`.
pub async fn list_page_targets(cdp: &CdpClient) -> Result<Vec<(String, String, String)>, CdpError> {
    let result = cdp.send("Target.getTargets", serde_json::json!({})).await?;
    let mut out = Vec::new();
    if let Some(infos) = result.get("targetInfos").and_then(|v| v.as_array()) {
        for info in infos {
            if info.get("type").and_then(|v| v.as_str()) != Some("page") {
                continue;
            }
            let target_id = info
                .get("targetId")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            if target_id.is_empty() {
                continue;
            }
            out.push((
                target_id,
                info.get("url").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                info.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            ));
        }
    }
    Ok(out)
}

/// Create a new blank page target.
pub async fn create_page_target(cdp: &CdpClient) -> Result<String, CdpError> {
    let result = cdp
        .send(
            "Target.createTarget",
            serde_json::json!({ "url": "about:blank" }),
        )
        .await?;
    result
        .get("targetId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| CdpError::Transport {
            detail: "Target.createTarget did not return a targetId".to_string(),
        })
}

/// Close a page target. Missing targets are fine.
pub async fn close_page_target(cdp: &CdpClient, target_id: &str) {
    let _ = cdp
        .send(
            "Target.closeTarget",
            serde_json::json!({ "targetId": target_id }),
        )
        .await;
}

/// Attach the console pump to a page: installs the harness as a
/// document-init script and records console API calls into the ring.
pub async fn attach_page_pump(
    cdp: &CdpClient,
    page: &Arc<PageHandle>,
) -> Result<(), CdpError> {
    let mut session = cdp.attach_page(&page.target_id).await?;
    session.enable_domain("Page").await?;
    session.enable_domain("Runtime").await?;
    session
        .send(
            "Page.addScriptToEvaluateOnNewDocument",
            serde_json::json!({ "source": HARNESS_INIT_JS }),
        )
        .await?;
    // Cover the document that is already open.
    let _ = session
        .send(
            "Runtime.evaluate",
            serde_json::json!({ "expression": HARNESS_INIT_JS, "returnByValue": true }),
        )
        .await;

    let handle = Arc::clone(page);
    let pump = tokio::spawn(async move {
        while let Some(event) = session.recv_event().await {
            handle_pump_event(&handle, &event).await;
        }
        tracing::debug!(page = %handle.name, "console pump ended");
    });
    page.set_pump(pump);
    Ok(())
}

async fn handle_pump_event(page: &Arc<PageHandle>, event: &CdpEvent) {
    if event.method != "Runtime.consoleAPICalled" {
        return;
    }
    let (kind, text, url, line, column) = console_event_fields(&event.params);
    let mut ring = page.console.lock().await;
    ring.push(kind, text, url, line, column);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_object_formatting() {
        assert_eq!(
            format_remote_object(&serde_json::json!({"type": "string", "value": "hi"})),
            "hi"
        );
        assert_eq!(
            format_remote_object(&serde_json::json!({"type": "number", "value": 42})),
            "42"
        );
        assert_eq!(
            format_remote_object(
                &serde_json::json!({"type": "object", "description": "Object"})
            ),
            "Object"
        );
        assert_eq!(
            format_remote_object(&serde_json::json!({"type": "undefined"})),
            "[undefined]"
        );
    }

    #[test]
    fn console_fields_from_event() {
        let params = serde_json::json!({
            "type": "error",
            "args": [
                {"type": "string", "value": "boom"},
                {"type": "number", "value": 7},
            ],
            "stackTrace": {
                "callFrames": [
                    {"url": "https://app.local/main.js", "lineNumber": 12, "columnNumber": 3},
                ],
            },
        });
        let (kind, text, url, line, column) = console_event_fields(&params);
        assert_eq!(kind, "error");
        assert_eq!(text, "boom 7");
        assert_eq!(url, "https://app.local/main.js");
        assert_eq!(line, 12);
        assert_eq!(column, 3);
    }

    #[test]
    fn console_fields_tolerate_missing_pieces() {
        let (kind, text, url, line, column) =
            console_event_fields(&serde_json::json!({}));
        assert_eq!(kind, "log");
        assert_eq!(text, "");
        assert_eq!(url, "");
        assert_eq!(line, 0);
        assert_eq!(column, 0);
    }
}
