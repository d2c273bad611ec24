//! Per-call network monitor.
//!
//! Attaches Network-domain listeners to one page session, buffers entries
//! keyed by CDP request id while the wait strategy runs, then drains, filters,
//! clamps, and sorts them. Listeners are scoped to the call: the domain is
//! disabled again on the way out regardless of success.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde_json::Value;

use devbrowser_cdp::{CdpError, CdpEvent, PageDriver, WaitState, WaitStrategy};
use devbrowser_types::truncate::{clamp_body, clamp_bytes};
use devbrowser_types::{looks_binary, sort_network_entries, NetworkEntry};

#[derive(Debug, Clone)]
pub struct NetworkMonitorOptions {
    pub wait_strategy: WaitStrategy,
    pub wait_state: WaitState,
    pub timeout_ms: u64,
    pub min_wait_ms: u64,

    pub max_entries: usize,
    pub include_bodies: bool,
    pub max_body_bytes: usize,
    pub include_headers: bool,

    pub url_contains: String,
    pub method_equals: String,
    pub type_equals: String,
    pub status_equals: i64,
    pub status_min: i64,
    pub status_max: i64,
    pub only_failed: bool,
}

impl Default for NetworkMonitorOptions {
    fn default() -> Self {
        Self {
            wait_strategy: WaitStrategy::Native,
            wait_state: WaitState::NetworkIdle,
            timeout_ms: 45_000,
            min_wait_ms: 0,
            max_entries: 200,
            include_bodies: false,
            max_body_bytes: 64 * 1024,
            include_headers: false,
            url_contains: String::new(),
            method_equals: String::new(),
            type_equals: String::new(),
            status_equals: 0,
            status_min: 0,
            status_max: 0,
            only_failed: false,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct NetworkSummary {
    pub entries: Vec<NetworkEntry>,
    pub total: usize,
    pub matched: usize,
    pub truncated: bool,
    pub failed_only: bool,
}

struct Capture {
    entries: HashMap<String, NetworkEntry>,
    order: Vec<String>,
    truncated: bool,
    max_entries: usize,
    include_headers: bool,
    start: Instant,
}

impl Capture {
    fn elapsed_ms(&self) -> i64 {
        self.start.elapsed().as_millis() as i64
    }

    fn handle(&mut self, event: &CdpEvent) {
        match event.method.as_str() {
            "Network.requestWillBeSent" => {
                let Some(request_id) = event.params.get("requestId").and_then(|v| v.as_str())
                else {
                    return;
                };
                if self.order.len() >= self.max_entries {
                    self.truncated = true;
                    return;
                }
                let request = event.params.get("request").cloned().unwrap_or(Value::Null);
                let mut entry = NetworkEntry {
                    url: str_of(&request, "url"),
                    method: str_of(&request, "method"),
                    resource_type: event
                        .params
                        .get("type")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_lowercase(),
                    started_ms: self.elapsed_ms(),
                    ..Default::default()
                };
                if self.include_headers {
                    entry.request_headers = headers_of(&request, "headers");
                }
                if let Some(post) = request.get("postData").and_then(|v| v.as_str()) {
                    if !post.trim().is_empty() {
                        entry.request_body = post.to_string();
                    }
                }
                self.entries.insert(request_id.to_string(), entry);
                self.order.push(request_id.to_string());
            }
            "Network.responseReceived" => {
                let response = event.params.get("response").cloned().unwrap_or(Value::Null);
                let include_headers = self.include_headers;
                let Some(entry) = self.entry_mut(&event.params) else {
                    return;
                };
                entry.status = response.get("status").and_then(|v| v.as_i64()).unwrap_or(0);
                entry.compute_ok();
                if include_headers {
                    entry.response_headers = headers_of(&response, "headers");
                }
            }
            "Network.loadingFinished" => {
                let finished = self.elapsed_ms();
                if let Some(entry) = self.entry_mut(&event.params) {
                    entry.finished_ms = finished;
                }
            }
            "Network.loadingFailed" => {
                let finished = self.elapsed_ms();
                let error = event
                    .params
                    .get("errorText")
                    .and_then(|v| v.as_str())
                    .unwrap_or("request failed")
                    .to_string();
                if let Some(entry) = self.entry_mut(&event.params) {
                    entry.finished_ms = finished;
                    entry.error = error;
                    entry.compute_ok();
                }
            }
            _ => {}
        }
    }

    fn entry_mut(&mut self, params: &Value) -> Option<&mut NetworkEntry> {
        let request_id = params.get("requestId")?.as_str()?;
        self.entries.get_mut(request_id)
    }
}

fn str_of(v: &Value, key: &str) -> String {
    v.get(key).and_then(|x| x.as_str()).unwrap_or("").to_string()
}

fn headers_of(v: &Value, key: &str) -> Option<std::collections::BTreeMap<String, String>> {
    let obj = v.get(key)?.as_object()?;
    Some(
        obj.iter()
            .map(|(k, val)| (k.clone(), val.as_str().unwrap_or("").to_string()))
            .collect(),
    )
}

fn matches(entry: &NetworkEntry, opts: &NetworkMonitorOptions) -> bool {
    if opts.only_failed && entry.ok {
        return false;
    }
    if !opts.url_contains.trim().is_empty() && !entry.url.contains(opts.url_contains.trim()) {
        return false;
    }
    if !opts.method_equals.trim().is_empty()
        && !entry.method.eq_ignore_ascii_case(opts.method_equals.trim())
    {
        return false;
    }
    if !opts.type_equals.trim().is_empty()
        && !entry.resource_type.eq_ignore_ascii_case(opts.type_equals.trim())
    {
        return false;
    }
    if opts.status_equals != 0 && entry.status != opts.status_equals {
        return false;
    }
    if opts.status_min != 0 && entry.status < opts.status_min {
        return false;
    }
    if opts.status_max != 0 && entry.status > opts.status_max {
        return false;
    }
    true
}

/// Clamp a response body, switching to base64 when it looks binary.
pub fn encode_response_body(body: &[u8], max: usize) -> (String, String, bool) {
    if looks_binary(body) {
        let truncated = body.len() > max;
        (
            B64.encode(clamp_bytes(body, max)),
            "base64".to_string(),
            truncated,
        )
    } else {
        let text = String::from_utf8_lossy(body);
        let (clamped, truncated, encoding) = clamp_body(&text, max);
        (clamped, encoding.to_string(), truncated)
    }
}

/// Buffer network traffic on the page while waiting for the requested state,
/// then return the filtered, clamped, sorted entries.
pub async fn collect_network(
    driver: &mut PageDriver,
    opts: NetworkMonitorOptions,
) -> Result<NetworkSummary, CdpError> {
    driver.session().enable_domain("Network").await?;

    let mut capture = Capture {
        entries: HashMap::new(),
        order: Vec::new(),
        truncated: false,
        max_entries: opts.max_entries.max(1),
        include_headers: opts.include_headers,
        start: Instant::now(),
    };

    let deadline =
        capture.start + Duration::from_millis(opts.timeout_ms.max(opts.min_wait_ms).max(1));
    let min_wait_until = capture.start + Duration::from_millis(opts.min_wait_ms);
    let slice = Duration::from_millis(50);
    let mut satisfied = false;

    loop {
        let now = Instant::now();
        if now >= deadline || (satisfied && now >= min_wait_until) {
            break;
        }

        match tokio::time::timeout(slice, driver.session_mut().recv_event()).await {
            Ok(Some(event)) => {
                if event.method.starts_with("Network.") {
                    capture.handle(&event);
                } else if opts.wait_strategy == WaitStrategy::Native
                    && event.method == "Page.lifecycleEvent"
                    && event.params.get("name").and_then(|n| n.as_str())
                        == Some(opts.wait_state.lifecycle_name())
                {
                    satisfied = true;
                }
            }
            Ok(None) => {
                return Err(CdpError::Transport {
                    detail: "WebSocket closed during network capture".to_string(),
                });
            }
            Err(_) => {
                // Poll tick: readyState + pending resources cover the case
                // where the target state was reached before we subscribed.
                if !satisfied {
                    let (ready, pending) = driver.load_state().await;
                    satisfied = opts.wait_state.ready_state_satisfies(&ready)
                        && (opts.wait_state != WaitState::NetworkIdle || pending == 0);
                }
            }
        }
    }

    // Bodies are only fetchable after loadingFinished; best-effort per entry.
    if opts.include_bodies {
        for request_id in capture.order.clone() {
            let wants_body = capture
                .entries
                .get(&request_id)
                .map(|e| e.finished_ms > 0 && e.error.is_empty())
                .unwrap_or(false);
            if !wants_body {
                continue;
            }
            let result = driver
                .session()
                .send(
                    "Network.getResponseBody",
                    serde_json::json!({ "requestId": request_id }),
                )
                .await;
            let Ok(result) = result else { continue };
            let Some(body) = result.get("body").and_then(|v| v.as_str()) else {
                continue;
            };
            let raw = if result.get("base64Encoded").and_then(|v| v.as_bool()) == Some(true) {
                B64.decode(body).unwrap_or_default()
            } else {
                body.as_bytes().to_vec()
            };
            if raw.is_empty() {
                continue;
            }
            if let Some(entry) = capture.entries.get_mut(&request_id) {
                let (encoded, encoding, truncated) =
                    encode_response_body(&raw, opts.max_body_bytes);
                entry.response_body = encoded;
                entry.body_encoding = encoding;
                entry.truncated = entry.truncated || truncated;
            }
        }
    }

    let _ = driver
        .session()
        .send("Network.disable", serde_json::json!({}))
        .await;

    let total = capture.order.len();
    let mut out = Vec::new();
    for request_id in &capture.order {
        let Some(entry) = capture.entries.get(request_id) else {
            continue;
        };
        let mut entry = entry.clone();
        if !entry.request_body.is_empty() {
            let (clamped, truncated, encoding) =
                clamp_body(&entry.request_body, opts.max_body_bytes);
            entry.request_body = clamped;
            entry.truncated = entry.truncated || truncated;
            if entry.body_encoding.is_empty() {
                entry.body_encoding = encoding.to_string();
            }
        }
        if !opts.include_bodies {
            entry.request_body = String::new();
            entry.response_body = String::new();
        }
        if matches(&entry, &opts) {
            out.push(entry);
        }
    }

    sort_network_entries(&mut out);

    Ok(NetworkSummary {
        matched: out.len(),
        entries: out,
        total,
        truncated: capture.truncated,
        failed_only: opts.only_failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: i64, ok: bool) -> NetworkEntry {
        NetworkEntry {
            url: "https://app.local/api".into(),
            method: "GET".into(),
            resource_type: "xhr".into(),
            status,
            ok,
            ..Default::default()
        }
    }

    #[test]
    fn filters_apply() {
        let opts = NetworkMonitorOptions {
            only_failed: true,
            ..Default::default()
        };
        assert!(!matches(&entry(200, true), &opts));
        assert!(matches(&entry(500, false), &opts));

        let opts = NetworkMonitorOptions {
            status_min: 400,
            ..Default::default()
        };
        assert!(!matches(&entry(200, true), &opts));
        assert!(matches(&entry(404, false), &opts));

        let opts = NetworkMonitorOptions {
            url_contains: "api".into(),
            method_equals: "get".into(),
            type_equals: "XHR".into(),
            ..Default::default()
        };
        assert!(matches(&entry(200, true), &opts));
    }

    #[test]
    fn binary_bodies_become_base64() {
        let (body, encoding, truncated) = encode_response_body(&[0u8, 1, 2, 3], 1024);
        assert_eq!(encoding, "base64");
        assert!(!truncated);
        assert_eq!(B64.decode(body).unwrap(), vec![0u8, 1, 2, 3]);
    }

    #[test]
    fn text_bodies_stay_utf8_and_clamp() {
        let (body, encoding, truncated) = encode_response_body(b"hello world", 5);
        assert_eq!(encoding, "utf8");
        assert!(truncated);
        assert_eq!(body, "hello");
    }

    #[test]
    fn capture_orders_and_bounds_entries() {
        let mut capture = Capture {
            entries: HashMap::new(),
            order: Vec::new(),
            truncated: false,
            max_entries: 2,
            include_headers: false,
            start: Instant::now(),
        };
        for i in 0..3 {
            capture.handle(&CdpEvent {
                method: "Network.requestWillBeSent".into(),
                params: serde_json::json!({
                    "requestId": format!("r{i}"),
                    "request": { "url": format!("https://x/{i}"), "method": "GET" },
                    "type": "Fetch",
                }),
                session_id: None,
            });
        }
        assert_eq!(capture.order.len(), 2);
        assert!(capture.truncated);
        assert_eq!(capture.entries["r0"].resource_type, "fetch");
    }

    #[test]
    fn response_and_failure_update_entries() {
        let mut capture = Capture {
            entries: HashMap::new(),
            order: Vec::new(),
            truncated: false,
            max_entries: 10,
            include_headers: false,
            start: Instant::now(),
        };
        capture.handle(&CdpEvent {
            method: "Network.requestWillBeSent".into(),
            params: serde_json::json!({
                "requestId": "r1",
                "request": { "url": "https://x/a", "method": "GET" },
            }),
            session_id: None,
        });
        capture.handle(&CdpEvent {
            method: "Network.responseReceived".into(),
            params: serde_json::json!({
                "requestId": "r1",
                "response": { "status": 503 },
            }),
            session_id: None,
        });
        assert_eq!(capture.entries["r1"].status, 503);
        assert!(!capture.entries["r1"].ok);

        capture.handle(&CdpEvent {
            method: "Network.loadingFailed".into(),
            params: serde_json::json!({ "requestId": "r1", "errorText": "net::ERR_FAILED" }),
            session_id: None,
        });
        assert_eq!(capture.entries["r1"].error, "net::ERR_FAILED");
    }
}
