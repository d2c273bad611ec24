//! High-level page driver wrapping a CDP session.
//!
//! Provides navigation, JavaScript evaluation with exception surfacing,
//! wait strategies, screenshots, and input dispatch. All methods carry
//! explicit deadlines; a missing timeout is a programming error, so every
//! public entry point takes or derives one.

use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde_json::Value;

use crate::client::CdpSession;
use crate::error::CdpError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Page readiness levels a wait can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Commit,
    DomContentLoaded,
    Load,
    NetworkIdle,
}

impl WaitState {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "commit" => Some(Self::Commit),
            "domcontentloaded" => Some(Self::DomContentLoaded),
            "load" => Some(Self::Load),
            "networkidle" => Some(Self::NetworkIdle),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::DomContentLoaded => "domcontentloaded",
            Self::Load => "load",
            Self::NetworkIdle => "networkidle",
        }
    }

    /// The CDP lifecycle event name satisfying this state.
    pub fn lifecycle_name(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::DomContentLoaded => "DOMContentLoaded",
            Self::Load => "load",
            Self::NetworkIdle => "networkIdle",
        }
    }

    /// Whether a `document.readyState` value satisfies this state.
    pub fn ready_state_satisfies(&self, ready: &str) -> bool {
        let rs = ready.to_lowercase();
        match self {
            Self::Commit | Self::DomContentLoaded => rs == "interactive" || rs == "complete",
            Self::Load | Self::NetworkIdle => rs == "complete",
        }
    }
}

/// Which waiter implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// CDP lifecycle events (`Page.lifecycleEvent`).
    Native,
    /// Poll `document.readyState` and pending resource-timing entries.
    Perf,
}

impl WaitStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "native" | "lifecycle" => Some(Self::Native),
            "perf" => Some(Self::Perf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Perf => "perf",
        }
    }
}

/// Outcome of a wait operation. A timeout is reported in-band, not as an
/// error: callers decide whether a timed-out wait is fatal.
#[derive(Debug, Clone)]
pub struct WaitResult {
    pub ok: bool,
    pub timed_out: bool,
    pub strategy: WaitStrategy,
    pub state: WaitState,
    pub waited_ms: i64,
    pub ready_state: String,
    pub pending_requests: i64,
}

/// Clip rectangle for screenshots, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

// ---------------------------------------------------------------------------
// In-page probe scripts
// ---------------------------------------------------------------------------

/// Reports readyState plus the number of still-loading critical resources.
/// Trackers, data URIs, stale entries, and slow images/fonts are excluded so
/// an ad blocker or analytics sinkhole cannot wedge the wait.
const LOAD_STATE_JS: &str = r#"(() => {
  const doc = globalThis.document;
  const perf = globalThis.performance;
  const readyState = doc && typeof doc.readyState === "string" ? doc.readyState : "unknown";
  if (!perf || typeof perf.getEntriesByType !== "function" || typeof perf.now !== "function") {
    return { readyState, pendingRequests: 0 };
  }

  const now = perf.now();
  const resources = perf.getEntriesByType("resource") || [];

  const adPatterns = [
    "doubleclick.net",
    "googlesyndication.com",
    "googletagmanager.com",
    "google-analytics.com",
    "facebook.net",
    "connect.facebook.net",
    "analytics",
    "ads",
    "tracking",
    "pixel",
    "hotjar.com",
    "clarity.ms",
    "mixpanel.com",
    "segment.com",
    "newrelic.com",
    "nr-data.net",
    "/tracker/",
    "/collector/",
    "/beacon/",
    "/telemetry/",
    "/log/",
    "/events/",
    "/track.",
    "/metrics/",
  ];

  const nonCriticalTypes = ["img", "image", "icon", "font"];

  let pending = 0;
  for (const entry of resources) {
    if (!entry || entry.responseEnd !== 0) continue;
    const url = String(entry.name || "");

    if (!url || url.startsWith("data:") || url.length > 500) continue;
    if (adPatterns.some((p) => url.includes(p))) continue;

    const loadingDuration = now - (entry.startTime || 0);
    if (loadingDuration > 10000) continue;

    const resourceType = String(entry.initiatorType || "unknown");
    if (nonCriticalTypes.includes(resourceType) && loadingDuration > 3000) continue;

    const isImageUrl = /\.(jpg|jpeg|png|gif|webp|svg|ico)(\?|$)/i.test(url);
    if (isImageUrl && loadingDuration > 3000) continue;

    pending++;
  }
  return { readyState, pendingRequests: pending };
})()"#;

// ---------------------------------------------------------------------------
// PageDriver
// ---------------------------------------------------------------------------

/// High-level driver over one attached page session.
pub struct PageDriver {
    session: CdpSession,
}

impl PageDriver {
    /// Wrap an attached session, enabling the Page and Runtime domains and
    /// lifecycle event reporting.
    pub async fn new(session: CdpSession) -> Result<Self, CdpError> {
        session.enable_domain("Page").await?;
        session.enable_domain("Runtime").await?;
        session
            .send(
                "Page.setLifecycleEventsEnabled",
                serde_json::json!({ "enabled": true }),
            )
            .await?;
        Ok(Self { session })
    }

    pub fn session(&self) -> &CdpSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut CdpSession {
        &mut self.session
    }

    pub fn target_id(&self) -> &str {
        self.session.target_id()
    }

    /// Detach from the target, removing any listeners this driver installed.
    pub async fn detach(self) -> Result<(), CdpError> {
        self.session.detach().await
    }

    // -----------------------------------------------------------------------
    // Navigation & waiting
    // -----------------------------------------------------------------------

    /// Navigate and wait for the requested state within `timeout`.
    pub async fn navigate(
        &mut self,
        url: &str,
        wait_until: WaitState,
        timeout: Duration,
    ) -> Result<(), CdpError> {
        let result = self
            .session
            .send_with_timeout(
                "Page.navigate",
                serde_json::json!({ "url": url }),
                timeout,
            )
            .await?;

        if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(CdpError::NavigationFailed {
                reason: error_text.to_string(),
            });
        }

        let wait = self
            .wait_for_state(WaitStrategy::Native, wait_until, timeout, Duration::ZERO)
            .await?;
        if wait.timed_out {
            return Err(CdpError::WaitTimeout {
                state: wait_until.as_str().to_string(),
                duration: timeout,
            });
        }
        Ok(())
    }

    /// Wait for a readiness state with the chosen strategy, honoring
    /// `min_wait` as a lower bound. Timeouts are reported in the result.
    pub async fn wait_for_state(
        &mut self,
        strategy: WaitStrategy,
        state: WaitState,
        timeout: Duration,
        min_wait: Duration,
    ) -> Result<WaitResult, CdpError> {
        let start = Instant::now();
        if !min_wait.is_zero() {
            tokio::time::sleep(min_wait).await;
        }
        let deadline = start + timeout.max(min_wait);

        let mut result = match strategy {
            WaitStrategy::Native => self.wait_native(state, deadline).await?,
            WaitStrategy::Perf => self.wait_perf(state, deadline).await?,
        };
        result.waited_ms = (start.elapsed().as_millis() as i64).max(min_wait.as_millis() as i64);
        Ok(result)
    }

    /// Best-effort readyState plus pending critical-resource count.
    pub async fn load_state(&self) -> (String, i64) {
        match self.evaluate(LOAD_STATE_JS).await {
            Ok(v) => (
                v.get("readyState")
                    .and_then(|s| s.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                v.get("pendingRequests").and_then(|n| n.as_i64()).unwrap_or(0),
            ),
            Err(_) => ("unknown".to_string(), 0),
        }
    }

    async fn wait_native(
        &mut self,
        state: WaitState,
        deadline: Instant,
    ) -> Result<WaitResult, CdpError> {
        // The lifecycle event may already have fired before we started
        // listening, so first check the current document state directly.
        let (ready, pending) = self.load_state().await;
        let already = state.ready_state_satisfies(&ready)
            && (state != WaitState::NetworkIdle || pending == 0);
        if already {
            return Ok(WaitResult {
                ok: true,
                timed_out: false,
                strategy: WaitStrategy::Native,
                state,
                waited_ms: 0,
                ready_state: ready,
                pending_requests: pending,
            });
        }

        let wanted = state.lifecycle_name();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let (ready, pending) = self.load_state().await;
                return Ok(WaitResult {
                    ok: false,
                    timed_out: true,
                    strategy: WaitStrategy::Native,
                    state,
                    waited_ms: 0,
                    ready_state: ready,
                    pending_requests: pending,
                });
            }

            match tokio::time::timeout(remaining, self.session.recv_event()).await {
                Ok(Some(event)) => {
                    if event.method == "Page.lifecycleEvent"
                        && event.params.get("name").and_then(|n| n.as_str()) == Some(wanted)
                    {
                        let (ready, pending) = self.load_state().await;
                        return Ok(WaitResult {
                            ok: true,
                            timed_out: false,
                            strategy: WaitStrategy::Native,
                            state,
                            waited_ms: 0,
                            ready_state: ready,
                            pending_requests: pending,
                        });
                    }
                }
                Ok(None) => {
                    return Err(CdpError::Transport {
                        detail: "WebSocket closed while waiting for page state".to_string(),
                    });
                }
                Err(_) => {
                    // fall through to the deadline check above
                }
            }
        }
    }

    async fn wait_perf(
        &mut self,
        state: WaitState,
        deadline: Instant,
    ) -> Result<WaitResult, CdpError> {
        let poll = Duration::from_millis(50);
        let mut last_ready = String::from("unknown");
        let mut last_pending = 0i64;

        loop {
            let (ready, pending) = self.load_state().await;
            last_ready = ready;
            last_pending = pending;

            if state.ready_state_satisfies(&last_ready) && last_pending == 0 {
                return Ok(WaitResult {
                    ok: true,
                    timed_out: false,
                    strategy: WaitStrategy::Perf,
                    state,
                    waited_ms: 0,
                    ready_state: last_ready,
                    pending_requests: last_pending,
                });
            }
            if Instant::now() + poll >= deadline {
                return Ok(WaitResult {
                    ok: false,
                    timed_out: true,
                    strategy: WaitStrategy::Perf,
                    state,
                    waited_ms: 0,
                    ready_state: last_ready,
                    pending_requests: last_pending,
                });
            }
            tokio::time::sleep(poll).await;
        }
    }

    // -----------------------------------------------------------------------
    // JavaScript evaluation
    // -----------------------------------------------------------------------

    /// Evaluate an expression in the page, returning its value by JSON.
    /// Promises are awaited; exceptions surface as [`CdpError::JsException`].
    pub async fn evaluate(&self, expression: &str) -> Result<Value, CdpError> {
        let result = self
            .session
            .send(
                "Runtime.evaluate",
                serde_json::json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let message = exception
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|d| d.as_str())
                .or_else(|| exception.get("text").and_then(|t| t.as_str()))
                .unwrap_or("unknown exception")
                .to_string();
            return Err(CdpError::JsException { message });
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Call a JS function expression with one JSON argument.
    pub async fn call_function(&self, fn_src: &str, arg: &Value) -> Result<Value, CdpError> {
        let expression = format!("({fn_src})({arg})");
        self.evaluate(&expression).await
    }

    // -----------------------------------------------------------------------
    // Page content
    // -----------------------------------------------------------------------

    pub async fn current_url(&self) -> Result<String, CdpError> {
        let v = self.evaluate("window.location.href").await?;
        Ok(v.as_str().unwrap_or("").to_string())
    }

    pub async fn title(&self) -> Result<String, CdpError> {
        let v = self.evaluate("document.title").await?;
        Ok(v.as_str().unwrap_or("").to_string())
    }

    pub async fn html(&self) -> Result<String, CdpError> {
        let v = self.evaluate("document.documentElement.outerHTML").await?;
        v.as_str().map(str::to_string).ok_or(CdpError::Transport {
            detail: "outerHTML evaluation did not return a string".to_string(),
        })
    }

    /// CSS layout viewport size.
    pub async fn viewport(&self) -> Result<(f64, f64), CdpError> {
        let result = self
            .session
            .send("Page.getLayoutMetrics", serde_json::json!({}))
            .await?;
        let vp = result
            .get("cssLayoutViewport")
            .or_else(|| result.get("layoutViewport"))
            .ok_or_else(|| CdpError::Transport {
                detail: "Page.getLayoutMetrics did not return a viewport".to_string(),
            })?;
        let w = vp.get("clientWidth").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let h = vp.get("clientHeight").and_then(|v| v.as_f64()).unwrap_or(0.0);
        Ok((w, h))
    }

    // -----------------------------------------------------------------------
    // Screenshots
    // -----------------------------------------------------------------------

    /// Capture a PNG screenshot: the full page, or a clip when given.
    pub async fn screenshot(
        &self,
        full_page: bool,
        clip: Option<ClipRect>,
    ) -> Result<Vec<u8>, CdpError> {
        let mut params = serde_json::json!({ "format": "png" });
        match clip {
            Some(c) => {
                params["clip"] = serde_json::json!({
                    "x": c.x, "y": c.y, "width": c.width, "height": c.height, "scale": 1.0,
                });
            }
            None if full_page => {
                params["captureBeyondViewport"] = Value::Bool(true);
            }
            None => {}
        }

        let result = self
            .session
            .send_with_timeout("Page.captureScreenshot", params, Duration::from_secs(60))
            .await?;

        let data_b64 = result
            .get("data")
            .and_then(|d| d.as_str())
            .ok_or_else(|| CdpError::Transport {
                detail: "Page.captureScreenshot did not return 'data'".to_string(),
            })?;

        B64.decode(data_b64).map_err(|e| CdpError::Transport {
            detail: format!("failed to decode screenshot base64: {e}"),
        })
    }

    // -----------------------------------------------------------------------
    // Input
    // -----------------------------------------------------------------------

    /// Dispatch a left-button click at page coordinates.
    pub async fn click_at(&self, x: f64, y: f64) -> Result<(), CdpError> {
        for event_type in ["mousePressed", "mouseReleased"] {
            self.session
                .send(
                    "Input.dispatchMouseEvent",
                    serde_json::json!({
                        "type": event_type,
                        "x": x,
                        "y": y,
                        "button": "left",
                        "clickCount": 1,
                    }),
                )
                .await?;
        }
        Ok(())
    }

    /// Insert text into the focused element.
    pub async fn insert_text(&self, text: &str) -> Result<(), CdpError> {
        self.session
            .send(
                "Input.insertText",
                serde_json::json!({ "text": text }),
            )
            .await?;
        Ok(())
    }

    /// Press a named key (e.g. "Enter", "Tab", "a").
    pub async fn press_key(&self, key: &str) -> Result<(), CdpError> {
        let text = if key.chars().count() == 1 { key } else { "" };
        for event_type in ["keyDown", "keyUp"] {
            let mut params = serde_json::json!({ "type": event_type, "key": key });
            if !text.is_empty() && event_type == "keyDown" {
                params["type"] = Value::String("keyDown".into());
                params["text"] = Value::String(text.to_string());
                params["unmodifiedText"] = Value::String(text.to_string());
            }
            self.session
                .send("Input.dispatchKeyEvent", params)
                .await?;
        }
        Ok(())
    }
}

/// Expand a bounding box by `padding` and clamp it to the viewport, never
/// letting origin go negative or the box exceed viewport bounds.
pub fn clip_with_padding(
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    padding: f64,
    viewport: (f64, f64),
) -> Option<ClipRect> {
    let (vw, vh) = viewport;
    if width <= 0.0 || height <= 0.0 || vw <= 0.0 || vh <= 0.0 {
        return None;
    }
    let x0 = (x - padding).max(0.0);
    let y0 = (y - padding).max(0.0);
    let x1 = (x + width + padding).min(vw);
    let y1 = (y + height + padding).min(vh);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(ClipRect {
        x: x0,
        y: y0,
        width: x1 - x0,
        height: y1 - y0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_state_parse() {
        assert_eq!(WaitState::parse("networkidle"), Some(WaitState::NetworkIdle));
        assert_eq!(WaitState::parse("LOAD"), Some(WaitState::Load));
        assert_eq!(WaitState::parse("commit"), Some(WaitState::Commit));
        assert_eq!(WaitState::parse("bogus"), None);
    }

    #[test]
    fn ready_state_mapping() {
        assert!(WaitState::DomContentLoaded.ready_state_satisfies("interactive"));
        assert!(WaitState::DomContentLoaded.ready_state_satisfies("complete"));
        assert!(!WaitState::Load.ready_state_satisfies("interactive"));
        assert!(WaitState::Load.ready_state_satisfies("complete"));
        assert!(WaitState::Commit.ready_state_satisfies("interactive"));
    }

    #[test]
    fn lifecycle_names() {
        assert_eq!(WaitState::NetworkIdle.lifecycle_name(), "networkIdle");
        assert_eq!(WaitState::DomContentLoaded.lifecycle_name(), "DOMContentLoaded");
    }

    #[test]
    fn clip_clamps_to_viewport() {
        let clip = clip_with_padding(10.0, 10.0, 100.0, 50.0, 10.0, (800.0, 600.0)).unwrap();
        assert_eq!(clip, ClipRect { x: 0.0, y: 0.0, width: 120.0, height: 70.0 });
    }

    #[test]
    fn clip_never_negative() {
        let clip = clip_with_padding(2.0, 3.0, 50.0, 50.0, 20.0, (800.0, 600.0)).unwrap();
        assert!(clip.x >= 0.0 && clip.y >= 0.0);
    }

    #[test]
    fn clip_bounded_by_viewport_edges() {
        let clip = clip_with_padding(780.0, 580.0, 100.0, 100.0, 10.0, (800.0, 600.0)).unwrap();
        assert!(clip.x + clip.width <= 800.0);
        assert!(clip.y + clip.height <= 600.0);
    }

    #[test]
    fn degenerate_clip_is_none() {
        assert!(clip_with_padding(900.0, 700.0, 10.0, 10.0, 0.0, (800.0, 600.0)).is_none());
        assert!(clip_with_padding(0.0, 0.0, 0.0, 10.0, 0.0, (800.0, 600.0)).is_none());
    }
}
