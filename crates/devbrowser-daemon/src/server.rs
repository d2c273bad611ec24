//! The daemon's HTTP API.
//!
//! JSON in, JSON out. Every response carries `{ok: bool, error?: string}`;
//! application-level failures still return 200 with `ok: false`. Requests
//! arriving mid-shutdown get a retryable 503; a dead browser turns every
//! page operation into `{ok: false, error: "browser-exited"}`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;

use devbrowser_cdp::{daemon_version, CdpClient, PageDriver, WaitState};
use devbrowser_diagnose::tools::run_tool;

use crate::browser::{
    attach_page_pump, close_page_target, create_page_target, list_page_targets,
};
use crate::pages::{PageHandle, Pages};

/// Shared state behind every handler.
pub struct Daemon {
    pub cdp: CdpClient,
    pub ws_endpoint: String,
    pub pages: Pages,
    pub artifact_root: PathBuf,
    pub shutdown: watch::Sender<bool>,
    pub draining: AtomicBool,
    pub browser_alive: AtomicBool,
}

impl Daemon {
    fn ok(body: Value) -> Response {
        let mut body = body;
        body["ok"] = Value::Bool(true);
        (StatusCode::OK, Json(body)).into_response()
    }

    fn fail(error: impl std::fmt::Display) -> Response {
        (
            StatusCode::OK,
            Json(json!({ "ok": false, "error": error.to_string() })),
        )
            .into_response()
    }

    /// Reject page work while draining or after a browser crash.
    fn page_guard(&self) -> Option<Response> {
        if self.draining.load(Ordering::SeqCst) {
            return Some(
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "ok": false, "error": "daemon is shutting down" })),
                )
                    .into_response(),
            );
        }
        if !self.browser_alive.load(Ordering::SeqCst) {
            return Some(Self::fail("browser-exited"));
        }
        None
    }

    /// Find or lazily create a named page, with its console pump attached.
    async fn get_or_create_page(
        self: &Arc<Self>,
        name: &str,
    ) -> Result<Arc<PageHandle>, String> {
        if let Some(page) = self.pages.get(name).await {
            return Ok(page);
        }
        let target_id = create_page_target(&self.cdp)
            .await
            .map_err(|e| e.to_string())?;
        let page = PageHandle::new(name.to_string(), target_id);
        attach_page_pump(&self.cdp, &page)
            .await
            .map_err(|e| e.to_string())?;
        self.pages.insert(Arc::clone(&page)).await;
        Ok(page)
    }
}

pub fn router(state: Arc<Daemon>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/pages", get(list_pages))
        .route("/pages/{name}", post(open_page).delete(close_page))
        .route("/pages/{name}/console", get(page_console))
        .route("/call", post(call_tool))
        .route("/stop", post(stop))
        .with_state(state)
}

async fn healthz() -> Response {
    Daemon::ok(json!({ "version": daemon_version() }))
}

async fn list_pages(State(state): State<Arc<Daemon>>) -> Response {
    if let Some(resp) = state.page_guard() {
        return resp;
    }
    let targets = match list_page_targets(&state.cdp).await {
        Ok(t) => t,
        Err(e) => return Daemon::fail(e),
    };
    let mut out = Vec::new();
    for page in state.pages.list().await {
        let info = targets.iter().find(|(tid, _, _)| *tid == page.target_id);
        let (url, title) = match info {
            Some((_, url, title)) => (url.clone(), title.clone()),
            None => continue,
        };
        out.push(json!({
            "name": page.name,
            "url": url,
            "title": title,
            "targetId": page.target_id,
        }));
    }
    Daemon::ok(json!({ "pages": out }))
}

#[derive(Debug, Default, Deserialize)]
struct OpenPageBody {
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "waitUntil")]
    wait_until: Option<String>,
    #[serde(default, rename = "timeoutMs")]
    timeout_ms: Option<u64>,
}

async fn open_page(
    State(state): State<Arc<Daemon>>,
    Path(name): Path<String>,
    raw_body: String,
) -> Response {
    if let Some(resp) = state.page_guard() {
        return resp;
    }
    // The body is optional; an empty or absent one means "just ensure".
    let body: OpenPageBody = if raw_body.trim().is_empty() {
        OpenPageBody::default()
    } else {
        match serde_json::from_str(&raw_body) {
            Ok(b) => b,
            Err(e) => return Daemon::fail(format!("invalid request body: {e}")),
        }
    };

    let page = match state.get_or_create_page(&name).await {
        Ok(page) => page,
        Err(e) => return Daemon::fail(e),
    };

    if let Some(url) = body.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        let wait_until = body
            .wait_until
            .as_deref()
            .and_then(WaitState::parse)
            .unwrap_or(WaitState::DomContentLoaded);
        let timeout = Duration::from_millis(body.timeout_ms.unwrap_or(45_000).max(1));

        let _call = page.call_lock.lock().await;
        let result = async {
            let session = state.cdp.attach_page(&page.target_id).await?;
            let mut driver = PageDriver::new(session).await?;
            let nav = driver.navigate(url, wait_until, timeout).await;
            let _ = driver.detach().await;
            nav
        }
        .await;
        if let Err(e) = result {
            return Daemon::fail(e);
        }
    }

    Daemon::ok(json!({
        "wsEndpoint": state.ws_endpoint,
        "targetId": page.target_id,
    }))
}

async fn close_page(State(state): State<Arc<Daemon>>, Path(name): Path<String>) -> Response {
    if let Some(resp) = state.page_guard() {
        return resp;
    }
    // Closing an absent page is fine.
    if let Some(page) = state.pages.remove(&name).await {
        page.stop_pump();
        close_page_target(&state.cdp, &page.target_id).await;
    }
    Daemon::ok(json!({ "page": name }))
}

#[derive(Debug, Deserialize)]
struct ConsoleQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    levels: Option<String>,
}

async fn page_console(
    State(state): State<Arc<Daemon>>,
    Path(name): Path<String>,
    Query(query): Query<ConsoleQuery>,
) -> Response {
    if let Some(resp) = state.page_guard() {
        return resp;
    }
    let Some(page) = state.pages.get(&name).await else {
        return Daemon::fail(format!("no such page '{name}'"));
    };
    let limit = query.limit.unwrap_or(200).clamp(1, 2000);
    let levels: Option<Vec<String>> = query.levels.as_deref().and_then(|raw| {
        let parsed: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if parsed.is_empty() {
            None
        } else {
            Some(parsed)
        }
    });

    let ring = page.console.lock().await;
    let entries = ring.snapshot(limit, levels.as_deref());
    Daemon::ok(json!({ "page": name, "entries": entries }))
}

#[derive(Debug, Deserialize)]
struct CallBody {
    #[serde(default)]
    page: Option<String>,
    tool: String,
    #[serde(default)]
    arguments: Option<Value>,
}

async fn call_tool(State(state): State<Arc<Daemon>>, Json(body): Json<CallBody>) -> Response {
    if let Some(resp) = state.page_guard() {
        return resp;
    }
    let page_name = body
        .page
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("main");
    let args = body.arguments.unwrap_or_else(|| json!({}));

    let page = match state.get_or_create_page(page_name).await {
        Ok(page) => page,
        Err(e) => return Daemon::fail(e),
    };

    let _call = page.call_lock.lock().await;
    let result = async {
        let session = state
            .cdp
            .attach_page(&page.target_id)
            .await
            .map_err(|e| e.to_string())?;
        let mut driver = PageDriver::new(session)
            .await
            .map_err(|e| e.to_string())?;
        let outcome = run_tool(&mut driver, &body.tool, &args, &state.artifact_root)
            .await
            .map_err(|e| e.to_string());
        let _ = driver.detach().await;
        outcome
    }
    .await;

    match result {
        Ok(value) => Daemon::ok(json!({ "page": page_name, "tool": body.tool, "result": value })),
        Err(e) => Daemon::fail(e),
    }
}

async fn stop(State(state): State<Arc<Daemon>>) -> Response {
    tracing::info!("stop requested");
    state.draining.store(true, Ordering::SeqCst);
    let _ = state.shutdown.send(true);
    Daemon::ok(json!({ "stopping": true }))
}
