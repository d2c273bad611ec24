//! Page tool dispatcher.
//!
//! One entry point, [`run_tool`], maps a tool name plus a JSON argument
//! object onto driver/probe operations and returns a JSON result. Both the
//! daemon's `/call` endpoint and the CLI `call` subcommand route through
//! this.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use devbrowser_cdp::driver::clip_with_padding;
use devbrowser_cdp::{CdpError, ClipRect, PageDriver, WaitState, WaitStrategy};
use devbrowser_types::paths::{safe_artifact_path, PathError};

use crate::selector::{count_selector, selector_preview, SelectorPreviewOptions};
use crate::snapshot::{
    clear_ref_overlay, draw_ref_overlay, focus_ref, get_snapshot, ref_bounds, SnapshotOptions,
};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    InvalidArgs(String),

    #[error("unknown call '{0}'")]
    UnknownTool(String),

    // Not transparent: the inner error must stay visible in the source
    // chain so exit-code mapping can find timeouts.
    #[error("{0}")]
    Browser(#[from] CdpError),

    #[error("{0}")]
    Path(#[from] PathError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn require_string(args: &Value, key: &str) -> Result<String, ToolError> {
    match args.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(ToolError::InvalidArgs(format!(
            "expected non-empty string '{key}'"
        ))),
    }
}

fn optional_string(args: &Value, key: &str, def: &str) -> Result<String, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(def.to_string()),
        Some(Value::String(s)) => Ok(s.to_string()),
        Some(_) => Err(ToolError::InvalidArgs(format!("expected string '{key}'"))),
    }
}

fn optional_bool(args: &Value, key: &str, def: bool) -> Result<bool, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(def),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(ToolError::InvalidArgs(format!("expected boolean '{key}'"))),
    }
}

fn optional_u64(args: &Value, key: &str, def: u64) -> Result<u64, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(def),
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| {
                ToolError::InvalidArgs(format!("expected non-negative integer '{key}'"))
            }),
    }
}

/// Parse a clip argument: `"x,y,w,h"`, `[x,y,w,h]`, or `{x,y,width,height}`.
fn optional_clip(args: &Value) -> Result<Option<ClipRect>, ToolError> {
    let raw = match args.get("clip") {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v,
    };

    let vals: Vec<f64> = match raw {
        Value::String(s) => {
            let parts: Vec<&str> = s.split(',').map(str::trim).collect();
            if parts.len() != 4 {
                return Err(ToolError::InvalidArgs("clip must be x,y,width,height".into()));
            }
            let mut out = Vec::with_capacity(4);
            for p in parts {
                out.push(p.parse::<f64>().map_err(|_| {
                    ToolError::InvalidArgs("clip values must be numbers".into())
                })?);
            }
            out
        }
        Value::Array(items) => {
            if items.len() != 4 {
                return Err(ToolError::InvalidArgs("clip must have 4 items: x,y,width,height".into()));
            }
            items
                .iter()
                .map(|v| v.as_f64().ok_or_else(|| ToolError::InvalidArgs("clip values must be numbers".into())))
                .collect::<Result<_, _>>()?
        }
        Value::Object(_) => {
            let mut out = Vec::with_capacity(4);
            for key in ["x", "y", "width", "height"] {
                out.push(raw.get(key).and_then(|v| v.as_f64()).ok_or_else(|| {
                    ToolError::InvalidArgs("clip object needs x,y,width,height".into())
                })?);
            }
            out
        }
        _ => return Err(ToolError::InvalidArgs("clip must be string, array, or object".into())),
    };

    if vals.iter().any(|v| *v < 0.0) {
        return Err(ToolError::InvalidArgs("clip values must be non-negative".into()));
    }
    if vals[2] < 1.0 || vals[3] < 1.0 {
        return Err(ToolError::InvalidArgs("clip width/height must be positive".into()));
    }
    Ok(Some(ClipRect {
        x: vals[0],
        y: vals[1],
        width: vals[2].min(2000.0),
        height: vals[3].min(2000.0),
    }))
}

fn parse_wait_state(raw: &str) -> Result<WaitState, ToolError> {
    WaitState::parse(raw).ok_or_else(|| {
        ToolError::InvalidArgs(format!(
            "invalid state '{raw}' (expected one of: load, domcontentloaded, networkidle, commit)"
        ))
    })
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Execute one named tool against a page.
pub async fn run_tool(
    driver: &mut PageDriver,
    name: &str,
    args: &Value,
    artifact_dir: &Path,
) -> Result<Value, ToolError> {
    match name {
        "goto" => {
            let url = require_string(args, "url")?;
            let wait_until =
                parse_wait_state(&optional_string(args, "wait_until", "domcontentloaded")?)?;
            let timeout_ms = optional_u64(args, "timeout_ms", 45_000)?;
            driver
                .navigate(&url, wait_until, Duration::from_millis(timeout_ms.max(1)))
                .await?;
            Ok(serde_json::json!({
                "url": driver.current_url().await.unwrap_or_default(),
                "title": driver.title().await.unwrap_or_default(),
            }))
        }

        "wait" => {
            let strategy_raw = optional_string(args, "strategy", "native")?;
            let strategy = WaitStrategy::parse(&strategy_raw).ok_or_else(|| {
                ToolError::InvalidArgs("invalid strategy (expected 'native' or 'perf')".into())
            })?;
            let state = parse_wait_state(&optional_string(args, "state", "load")?)?;
            let timeout_ms = optional_u64(args, "timeout_ms", 10_000)?;
            let min_wait_ms = optional_u64(args, "min_wait_ms", 0)?;

            let result = driver
                .wait_for_state(
                    strategy,
                    state,
                    Duration::from_millis(timeout_ms.max(1)),
                    Duration::from_millis(min_wait_ms),
                )
                .await?;
            Ok(serde_json::json!({
                "ok": result.ok,
                "strategy": result.strategy.as_str(),
                "state": result.state.as_str(),
                "timed_out": result.timed_out,
                "waited_ms": result.waited_ms,
                "ready_state": result.ready_state,
                "pending_requests": result.pending_requests,
            }))
        }

        "snapshot" => {
            let opts = SnapshotOptions {
                engine: optional_string(args, "engine", "simple")?,
                format: optional_string(args, "format", "list")?,
                interactive_only: optional_bool(args, "interactive_only", true)?,
                include_headings: optional_bool(args, "include_headings", true)?,
                max_items: optional_u64(args, "max_items", 80)? as usize,
                max_chars: optional_u64(args, "max_chars", 8000)? as usize,
            };
            let snap = get_snapshot(driver, &opts).await?;
            Ok(serde_json::json!({
                "url": driver.current_url().await.unwrap_or_default(),
                "title": driver.title().await.unwrap_or_default(),
                "engine": opts.engine,
                "format": opts.format,
                "snapshot": snap.yaml,
                "items": snap.items,
            }))
        }

        "screenshot" => screenshot_tool(driver, args, artifact_dir).await,

        "save_html" => {
            let include_html = optional_bool(args, "include_html", true)?;
            let path_arg = optional_string(args, "path", "")?;
            let path = safe_artifact_path(
                artifact_dir,
                &path_arg,
                &format!("page-{}.html", chrono::Utc::now().timestamp_millis()),
            )?;
            let html = driver.html().await?;
            std::fs::write(&path, &html)?;
            let mut res = serde_json::json!({ "path": path.display().to_string() });
            if include_html {
                res["html"] = Value::String(html);
            }
            Ok(res)
        }

        "js_eval" => {
            let expression = require_string(args, "expression")?;
            let result = driver.evaluate(&expression).await?;
            Ok(serde_json::json!({ "result": result }))
        }

        "press" => {
            let key = require_string(args, "key")?;
            driver.press_key(&key).await?;
            Ok(serde_json::json!({ "key": key, "pressed": true }))
        }

        "click_ref" => {
            let reference = require_string(args, "ref")?;
            let bounds = ref_bounds(driver, &reference)
                .await?
                .ok_or_else(|| ToolError::InvalidArgs(format!("ref '{reference}' not found")))?;
            let x = bounds.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let y = bounds.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let w = bounds.get("width").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let h = bounds.get("height").and_then(|v| v.as_f64()).unwrap_or(0.0);
            if w <= 0.0 || h <= 0.0 {
                return Err(ToolError::InvalidArgs(format!(
                    "ref '{reference}' has zero size"
                )));
            }
            driver.click_at(x + w / 2.0, y + h / 2.0).await?;
            Ok(serde_json::json!({ "ref": reference, "clicked": true }))
        }

        "fill_ref" => {
            let reference = require_string(args, "ref")?;
            let text = require_string(args, "text")?;
            let focused = focus_ref(driver, &reference).await?;
            if !focused {
                return Err(ToolError::InvalidArgs(format!(
                    "ref '{reference}' not found"
                )));
            }
            driver.insert_text(&text).await?;
            Ok(serde_json::json!({ "ref": reference, "filled": true }))
        }

        "test_selector" => {
            let selector = require_string(args, "selector")?;
            match count_selector(driver, &selector).await {
                Ok(count) => {
                    let preview =
                        selector_preview(driver, &selector, SelectorPreviewOptions::default())
                            .await
                            .unwrap_or_default();
                    Ok(serde_json::json!({
                        "selector": selector,
                        "count": count,
                        "preview": preview,
                    }))
                }
                Err(e) => Ok(serde_json::json!({
                    "selector": selector,
                    "count": 0,
                    "evalError": e.to_string(),
                })),
            }
        }

        other => Err(ToolError::UnknownTool(other.to_string())),
    }
}

async fn screenshot_tool(
    driver: &mut PageDriver,
    args: &Value,
    artifact_dir: &Path,
) -> Result<Value, ToolError> {
    let path_arg = optional_string(args, "path", "")?;
    let full_page = optional_bool(args, "full_page", true)?;
    let annotate = optional_bool(args, "annotate_refs", false)?;
    let crop = optional_clip(args)?;

    let selector = optional_string(args, "selector", "")?;
    let aria_role = optional_string(args, "aria_role", "")?;
    let aria_name = optional_string(args, "aria_name", "")?;
    let nth = optional_u64(args, "nth", 1)?.max(1) as usize;
    let padding = optional_u64(args, "padding_px", 10)? as f64;

    let has_target = !selector.trim().is_empty()
        || !aria_role.trim().is_empty()
        || !aria_name.trim().is_empty();
    if crop.is_some() && has_target {
        return Err(ToolError::InvalidArgs(
            "crop cannot be combined with selector/aria targeting".into(),
        ));
    }

    let path = safe_artifact_path(
        artifact_dir,
        &path_arg,
        &format!("screenshot-{}.png", chrono::Utc::now().timestamp_millis()),
    )?;

    let mut clip = crop;
    if has_target {
        let rect = resolve_target_rect(driver, &selector, &aria_role, &aria_name, nth).await?;
        let viewport = driver.viewport().await?;
        clip = clip_with_padding(
            rect.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0),
            rect.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0),
            rect.get("width").and_then(|v| v.as_f64()).unwrap_or(0.0),
            rect.get("height").and_then(|v| v.as_f64()).unwrap_or(0.0),
            padding,
            viewport,
        );
        if clip.is_none() {
            return Err(ToolError::InvalidArgs(
                "target resolves outside the viewport".into(),
            ));
        }
    }

    if annotate {
        draw_ref_overlay(driver, 80).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let shot = driver
        .screenshot(full_page && clip.is_none(), clip)
        .await;
    if annotate {
        let _ = clear_ref_overlay(driver).await;
    }
    let png = shot?;
    std::fs::write(&path, png)?;

    let mut res = serde_json::json!({ "path": path.display().to_string() });
    if let Some(c) = clip {
        res["clip"] = serde_json::json!({
            "x": c.x, "y": c.y, "width": c.width, "height": c.height,
        });
        if has_target {
            res["selector"] = Value::String(selector);
            res["aria_role"] = Value::String(aria_role);
            res["aria_name"] = Value::String(aria_name);
            res["nth"] = Value::from(nth as u64);
        }
    }
    Ok(res)
}

/// Resolve a target spec to a bounding rect. CSS selectors resolve directly
/// in the page; aria targeting goes through the snapshot engine so role and
/// accessible-name resolution stay consistent with snapshot refs.
async fn resolve_target_rect(
    driver: &PageDriver,
    selector: &str,
    aria_role: &str,
    aria_name: &str,
    nth: usize,
) -> Result<Value, ToolError> {
    if !selector.trim().is_empty() {
        let arg = serde_json::json!({ "selector": selector, "nth": nth });
        let rect = driver
            .call_function(
                r#"(opts) => {
  let matches;
  try { matches = document.querySelectorAll(String(opts.selector)); } catch { return null; }
  const el = matches[Math.max(1, Number(opts.nth || 1)) - 1];
  if (!el) return null;
  el.scrollIntoView({ block: 'center', inline: 'center' });
  const r = el.getBoundingClientRect();
  return { x: r.x, y: r.y, width: r.width, height: r.height };
}"#,
                &arg,
            )
            .await?;
        if rect.is_null() {
            return Err(ToolError::InvalidArgs(format!(
                "selector '{selector}' matched no element (nth={nth})"
            )));
        }
        return Ok(rect);
    }

    let snap = get_snapshot(
        driver,
        &SnapshotOptions {
            engine: "aria".into(),
            format: "list".into(),
            interactive_only: false,
            include_headings: true,
            max_items: 400,
            max_chars: 200_000,
        },
    )
    .await?;

    let role_want = aria_role.trim().to_lowercase();
    let name_want = aria_name.trim().to_lowercase();
    let mut seen = 0usize;
    for item in &snap.items {
        let role = item.get("role").and_then(|v| v.as_str()).unwrap_or("");
        let name = item.get("name").and_then(|v| v.as_str()).unwrap_or("");
        if !role_want.is_empty() && role != role_want {
            continue;
        }
        if !name_want.is_empty() && !name.to_lowercase().contains(&name_want) {
            continue;
        }
        seen += 1;
        if seen < nth {
            continue;
        }
        let reference = item.get("ref").and_then(|v| v.as_str()).unwrap_or("");
        if let Some(rect) = ref_bounds(driver, reference).await? {
            return Ok(rect);
        }
    }
    Err(ToolError::InvalidArgs(format!(
        "no element matched aria_role='{aria_role}' aria_name='{aria_name}' (nth={nth})"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_parsing_variants() {
        let args = serde_json::json!({ "clip": "1, 2, 300, 400" });
        let clip = optional_clip(&args).unwrap().unwrap();
        assert_eq!((clip.x, clip.y, clip.width, clip.height), (1.0, 2.0, 300.0, 400.0));

        let args = serde_json::json!({ "clip": [0, 0, 10, 10] });
        assert!(optional_clip(&args).unwrap().is_some());

        let args = serde_json::json!({ "clip": {"x": 5, "y": 5, "width": 50, "height": 50} });
        assert!(optional_clip(&args).unwrap().is_some());

        let args = serde_json::json!({});
        assert!(optional_clip(&args).unwrap().is_none());
    }

    #[test]
    fn clip_rejects_bad_shapes() {
        for bad in [
            serde_json::json!({ "clip": "1,2,3" }),
            serde_json::json!({ "clip": [1, 2, 3] }),
            serde_json::json!({ "clip": "a,b,c,d" }),
            serde_json::json!({ "clip": [0, 0, 0, 10] }),
            serde_json::json!({ "clip": [-1, 0, 10, 10] }),
            serde_json::json!({ "clip": 42 }),
        ] {
            assert!(optional_clip(&bad).is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn clip_is_capped_at_2000() {
        let args = serde_json::json!({ "clip": [0, 0, 9000, 9000] });
        let clip = optional_clip(&args).unwrap().unwrap();
        assert_eq!(clip.width, 2000.0);
        assert_eq!(clip.height, 2000.0);
    }

    #[test]
    fn arg_helpers_validate() {
        let args = serde_json::json!({ "url": "https://x", "n": 5, "flag": true });
        assert_eq!(require_string(&args, "url").unwrap(), "https://x");
        assert!(require_string(&args, "missing").is_err());
        assert_eq!(optional_u64(&args, "n", 1).unwrap(), 5);
        assert_eq!(optional_u64(&args, "absent", 7).unwrap(), 7);
        assert!(optional_bool(&args, "flag", false).unwrap());
        assert!(optional_bool(&args, "n", false).is_err());
        assert!(optional_u64(&serde_json::json!({"n": -3}), "n", 0).is_err());
    }

    #[test]
    fn wait_state_validation_message() {
        let err = parse_wait_state("sometime").unwrap_err();
        assert!(err.to_string().contains("invalid state"));
        assert!(parse_wait_state("networkidle").is_ok());
    }
}
