//! Snapshot probe: idempotent injection of the in-page engine plus the
//! entry-point calls for capture, ref selection, and overlay annotation.

use serde_json::Value;

use devbrowser_cdp::{CdpError, PageDriver, SNAPSHOT_JS};

#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    pub engine: String,
    pub format: String,
    pub interactive_only: bool,
    pub include_headings: bool,
    pub max_items: usize,
    pub max_chars: usize,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            engine: "simple".into(),
            format: "list".into(),
            interactive_only: true,
            include_headings: true,
            max_items: 80,
            max_chars: 8000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotResult {
    pub yaml: String,
    pub items: Vec<Value>,
}

/// Install the snapshot engine unless its sentinel global is present.
pub async fn ensure_snapshot_engine(driver: &PageDriver) -> Result<(), CdpError> {
    let present = driver
        .evaluate("Boolean(globalThis.__devBrowser_getAISnapshot)")
        .await?
        .as_bool()
        .unwrap_or(false);
    if !present {
        driver.evaluate(SNAPSHOT_JS).await?;
    }
    Ok(())
}

/// Capture a snapshot of the page's interactive tree.
pub async fn get_snapshot(
    driver: &PageDriver,
    opts: &SnapshotOptions,
) -> Result<SnapshotResult, CdpError> {
    ensure_snapshot_engine(driver).await?;

    let payload = serde_json::json!({
        "engine": opts.engine,
        "format": opts.format,
        "interactiveOnly": opts.interactive_only,
        "includeHeadings": opts.include_headings,
        "maxItems": opts.max_items,
        "maxChars": opts.max_chars,
    });
    let raw = driver
        .call_function("(opts) => globalThis.__devBrowser_getAISnapshot(opts)", &payload)
        .await?;

    let yaml = raw
        .get("yaml")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let items = raw
        .get("items")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    Ok(SnapshotResult { yaml, items })
}

/// Resolve a snapshot ref to its bounding rect `{x, y, width, height}`, or
/// `None` when the ref is stale.
pub async fn ref_bounds(driver: &PageDriver, reference: &str) -> Result<Option<Value>, CdpError> {
    ensure_snapshot_engine(driver).await?;
    let arg = Value::String(reference.to_string());
    let result = driver
        .call_function(
            r#"(ref) => {
  const el = globalThis.__devBrowser_selectSnapshotRef(ref);
  if (!el) return null;
  el.scrollIntoView({ block: 'center', inline: 'center' });
  const r = el.getBoundingClientRect();
  return { x: r.x, y: r.y, width: r.width, height: r.height };
}"#,
            &arg,
        )
        .await?;
    Ok(if result.is_null() { None } else { Some(result) })
}

/// Focus the element behind a snapshot ref. Returns whether it resolved.
pub async fn focus_ref(driver: &PageDriver, reference: &str) -> Result<bool, CdpError> {
    ensure_snapshot_engine(driver).await?;
    let arg = Value::String(reference.to_string());
    let result = driver
        .call_function(
            r#"(ref) => {
  const el = globalThis.__devBrowser_selectSnapshotRef(ref);
  if (!el) return false;
  el.focus();
  if ('value' in el) el.value = '';
  return true;
}"#,
            &arg,
        )
        .await?;
    Ok(result.as_bool().unwrap_or(false))
}

/// Draw ref labels over the page for annotated screenshots.
pub async fn draw_ref_overlay(driver: &PageDriver, max_refs: usize) -> Result<(), CdpError> {
    ensure_snapshot_engine(driver).await?;
    let arg = serde_json::json!({ "maxRefs": max_refs });
    driver
        .call_function("(opts) => globalThis.__devBrowser_drawRefOverlay(opts)", &arg)
        .await?;
    Ok(())
}

/// Remove the ref overlay.
pub async fn clear_ref_overlay(driver: &PageDriver) -> Result<(), CdpError> {
    ensure_snapshot_engine(driver).await?;
    driver
        .evaluate("globalThis.__devBrowser_clearRefOverlay()")
        .await?;
    Ok(())
}
