//! Selector counting and deterministic element previews.

use serde_json::Value;

use devbrowser_cdp::{CdpError, PageDriver};

/// `document.querySelectorAll(sel).length`; a thrown selector error is
/// surfaced as `Err` so callers can record it as an eval error.
pub async fn count_selector(driver: &PageDriver, selector: &str) -> Result<usize, CdpError> {
    let arg = Value::String(selector.to_string());
    let result = driver
        .call_function(
            r#"(sel) => {
  try {
    return document.querySelectorAll(String(sel)).length;
  } catch (e) {
    return { __error: String(e && e.message ? e.message : e) };
  }
}"#,
            &arg,
        )
        .await?;

    if let Some(n) = result.as_u64() {
        return Ok(n as usize);
    }
    if let Some(msg) = result.get("__error").and_then(|v| v.as_str()) {
        return Err(CdpError::JsException {
            message: format!("selector eval error: {msg}"),
        });
    }
    Err(CdpError::Transport {
        detail: "unexpected selector count result".to_string(),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct SelectorPreviewOptions {
    pub limit: usize,
    pub text_max_chars: usize,
}

impl Default for SelectorPreviewOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            text_max_chars: 120,
        }
    }
}

/// A bounded preview of matching elements, for assert failure context.
pub async fn selector_preview(
    driver: &PageDriver,
    selector: &str,
    opts: SelectorPreviewOptions,
) -> Result<Vec<Value>, CdpError> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(CdpError::Transport {
            detail: "selector is required".to_string(),
        });
    }
    let arg = serde_json::json!({
        "selector": selector,
        "limit": opts.limit.max(1),
        "maxChars": opts.text_max_chars.max(1),
    });
    let result = driver
        .call_function(
            r#"(opts) => {
  let matches;
  try {
    matches = document.querySelectorAll(String(opts.selector));
  } catch (e) {
    return { __error: String(e && e.message ? e.message : e) };
  }
  const out = [];
  for (const el of matches) {
    if (out.length >= opts.limit) break;
    const text = (el.innerText || el.textContent || '').replace(/\s+/g, ' ').trim();
    out.push({
      tag: el.tagName.toLowerCase(),
      id: el.id || '',
      class: (el.getAttribute('class') || '').trim(),
      text: text.length > opts.maxChars ? text.slice(0, opts.maxChars) : text,
    });
  }
  return { preview: out };
}"#,
            &arg,
        )
        .await?;

    if let Some(msg) = result.get("__error").and_then(|v| v.as_str()) {
        return Err(CdpError::JsException {
            message: format!("selector eval error: {msg}"),
        });
    }
    Ok(result
        .get("preview")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default())
}
