//! Harness state retrieval and the overlay/error classifiers.

use serde_json::Value;

use devbrowser_cdp::{CdpError, PageDriver, HARNESS_INIT_JS};

/// Ensure the harness is installed in the current document.
///
/// The document-init script only covers future navigations, so this checks
/// the sentinel and installs into the live document when missing. The script
/// itself is a no-op when already present.
pub async fn ensure_harness(driver: &PageDriver) -> Result<(), CdpError> {
    let present = driver
        .evaluate("Boolean(globalThis.__devBrowser_getHarnessState)")
        .await?
        .as_bool()
        .unwrap_or(false);
    if !present {
        driver.evaluate(HARNESS_INIT_JS).await?;
    }
    Ok(())
}

/// Read the harness state structure, or `None` when no harness is present.
pub async fn read_harness_state(driver: &PageDriver) -> Result<Option<Value>, CdpError> {
    let result = driver
        .evaluate(
            "globalThis.__devBrowser_getHarnessState ? globalThis.__devBrowser_getHarnessState() : null",
        )
        .await?;
    if result.is_null() {
        return Ok(None);
    }
    Ok(Some(result))
}

/// Classify an overlay's visible text into a stable failure class.
pub fn classify_overlay(text: &str) -> &'static str {
    let t = text.to_lowercase();
    if t.contains("failed to resolve import") || t.contains("cannot find module") {
        "missing-module"
    } else if t.contains("syntaxerror") || t.contains("unexpected token") {
        "syntax-error"
    } else if t.contains("typeerror") {
        "type-error"
    } else if t.contains("referenceerror") {
        "reference-error"
    } else {
        "unknown"
    }
}

/// Classify a harness error hook entry.
pub fn classify_harness_error(kind: &str, message: &str) -> &'static str {
    let t = kind.to_lowercase();
    let m = message.to_lowercase();
    if t == "unhandledrejection" && m.contains("fetch") {
        "unhandledrejection-fetch"
    } else if m.contains("typeerror") {
        "type-error"
    } else if m.contains("referenceerror") {
        "reference-error"
    } else if m.contains("syntaxerror") {
        "syntax-error"
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_classes() {
        assert_eq!(
            classify_overlay("Failed to resolve import \"./missing\" from \"src/App.tsx\""),
            "missing-module"
        );
        assert_eq!(classify_overlay("Error: Cannot find module 'left-pad'"), "missing-module");
        assert_eq!(classify_overlay("SyntaxError: Unexpected end of input"), "syntax-error");
        assert_eq!(classify_overlay("Unexpected token '<'"), "syntax-error");
        assert_eq!(classify_overlay("TypeError: x is not a function"), "type-error");
        assert_eq!(classify_overlay("ReferenceError: foo is not defined"), "reference-error");
        assert_eq!(classify_overlay("something else entirely"), "unknown");
    }

    #[test]
    fn harness_error_classes() {
        assert_eq!(
            classify_harness_error("unhandledrejection", "Failed to fetch"),
            "unhandledrejection-fetch"
        );
        assert_eq!(
            classify_harness_error("error", "TypeError: bad"),
            "type-error"
        );
        assert_eq!(
            classify_harness_error("error", "ReferenceError: nope"),
            "reference-error"
        );
        assert_eq!(classify_harness_error("error", "plain failure"), "unknown");
    }
}
