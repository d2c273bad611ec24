//! Output writer for the `--output summary|json|path|html` modes.

use std::path::Path;

use anyhow::{bail, Context};
use serde_json::Value;

use devbrowser_types::paths::safe_artifact_path;

/// Render a command result according to the output mode, returning the text
/// to print.
pub fn write_output(
    artifact_root: &Path,
    mode: &str,
    value: &Value,
    out_path: &str,
) -> anyhow::Result<String> {
    match mode {
        "json" => Ok(serde_json::to_string_pretty(value)?),
        "summary" => {
            if let Some(snapshot) = value.get("snapshot").and_then(|v| v.as_str()) {
                return Ok(snapshot.to_string());
            }
            if let Some(path) = value.get("path").and_then(|v| v.as_str()) {
                return Ok(path.to_string());
            }
            Ok(serde_json::to_string(value)?)
        }
        "path" => {
            let default_name = format!("cli-{}.json", chrono::Utc::now().timestamp_millis());
            let path = safe_artifact_path(artifact_root, out_path, &default_name)
                .context("resolving --out path")?;
            let mut json = serde_json::to_string_pretty(value)?;
            json.push('\n');
            std::fs::write(&path, json)
                .with_context(|| format!("writing {}", path.display()))?;
            Ok(path.display().to_string())
        }
        "html" => match value.get("html").and_then(|v| v.as_str()) {
            Some(html) => Ok(html.to_string()),
            None => bail!("html output not available for this command"),
        },
        other => bail!("--output must be summary|json|path|html (got '{other}')"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prefers_snapshot_then_path() {
        let tmp = tempfile::tempdir().unwrap();
        let v = serde_json::json!({"snapshot": "[e1] button", "path": "/x"});
        assert_eq!(write_output(tmp.path(), "summary", &v, "").unwrap(), "[e1] button");

        let v = serde_json::json!({"path": "/some/shot.png"});
        assert_eq!(write_output(tmp.path(), "summary", &v, "").unwrap(), "/some/shot.png");

        let v = serde_json::json!({"clicked": true});
        assert_eq!(
            write_output(tmp.path(), "summary", &v, "").unwrap(),
            "{\"clicked\":true}"
        );
    }

    #[test]
    fn html_mode_requires_html_field() {
        let tmp = tempfile::tempdir().unwrap();
        let v = serde_json::json!({"html": "<html></html>"});
        assert_eq!(write_output(tmp.path(), "html", &v, "").unwrap(), "<html></html>");

        let err = write_output(tmp.path(), "html", &serde_json::json!({}), "").unwrap_err();
        assert!(err.to_string().contains("html output not available"));
    }

    #[test]
    fn path_mode_writes_file_under_root() {
        let tmp = tempfile::tempdir().unwrap();
        let v = serde_json::json!({"ok": true});
        let printed = write_output(tmp.path(), "path", &v, "result.json").unwrap();
        assert_eq!(printed, tmp.path().join("result.json").display().to_string());
        let content = std::fs::read_to_string(tmp.path().join("result.json")).unwrap();
        assert!(content.contains("\"ok\""));
    }

    #[test]
    fn path_mode_refuses_escapes() {
        std::env::remove_var("DEV_BROWSER_ALLOW_UNSAFE_PATHS");
        let tmp = tempfile::tempdir().unwrap();
        let v = serde_json::json!({"ok": true});
        let err = write_output(tmp.path(), "path", &v, "../../etc/passwd").unwrap_err();
        assert!(format!("{err:#}").contains("Refusing to write outside artifact dir"));
    }

    #[test]
    fn unknown_mode_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(write_output(tmp.path(), "yaml", &serde_json::json!({}), "").is_err());
    }
}
