//! Chromium discovery, launch flags, and CDP endpoint handshake.

use std::path::{Path, PathBuf};
use std::time::Duration;

use devbrowser_types::env::env_truthy;
use devbrowser_types::WindowSize;

use crate::error::CdpError;

/// Well-known binary names searched on `PATH`.
const PATH_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
];

/// Absolute fallback locations (macOS app bundles).
const ABSOLUTE_CANDIDATES: &[&str] = &[
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
];

/// Locate a Chromium binary: `DEV_BROWSER_CHROMIUM` wins, then `PATH`, then
/// well-known locations.
pub fn find_chromium() -> Result<PathBuf, CdpError> {
    if let Ok(explicit) = std::env::var("DEV_BROWSER_CHROMIUM") {
        let p = PathBuf::from(explicit.trim());
        if p.is_file() {
            return Ok(p);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        for dir in std::env::split_paths(&path_var) {
            for name in PATH_CANDIDATES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
    }

    for cand in ABSOLUTE_CANDIDATES {
        let p = Path::new(cand);
        if p.is_file() {
            return Ok(p.to_path_buf());
        }
    }

    Err(CdpError::BrowserNotFound)
}

/// Build the Chromium argv for a daemon-owned browser.
pub fn launch_args(
    cdp_port: u16,
    user_data_dir: &Path,
    headless: bool,
    window: WindowSize,
) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={cdp_port}"),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-dev-shm-usage".to_string(),
        format!("--window-size={},{}", window.width, window.height),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    if !env_truthy("DEV_BROWSER_USE_KEYCHAIN") {
        args.push("--use-mock-keychain".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// Spawn the browser process, detached from our stdio.
pub async fn spawn_browser(
    binary: &Path,
    args: &[String],
) -> Result<tokio::process::Child, CdpError> {
    tokio::process::Command::new(binary)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CdpError::LaunchFailed {
            reason: format!("spawn {}: {e}", binary.display()),
        })
}

/// Poll the CDP HTTP endpoint until the browser reports its WebSocket
/// debugger URL.
pub async fn discover_ws_endpoint(cdp_port: u16, timeout: Duration) -> Result<String, CdpError> {
    let url = format!("http://127.0.0.1:{cdp_port}/json/version");
    let client = reqwest::Client::new();
    let deadline = tokio::time::Instant::now() + timeout;
    let mut last_error = String::from("no response");

    while tokio::time::Instant::now() < deadline {
        match client
            .get(&url)
            .timeout(Duration::from_millis(1500))
            .send()
            .await
        {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(body) => {
                    if let Some(ws) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                        if !ws.is_empty() {
                            return Ok(ws.to_string());
                        }
                    }
                    last_error = "version response missing webSocketDebuggerUrl".to_string();
                }
                Err(e) => last_error = e.to_string(),
            },
            Err(e) => last_error = e.to_string(),
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    Err(CdpError::LaunchFailed {
        reason: format!("timed out waiting for CDP endpoint at {url}: {last_error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_args_include_cdp_and_profile() {
        std::env::remove_var("DEV_BROWSER_USE_KEYCHAIN");
        let args = launch_args(
            9222,
            Path::new("/tmp/profile"),
            true,
            WindowSize { width: 1280, height: 720 },
        );
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--use-mock-keychain".to_string()));
        assert!(args.contains(&"--window-size=1280,720".to_string()));
    }

    #[test]
    fn keychain_flag_respects_override() {
        std::env::set_var("DEV_BROWSER_USE_KEYCHAIN", "1");
        let args = launch_args(0, Path::new("/tmp/p"), false, WindowSize::DEFAULT);
        assert!(!args.contains(&"--use-mock-keychain".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        std::env::remove_var("DEV_BROWSER_USE_KEYCHAIN");
    }
}
