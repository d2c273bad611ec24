//! Wire-protocol client for the dev-browser daemon.
//!
//! Short-lived CLI invocations use this crate to discover, start, talk to,
//! and stop the per-profile daemon. All HTTP calls carry explicit timeouts;
//! transport failures are surfaced as retryable [`ClientError::Transport`]
//! so callers know what to retry.
//!
//! Application-level failures arrive inside a 200 response as
//! `{ok: false, error}`; [`expect_ok`] converts them into
//! [`ClientError::Daemon`].

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use devbrowser_cdp::daemon_version;
use devbrowser_types::paths::{state_dir, state_file, PathError};
use devbrowser_types::{ConsoleEntry, DaemonStateRecord};

/// How long to wait for a freshly spawned daemon to come up.
const START_DEADLINE: Duration = Duration::from_secs(30);

/// Health-probe timeout; a live local daemon answers well within this.
const HEALTH_TIMEOUT: Duration = Duration::from_millis(500);

/// Errors from the daemon wire protocol.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (refused, timed out). Retryable: the daemon
    /// may still be starting, or a stale record pointed nowhere.
    #[error("daemon transport error ({url}): {reason}")]
    Transport { url: String, reason: String },

    /// The daemon answered with `ok: false`.
    #[error("daemon error: {0}")]
    Daemon(String),

    /// The daemon did not become healthy in time.
    #[error("timed out waiting for dev-browser daemon (profile={profile}); see {log}")]
    StartTimeout { profile: String, log: String },

    #[error("{0}")]
    Path(#[from] PathError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read the state record for a profile, if any.
pub fn read_state(profile: &str) -> Option<DaemonStateRecord> {
    let path = state_file(profile).ok()?;
    DaemonStateRecord::load(&path)
}

/// The daemon HTTP base URL from the state record.
pub fn daemon_base_url(profile: &str) -> Option<String> {
    read_state(profile).map(|s| s.base_url)
}

/// Perform one JSON request against the daemon with a timeout.
///
/// Non-2xx responses still have their body decoded: the daemon signals
/// application failures in-band with `ok: false`.
pub async fn http_json(
    method: &str,
    url: &str,
    body: Option<&Value>,
    timeout: Duration,
) -> Result<Value, ClientError> {
    let client = reqwest::Client::new();
    let mut req = match method {
        "GET" => client.get(url),
        "POST" => client.post(url),
        "DELETE" => client.delete(url),
        other => client.request(
            other.parse().unwrap_or(reqwest::Method::GET),
            url,
        ),
    };
    req = req.timeout(timeout);
    if let Some(b) = body {
        req = req.json(b);
    }
    let resp = req.send().await.map_err(|e| ClientError::Transport {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    resp.json().await.map_err(|e| ClientError::Transport {
        url: url.to_string(),
        reason: format!("invalid JSON response: {e}"),
    })
}

/// Fail with [`ClientError::Daemon`] unless the envelope has `ok: true`.
pub fn expect_ok(data: &Value) -> Result<(), ClientError> {
    if data.get("ok").and_then(|v| v.as_bool()) == Some(true) {
        return Ok(());
    }
    let msg = data
        .get("error")
        .and_then(|v| v.as_str())
        .unwrap_or("request failed")
        .to_string();
    Err(ClientError::Daemon(msg))
}

/// Probe a daemon's health endpoint, returning its version stamp when it
/// answers `ok: true`.
async fn probe_version(base: &str) -> Option<String> {
    let data = http_json("GET", &format!("{base}/healthz"), None, HEALTH_TIMEOUT)
        .await
        .ok()?;
    if data.get("ok").and_then(|v| v.as_bool()) != Some(true) {
        return None;
    }
    data.get("version")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Probe the daemon's health endpoint. Healthy means reachable *and* the
/// version stamp matches this binary's harness; a mismatch counts as
/// unhealthy so a stale daemon gets replaced.
pub async fn is_daemon_healthy(profile: &str) -> bool {
    let Some(base) = daemon_base_url(profile) else {
        return false;
    };
    probe_version(&base).await.as_deref() == Some(daemon_version().as_str())
}

/// Path of the daemon log for a profile.
pub fn daemon_log_path(profile: &str) -> Result<PathBuf, ClientError> {
    Ok(state_dir(profile)?.join("daemon.log"))
}

/// Start the daemon for a profile unless a healthy one is already running.
///
/// The daemon is this same binary re-invoked with the hidden `daemon`
/// subcommand, detached, with stdout/stderr appended to the profile log.
pub async fn start_daemon(profile: &str, headless: bool) -> Result<(), ClientError> {
    if let Some(base) = daemon_base_url(profile) {
        match probe_version(&base).await {
            Some(version) if version == daemon_version() => return Ok(()),
            // A reachable daemon with a different harness stamp must be
            // replaced, not raced: stop it before spawning the new one.
            Some(_) => {
                let _ = stop_daemon(profile).await;
            }
            None => {}
        }
    }

    let dir = state_dir(profile)?;
    std::fs::create_dir_all(&dir)?;
    let log_path = dir.join("daemon.log");
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let log_err = log.try_clone()?;

    let exe = std::env::current_exe()?;
    let mut cmd = std::process::Command::new(exe);
    cmd.arg("daemon")
        .arg("--profile")
        .arg(profile)
        .stdin(std::process::Stdio::null())
        .stdout(log)
        .stderr(log_err);
    if headless {
        cmd.arg("--headless");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd.spawn()?;

    let deadline = tokio::time::Instant::now() + START_DEADLINE;
    while tokio::time::Instant::now() < deadline {
        if is_daemon_healthy(profile).await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    Err(ClientError::StartTimeout {
        profile: profile.to_string(),
        log: log_path.display().to_string(),
    })
}

/// Stop the daemon for a profile. Returns whether one was running.
///
/// Tries the `/stop` endpoint first, falls back to SIGTERM on the recorded
/// pid, then waits for the endpoint to go quiet and removes the record.
pub async fn stop_daemon(profile: &str) -> Result<bool, ClientError> {
    let Some(state) = read_state(profile) else {
        return Ok(false);
    };

    let stop_url = format!("{}/stop", state.base_url);
    let stopped_via_http = http_json(
        "POST",
        &stop_url,
        Some(&serde_json::json!({})),
        Duration::from_secs(3),
    )
    .await
    .is_ok();

    if !stopped_via_http {
        #[cfg(unix)]
        if let Ok(pid) = i32::try_from(state.pid) {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid),
                nix::sys::signal::Signal::SIGTERM,
            );
        }
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if http_json("GET", &format!("{}/healthz", state.base_url), None, HEALTH_TIMEOUT)
            .await
            .is_err()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    if let Ok(path) = state_file(profile) {
        DaemonStateRecord::remove(&path);
    }
    Ok(true)
}

/// Result of ensuring a named page exists.
#[derive(Debug, Clone)]
pub struct PageEndpoint {
    pub base_url: String,
    pub ws_endpoint: String,
    pub target_id: String,
}

/// Start the daemon if needed and create-or-focus the named page.
pub async fn ensure_page(
    profile: &str,
    headless: bool,
    page: &str,
) -> Result<PageEndpoint, ClientError> {
    start_daemon(profile, headless).await?;
    let base = daemon_base_url(profile)
        .ok_or_else(|| ClientError::Daemon("daemon state missing after start".into()))?;

    let url = format!("{base}/pages/{}", urlencode(page));
    let data = http_json(
        "POST",
        &url,
        Some(&serde_json::json!({})),
        Duration::from_secs(10),
    )
    .await?;
    expect_ok(&data)?;

    let ws_endpoint = data
        .get("wsEndpoint")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ClientError::Daemon("daemon did not return wsEndpoint".into()))?
        .to_string();
    let target_id = data
        .get("targetId")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ClientError::Daemon("daemon did not return targetId".into()))?
        .to_string();

    Ok(PageEndpoint {
        base_url: base,
        ws_endpoint,
        target_id,
    })
}

/// Fetch the daemon-side console buffer for a page, most recent first.
pub async fn console_entries(
    base: &str,
    page: &str,
    limit: usize,
) -> Result<Vec<ConsoleEntry>, ClientError> {
    let url = format!(
        "{base}/pages/{}/console?limit={limit}&levels=all",
        urlencode(page)
    );
    let data = http_json("GET", &url, None, Duration::from_secs(5)).await?;
    expect_ok(&data)?;
    let entries = data
        .get("entries")
        .cloned()
        .unwrap_or(Value::Array(vec![]));
    serde_json::from_value(entries).map_err(|e| ClientError::Daemon(format!("bad console payload: {e}")))
}

/// Percent-encode a page name for use in a path segment.
pub fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expect_ok_accepts_true() {
        assert!(expect_ok(&serde_json::json!({"ok": true})).is_ok());
    }

    #[test]
    fn expect_ok_carries_error_text() {
        let err = expect_ok(&serde_json::json!({"ok": false, "error": "no such page"}))
            .unwrap_err();
        assert!(err.to_string().contains("no such page"));
    }

    #[test]
    fn expect_ok_rejects_missing_flag() {
        assert!(expect_ok(&serde_json::json!({})).is_err());
    }

    #[test]
    fn urlencode_path_segment() {
        assert_eq!(urlencode("main"), "main");
        assert_eq!(urlencode("my page/2"), "my%20page%2F2");
    }

    #[test]
    fn missing_state_means_no_base_url() {
        std::env::set_var("XDG_STATE_HOME", "/tmp/devb-client-test-none");
        assert!(daemon_base_url("no-such-profile").is_none());
        std::env::remove_var("XDG_STATE_HOME");
    }
}
