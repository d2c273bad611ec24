//! The per-profile browser session daemon.
//!
//! One daemon owns one browser instance and multiplexes named pages over it,
//! serving a local HTTP API for short-lived CLI invocations. Startup is
//! idempotent: when a healthy daemon with a matching version stamp already
//! advertises itself in the state record, a second start exits successfully
//! without touching it.

pub mod browser;
pub mod pages;
pub mod server;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use devbrowser_cdp::launch::{discover_ws_endpoint, find_chromium, launch_args, spawn_browser};
use devbrowser_cdp::{daemon_version, CdpClient, CdpError};
use devbrowser_types::paths::{artifact_root, state_dir, state_file, PathError};
use devbrowser_types::{DaemonStateRecord, WindowSize};

use crate::browser::{attach_page_pump, close_page_target, create_page_target, list_page_targets};
use crate::pages::{PageHandle, Pages};
use crate::server::Daemon;

/// Grace period for in-flight per-page calls during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("preflight failed: {0}")]
    Preflight(String),

    #[error("{0}")]
    Browser(#[from] CdpError),

    #[error("{0}")]
    Path(#[from] PathError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Daemon launch options; zero ports mean "pick a free one".
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub profile: String,
    pub host: String,
    pub port: u16,
    pub cdp_port: u16,
    pub headless: bool,
    pub state_file: Option<PathBuf>,
    pub window: WindowSize,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            profile: "default".into(),
            host: "127.0.0.1".into(),
            port: 0,
            cdp_port: 0,
            headless: true,
            state_file: None,
            window: WindowSize::DEFAULT,
        }
    }
}

fn free_port(host: &str) -> Result<u16, DaemonError> {
    let listener = std::net::TcpListener::bind((host, 0))
        .map_err(|e| DaemonError::Preflight(format!("cannot bind a local port on {host}: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| DaemonError::Preflight(e.to_string()))?
        .port();
    Ok(port)
}

/// Probe an existing record; `Some(true)` means a compatible daemon is live.
async fn probe_existing(record: &DaemonStateRecord) -> bool {
    let url = format!("{}/healthz", record.base_url);
    let client = reqwest::Client::new();
    let resp = client
        .get(&url)
        .timeout(Duration::from_millis(500))
        .send()
        .await;
    let Ok(resp) = resp else { return false };
    let Ok(body) = resp.json::<serde_json::Value>().await else {
        return false;
    };
    body.get("ok").and_then(|v| v.as_bool()) == Some(true)
        && body.get("version").and_then(|v| v.as_str()) == Some(daemon_version().as_str())
}

/// Run the daemon until `/stop` or SIGTERM. Returns when shut down cleanly,
/// or immediately when a healthy same-version daemon already serves this
/// profile.
pub async fn serve(opts: DaemonOptions) -> Result<(), DaemonError> {
    let profile = if opts.profile.trim().is_empty() {
        "default".to_string()
    } else {
        opts.profile.clone()
    };

    let state_path = match &opts.state_file {
        Some(p) => p.clone(),
        None => state_file(&profile)?,
    };

    // Idempotent start: reuse a healthy daemon, replace a stale one.
    if let Some(existing) = DaemonStateRecord::load(&state_path) {
        if probe_existing(&existing).await {
            tracing::info!(profile = %profile, base = %existing.base_url, "daemon already running");
            return Ok(());
        }
        tracing::info!(profile = %profile, "removing stale daemon state record");
        DaemonStateRecord::remove(&state_path);
    }

    let profile_dir = state_dir(&profile)?;
    std::fs::create_dir_all(&profile_dir)?;
    let user_data_dir = profile_dir.join("chromium-profile");
    std::fs::create_dir_all(&user_data_dir)?;

    let cdp_port = if opts.cdp_port != 0 {
        opts.cdp_port
    } else {
        free_port("127.0.0.1")?
    };

    // Launch the browser and complete the CDP handshake.
    let binary = find_chromium()?;
    let args = launch_args(cdp_port, &user_data_dir, opts.headless, opts.window);
    tracing::info!(browser = %binary.display(), cdp_port, "launching browser");
    let mut child = spawn_browser(&binary, &args).await?;
    let ws_endpoint = match discover_ws_endpoint(cdp_port, Duration::from_secs(20)).await {
        Ok(ws) => ws,
        Err(e) => {
            let _ = child.kill().await;
            return Err(e.into());
        }
    };
    let cdp = CdpClient::connect(&ws_endpoint).await?;

    // Register the default page: adopt the browser's initial tab when
    // present, otherwise create one.
    let pages = Pages::default();
    let initial = list_page_targets(&cdp).await?;
    let main_target = match initial.first() {
        Some((tid, _, _)) => tid.clone(),
        None => create_page_target(&cdp).await?,
    };
    let main_page = PageHandle::new("main".to_string(), main_target);
    attach_page_pump(&cdp, &main_page).await?;
    pages.insert(main_page).await;

    // Bind HTTP before writing the record so the advertised endpoint works.
    let listener = tokio::net::TcpListener::bind((opts.host.as_str(), opts.port))
        .await
        .map_err(|e| {
            DaemonError::Preflight(format!("cannot bind {}:{}: {e}", opts.host, opts.port))
        })?;
    let addr = listener
        .local_addr()
        .map_err(|e| DaemonError::Preflight(e.to_string()))?;
    let base_url = format!("http://{}:{}", opts.host, addr.port());

    let record = DaemonStateRecord {
        base_url: base_url.clone(),
        ws_endpoint: ws_endpoint.clone(),
        pid: std::process::id(),
        version: daemon_version(),
        started_at: chrono::Utc::now(),
    };
    record.save(&state_path)?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let daemon = Arc::new(Daemon {
        cdp: cdp.clone(),
        ws_endpoint,
        pages,
        artifact_root: artifact_root(&profile)?,
        shutdown: shutdown_tx.clone(),
        draining: AtomicBool::new(false),
        browser_alive: AtomicBool::new(true),
    });

    // Signal handling: SIGTERM and Ctrl-C both trigger the same drain.
    spawn_signal_task(shutdown_tx.clone());

    // Browser crash detection: if the child exits while we are not
    // draining, mark pages dead and shut down.
    let crash_daemon = Arc::clone(&daemon);
    let crash_tx = shutdown_tx.clone();
    let wait_handle = tokio::spawn(async move {
        let status = child.wait().await;
        crash_daemon.browser_alive.store(false, Ordering::SeqCst);
        if !crash_daemon.draining.load(Ordering::SeqCst) {
            tracing::error!(?status, "browser exited unexpectedly");
            let _ = crash_tx.send(true);
        }
        child
    });

    tracing::info!(profile = %profile, base = %base_url, "daemon serving");
    let app = server::router(Arc::clone(&daemon));
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
        })
        .await;
    if let Err(e) = serve_result {
        tracing::error!(error = %e, "http server error");
    }

    daemon.draining.store(true, Ordering::SeqCst);

    // Grace period: wait for per-page calls to finish.
    let grace_deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    for page in daemon.pages.list().await {
        let remaining = grace_deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        let _ = tokio::time::timeout(remaining, page.call_lock.lock()).await;
    }

    // Close pages, then the browser, then remove the record.
    let browser_alive = daemon.browser_alive.load(Ordering::SeqCst);
    for page in daemon.pages.drain().await {
        page.stop_pump();
        if browser_alive {
            close_page_target(&daemon.cdp, &page.target_id).await;
        }
    }
    if browser_alive {
        let _ = daemon
            .cdp
            .send_with_timeout(
                "Browser.close",
                serde_json::json!({}),
                Duration::from_secs(3),
            )
            .await;
    }
    if let Ok(Ok(mut child)) = tokio::time::timeout(Duration::from_secs(3), wait_handle).await {
        let _ = child.kill().await;
    }

    DaemonStateRecord::remove(&state_path);
    tracing::info!(profile = %profile, "daemon stopped");
    Ok(())
}

fn spawn_signal_task(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("termination signal received");
        let _ = shutdown.send(true);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_port_is_nonzero_and_bindable() {
        let port = free_port("127.0.0.1").unwrap();
        assert!(port > 0);
        // The port was released and can be bound again.
        std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
    }

    #[test]
    fn options_default_shape() {
        let opts = DaemonOptions::default();
        assert_eq!(opts.host, "127.0.0.1");
        assert_eq!(opts.port, 0);
        assert!(opts.headless);
    }
}
