//! The diagnose pipeline: one browser interaction, one deterministic report.
//!
//! Navigation failure is fatal; every probe after it is best-effort and
//! leaves its report section empty, recorded under `diagnostics`.

use std::time::Duration;

use chrono::{DateTime, Utc};

use devbrowser_cdp::{CdpError, PageDriver, WaitState, WaitStrategy};
use devbrowser_types::paths::safe_artifact_path;
use devbrowser_types::ArtifactMode;

use crate::artifacts::write_diagnose_artifacts;
use crate::harness::{ensure_harness, read_harness_state};
use crate::netmon::{collect_network, NetworkMonitorOptions};
use crate::perf::{collect_perf, PerfOptions};
use crate::report::{DiagnoseMeta, DiagnoseReport};
use crate::snapshot::{get_snapshot, SnapshotOptions};

/// Options for one diagnose run. Zero values are defaulted.
#[derive(Debug, Clone)]
pub struct DiagnoseOptions {
    pub url: String,
    pub wait_state: WaitState,
    pub wait_strategy: WaitStrategy,
    pub timeout_ms: u64,
    pub min_wait_ms: u64,
    pub page_name: String,
    pub profile: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub artifact_dir: String,
    pub artifacts: ArtifactMode,
    pub snapshot_engine: String,
    pub net_bodies: bool,
    pub net_max_body_bytes: usize,
    pub perf_sample_ms: u64,
    pub perf_top_n: usize,
    /// Daemon HTTP base URL; when set, the console section is populated from
    /// the daemon-side buffer.
    pub daemon_base: Option<String>,
}

impl Default for DiagnoseOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            wait_state: WaitState::NetworkIdle,
            wait_strategy: WaitStrategy::Native,
            timeout_ms: 45_000,
            min_wait_ms: 250,
            page_name: "main".into(),
            profile: "default".into(),
            run_id: String::new(),
            timestamp: Utc::now(),
            artifact_dir: String::new(),
            artifacts: ArtifactMode::Minimal,
            snapshot_engine: "simple".into(),
            net_bodies: false,
            net_max_body_bytes: 32 * 1024,
            perf_sample_ms: 1200,
            perf_top_n: 20,
            daemon_base: None,
        }
    }
}

fn normalized(mut opts: DiagnoseOptions) -> DiagnoseOptions {
    if opts.page_name.trim().is_empty() {
        opts.page_name = "main".into();
    }
    if opts.profile.trim().is_empty() {
        opts.profile = "default".into();
    }
    if opts.run_id.trim().is_empty() {
        opts.run_id = devbrowser_types::new_run_id();
    }
    if opts.timeout_ms == 0 {
        opts.timeout_ms = 45_000;
    }
    if opts.snapshot_engine.trim().is_empty() {
        opts.snapshot_engine = "simple".into();
    }
    if opts.net_max_body_bytes == 0 {
        opts.net_max_body_bytes = 32 * 1024;
    }
    opts
}

/// Run the full diagnose capture against an attached page.
pub async fn diagnose(
    driver: &mut PageDriver,
    opts: DiagnoseOptions,
) -> Result<DiagnoseReport, CdpError> {
    let opts = normalized(opts);

    // 1. Navigate. Failure here is fatal: nothing else can be captured.
    if !opts.url.trim().is_empty() {
        driver
            .navigate(
                opts.url.trim(),
                WaitState::DomContentLoaded,
                Duration::from_millis(opts.timeout_ms),
            )
            .await?;
    }

    let mut report = DiagnoseReport {
        meta: DiagnoseMeta {
            url: String::new(),
            page: opts.page_name.clone(),
            profile: opts.profile.clone(),
            ts: opts
                .timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            run_id: opts.run_id.clone(),
            artifact_dir: opts.artifact_dir.clone(),
        },
        ..Default::default()
    };

    // The harness normally arrives via the daemon's document-init script;
    // installing here covers pages that predate the daemon restart.
    if let Err(e) = ensure_harness(driver).await {
        report.push_diagnostic("harness-install", e);
    }

    // 2-4. Network listeners + wait + collection.
    match collect_network(
        driver,
        NetworkMonitorOptions {
            wait_strategy: opts.wait_strategy,
            wait_state: opts.wait_state,
            timeout_ms: opts.timeout_ms,
            min_wait_ms: opts.min_wait_ms,
            include_bodies: opts.net_bodies,
            max_body_bytes: opts.net_max_body_bytes,
            include_headers: true,
            ..Default::default()
        },
    )
    .await
    {
        Ok(summary) => {
            report.network.total = summary.total;
            report.network.matched = summary.matched;
            report.network.entries = summary.entries;
        }
        Err(e) => report.push_diagnostic("network", e),
    }

    // 5. Perf probe.
    match collect_perf(
        driver,
        PerfOptions {
            sample_ms: opts.perf_sample_ms,
            top_n: opts.perf_top_n,
        },
    )
    .await
    {
        Ok(perf) => report.perf = Some(perf),
        Err(e) => report.push_diagnostic("perf", e),
    }

    // 6. Snapshot probe.
    match get_snapshot(
        driver,
        &SnapshotOptions {
            engine: opts.snapshot_engine.clone(),
            format: "list".into(),
            interactive_only: false,
            include_headings: true,
            max_items: 200,
            max_chars: 120_000,
        },
    )
    .await
    {
        Ok(snap) => {
            report.snapshot.engine = opts.snapshot_engine.clone();
            report.snapshot.yaml = snap.yaml;
            report.snapshot.items = snap.items;
        }
        Err(e) => {
            report.snapshot.engine = opts.snapshot_engine.clone();
            report.push_diagnostic("snapshot", e);
        }
    }

    // 7. Screenshot.
    if opts.artifacts != ArtifactMode::None && !opts.artifact_dir.trim().is_empty() {
        match screenshot_artifact(driver, &opts.artifact_dir).await {
            Ok(path) => report.artifacts.screenshot = path,
            Err(e) => report.push_diagnostic("screenshot", e),
        }
    }

    // 8. Harness state.
    match read_harness_state(driver).await {
        Ok(state) => report.harness.state = state,
        Err(e) => report.push_diagnostic("harness", e),
    }

    // 9. Console buffer from the daemon.
    if let Some(base) = &opts.daemon_base {
        match devbrowser_client::console_entries(base, &opts.page_name, 200).await {
            Ok(entries) => report.set_console(entries),
            Err(e) => report.push_diagnostic("console", e),
        }
    }

    report.meta.url = driver.current_url().await.unwrap_or_default();

    // 10-11. Merge events, compute summary, write artifacts.
    report.finalize();
    write_diagnose_artifacts(&mut report, opts.artifacts);

    Ok(report)
}

async fn screenshot_artifact(
    driver: &PageDriver,
    artifact_dir: &str,
) -> Result<String, CdpError> {
    let path = safe_artifact_path(
        std::path::Path::new(artifact_dir),
        "screenshot.png",
        "screenshot.png",
    )
    .map_err(|e| CdpError::Transport {
        detail: e.to_string(),
    })?;
    let png = driver.screenshot(true, None).await?;
    std::fs::write(&path, png).map_err(|e| CdpError::Transport {
        detail: format!("write screenshot: {e}"),
    })?;
    Ok(path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_normalized() {
        let opts = normalized(DiagnoseOptions {
            page_name: "  ".into(),
            profile: String::new(),
            timeout_ms: 0,
            snapshot_engine: String::new(),
            net_max_body_bytes: 0,
            ..Default::default()
        });
        assert_eq!(opts.page_name, "main");
        assert_eq!(opts.profile, "default");
        assert_eq!(opts.timeout_ms, 45_000);
        assert_eq!(opts.snapshot_engine, "simple");
        assert_eq!(opts.net_max_body_bytes, 32 * 1024);
        assert!(!opts.run_id.is_empty());
    }
}
