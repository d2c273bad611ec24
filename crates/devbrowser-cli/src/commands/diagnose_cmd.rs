//! The `diagnose` command and the shared diagnose runner.

use anyhow::Context;
use chrono::Utc;

use devbrowser_cdp::{PageDriver, WaitState, WaitStrategy};
use devbrowser_diagnose::pipeline::{diagnose, DiagnoseOptions};
use devbrowser_diagnose::report::DiagnoseReport;
use devbrowser_types::run_context::{RunContext, RunOptions};
use devbrowser_types::ArtifactMode;

use crate::commands::{page::open_driver, Globals, EXIT_OK};
use crate::output::write_output;

/// Flags shared by `diagnose`, `assert`, and `loop`.
#[derive(Debug, Clone)]
pub struct DiagnoseArgs {
    pub url: String,
    pub page: String,
    pub wait: String,
    pub timeout_ms: u64,
    pub min_wait_ms: u64,
    pub snapshot_engine: String,
    pub net_bodies: bool,
    pub net_max_body_bytes: usize,
    pub perf_sample_ms: u64,
    pub perf_top_n: usize,
    pub artifact_mode: ArtifactMode,
    pub artifact_dir: String,
}

/// Outcome of one diagnose capture, with the driver still attached so
/// callers can run selector checks against the same page.
pub struct DiagnoseRun {
    pub driver: PageDriver,
    pub report: DiagnoseReport,
    pub run_id: String,
    pub run_dir: String,
}

pub async fn run_diagnose(globals: &Globals, args: &DiagnoseArgs) -> anyhow::Result<DiagnoseRun> {
    let wait_state = WaitState::parse(&args.wait)
        .with_context(|| format!("--wait must be load|domcontentloaded|networkidle|commit (got '{}')", args.wait))?;

    let (mut driver, base) = open_driver(globals, &args.page).await?;

    let ctx = RunContext::new(RunOptions {
        profile: globals.profile.clone(),
        artifact_root: Some(globals.artifact_root()?),
        run_id: String::new(),
        timestamp: Some(Utc::now()),
    });
    let run_dir = if args.artifact_mode == ArtifactMode::None {
        String::new()
    } else {
        let dir = ctx
            .resolve_run_dir(&args.artifact_dir)?
            .context("artifact root unavailable")?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating run dir {}", dir.display()))?;
        dir.display().to_string()
    };

    let options = DiagnoseOptions {
        url: args.url.clone(),
        wait_state,
        wait_strategy: WaitStrategy::Native,
        timeout_ms: args.timeout_ms,
        min_wait_ms: args.min_wait_ms,
        page_name: args.page.clone(),
        profile: globals.profile.clone(),
        run_id: ctx.run_id.clone(),
        timestamp: ctx.timestamp,
        artifact_dir: run_dir.clone(),
        artifacts: args.artifact_mode,
        snapshot_engine: args.snapshot_engine.clone(),
        net_bodies: args.net_bodies,
        net_max_body_bytes: args.net_max_body_bytes,
        perf_sample_ms: args.perf_sample_ms,
        perf_top_n: args.perf_top_n,
        daemon_base: Some(base),
    };

    let result = diagnose(&mut driver, options).await;
    match result {
        Ok(report) => Ok(DiagnoseRun {
            driver,
            report,
            run_id: ctx.run_id,
            run_dir,
        }),
        Err(e) => {
            let _ = driver.detach().await;
            Err(e.into())
        }
    }
}

/// `diagnose` is report-only: it always exits 0 once a report exists.
pub async fn diagnose_cmd(globals: &Globals, args: &DiagnoseArgs) -> anyhow::Result<u8> {
    let run = run_diagnose(globals, args).await?;
    let _ = run.driver.detach().await;

    let value = serde_json::to_value(&run.report)?;
    let out = write_output(
        &globals.artifact_root()?,
        &globals.output,
        &value,
        &globals.out_path,
    )?;
    println!("{out}");
    Ok(EXIT_OK)
}
