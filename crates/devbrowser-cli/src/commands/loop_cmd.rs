//! The `loop` command: single-shot or watch-polling diagnose+assert driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use devbrowser_assert::{AssertResult, AssertRules};
use devbrowser_diagnose::report::DiagnoseSummary;

use crate::commands::assert_cmd::evaluate_against_page;
use crate::commands::diagnose_cmd::{run_diagnose, DiagnoseArgs};
use crate::commands::{timeout_phase, Globals, EXIT_ASSERT_FAIL, EXIT_OK, EXIT_TIMEOUT};
use crate::output::write_output;
use crate::watch::watch_stamp;

#[derive(Debug, Clone, Serialize)]
pub struct LoopOutput {
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(rename = "artifactDir", skip_serializing_if = "String::is_empty")]
    pub artifact_dir: String,
    pub summary: DiagnoseSummary,
    pub assert: AssertResult,
}

/// Pick the first applicable failure reason for the summary line.
pub fn fail_reason(summary: &DiagnoseSummary) -> &'static str {
    if summary.has_vite_overlay {
        "vite-overlay"
    } else if summary.has_harness_errors {
        "harness-error"
    } else if summary.has_console_errors {
        "console-error"
    } else if summary.has_failed_requests {
        "network-failed"
    } else if summary.has_http_4xx_5xx {
        "network-4xx5xx"
    } else {
        "failed"
    }
}

fn print_loop_output(globals: &Globals, out: &LoopOutput) -> anyhow::Result<()> {
    match globals.output.as_str() {
        "summary" => {
            if out.assert.passed {
                println!("PASS runId={}", out.run_id);
            } else {
                println!(
                    "FAIL({}) runId={} checks={}",
                    fail_reason(&out.summary),
                    out.run_id,
                    out.assert.failed_checks.len()
                );
                if !out.summary.vite_overlay_top_line.is_empty() {
                    println!("vite: {}", out.summary.vite_overlay_top_line);
                }
                if !out.summary.harness_error_top_line.is_empty() {
                    println!("error: {}", out.summary.harness_error_top_line);
                }
            }
            Ok(())
        }
        _ => {
            let value = serde_json::to_value(out)?;
            let text = write_output(
                &globals.artifact_root()?,
                &globals.output,
                &value,
                &globals.out_path,
            )?;
            println!("{text}");
            Ok(())
        }
    }
}

pub struct LoopArgs {
    pub watch: bool,
    pub watch_interval_ms: u64,
    pub watch_paths: Vec<String>,
}

pub async fn loop_cmd(
    globals: &Globals,
    diagnose_args: &DiagnoseArgs,
    rules: &AssertRules,
    loop_args: &LoopArgs,
) -> anyhow::Result<u8> {
    let mut watch_paths: Vec<String> = loop_args
        .watch_paths
        .iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if loop_args.watch && watch_paths.is_empty() {
        watch_paths.push(".".to_string());
    }
    let interval = Duration::from_millis(loop_args.watch_interval_ms.max(1));

    // SIGINT finishes the current run instead of aborting it.
    let interrupted = Arc::new(AtomicBool::new(false));
    if loop_args.watch {
        let flag = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                flag.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut last_stamp = if loop_args.watch {
        watch_stamp(&watch_paths)
    } else {
        0
    };

    loop {
        let outcome = run_once(globals, diagnose_args, rules).await;
        let out = match outcome {
            Ok(out) => out,
            Err(e) => {
                if timeout_exit(&e) {
                    if globals.output == "summary" {
                        let phase = timeout_phase(&e).unwrap_or("wait");
                        println!("FAIL(timeout) phase={phase}");
                    }
                    return Ok(EXIT_TIMEOUT);
                }
                return Err(e);
            }
        };
        print_loop_output(globals, &out)?;

        if !loop_args.watch {
            return Ok(if out.assert.passed {
                EXIT_OK
            } else {
                EXIT_ASSERT_FAIL
            });
        }
        if interrupted.load(Ordering::SeqCst) {
            return Ok(EXIT_OK);
        }

        // Wait for the watch stamp to advance.
        loop {
            tokio::time::sleep(interval).await;
            if interrupted.load(Ordering::SeqCst) {
                return Ok(EXIT_OK);
            }
            let stamp = watch_stamp(&watch_paths);
            if stamp != last_stamp {
                last_stamp = stamp;
                break;
            }
        }
    }
}

fn timeout_exit(err: &anyhow::Error) -> bool {
    crate::commands::exit_code_for(err) == EXIT_TIMEOUT
}

async fn run_once(
    globals: &Globals,
    diagnose_args: &DiagnoseArgs,
    rules: &AssertRules,
) -> anyhow::Result<LoopOutput> {
    let run = run_diagnose(globals, diagnose_args).await?;
    let result = evaluate_against_page(&run, rules, diagnose_args.artifact_mode).await;
    let summary = run.report.summary.clone();
    let _ = run.driver.detach().await;
    Ok(LoopOutput {
        run_id: run.run_id,
        artifact_dir: run.run_dir,
        summary,
        assert: result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> DiagnoseSummary {
        DiagnoseSummary::default()
    }

    #[test]
    fn fail_reason_priority() {
        let mut s = summary();
        s.has_http_4xx_5xx = true;
        assert_eq!(fail_reason(&s), "network-4xx5xx");
        s.has_failed_requests = true;
        assert_eq!(fail_reason(&s), "network-failed");
        s.has_console_errors = true;
        assert_eq!(fail_reason(&s), "console-error");
        s.has_harness_errors = true;
        assert_eq!(fail_reason(&s), "harness-error");
        s.has_vite_overlay = true;
        assert_eq!(fail_reason(&s), "vite-overlay");
        assert_eq!(fail_reason(&summary()), "failed");
    }
}
