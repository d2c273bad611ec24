//! The `assert` command: diagnose, evaluate rules, gate with exit code 2.

use std::collections::HashMap;

use serde_json::Value;

use devbrowser_assert::{
    attach_selector_failure_context, evaluate_assert, write_assert_artifacts, AssertResult,
    AssertRules,
};
use devbrowser_cdp::PageDriver;
use devbrowser_diagnose::selector::{
    count_selector, selector_preview, SelectorPreviewOptions,
};
use devbrowser_types::ArtifactMode;

use crate::commands::diagnose_cmd::{run_diagnose, DiagnoseArgs, DiagnoseRun};
use crate::commands::{Globals, EXIT_ASSERT_FAIL, EXIT_OK};
use crate::output::write_output;

/// Count every rule selector on the live page, keeping eval errors aside.
pub async fn collect_selector_counts(
    driver: &PageDriver,
    rules: &AssertRules,
) -> (HashMap<String, usize>, HashMap<String, String>) {
    let mut counts = HashMap::new();
    let mut eval_errors = HashMap::new();
    if let Some(selectors) = &rules.selectors {
        for sel in selectors {
            match count_selector(driver, &sel.selector).await {
                Ok(count) => {
                    counts.insert(sel.selector.clone(), count);
                }
                Err(e) => {
                    eval_errors.insert(sel.selector.clone(), e.to_string());
                    counts.insert(sel.selector.clone(), 0);
                }
            }
        }
    }
    (counts, eval_errors)
}

/// Evaluate rules against a fresh report, attach failure context, and write
/// the assert artifact.
pub async fn evaluate_against_page(
    run: &DiagnoseRun,
    rules: &AssertRules,
    mode: ArtifactMode,
) -> AssertResult {
    let (counts, eval_errors) = collect_selector_counts(&run.driver, rules).await;
    let mut result = evaluate_assert(&run.report, rules, &counts, None);

    // Previews reflect live DOM state and are only attached in full mode.
    let mut previews: HashMap<String, Value> = HashMap::new();
    if mode == ArtifactMode::Full {
        for check in &result.failed_checks {
            if check.id != "selectors.min" && check.id != "selectors.max" {
                continue;
            }
            let Some(selector) = check
                .context
                .as_ref()
                .and_then(|c| c.get("selector"))
                .and_then(|s| s.as_str())
            else {
                continue;
            };
            if let Ok(preview) = selector_preview(
                &run.driver,
                selector,
                SelectorPreviewOptions::default(),
            )
            .await
            {
                previews.insert(selector.to_string(), Value::Array(preview));
            }
        }
    }
    attach_selector_failure_context(&mut result, mode, &eval_errors, &previews);

    if let Err(e) = write_assert_artifacts(&run.run_dir, &result, mode) {
        tracing::warn!(error = %e, "failed to write assert artifacts");
    }
    result
}

pub async fn assert_cmd(
    globals: &Globals,
    args: &DiagnoseArgs,
    rules: &AssertRules,
) -> anyhow::Result<u8> {
    let run = run_diagnose(globals, args).await?;
    let result = evaluate_against_page(&run, rules, args.artifact_mode).await;
    let _ = run.driver.detach().await;

    let value = serde_json::to_value(&result)?;
    let out = write_output(
        &globals.artifact_root()?,
        &globals.output,
        &value,
        &globals.out_path,
    )?;
    println!("{out}");

    Ok(if result.passed { EXIT_OK } else { EXIT_ASSERT_FAIL })
}
