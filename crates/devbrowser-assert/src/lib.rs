//! Declarative assert rules and their evaluator.
//!
//! [`parse_assert_rules`] turns a JSON string (or `@path` indirection) into
//! [`AssertRules`], rejecting unknown top-level fields. [`evaluate_assert`]
//! is a pure function from `(report, rules, selector counts, perf override)`
//! to an [`AssertResult`] whose `failed_checks` list is sorted by
//! `(id, message)` so identical inputs always produce identical output.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use devbrowser_diagnose::perf::{extract_float, perf_summary};
use devbrowser_diagnose::report::DiagnoseReport;
use devbrowser_types::ArtifactMode;

// ---------------------------------------------------------------------------
// Rule document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssertRules {
    #[serde(rename = "maxConsole", default, skip_serializing_if = "Option::is_none")]
    pub max_console: Option<BTreeMap<String, i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<AssertNetwork>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectors: Option<Vec<AssertSelector>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perf: Option<AssertPerf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssertNetwork {
    #[serde(rename = "maxFailed", default)]
    pub max_failed: i64,
    #[serde(rename = "maxStatus", default, skip_serializing_if = "Option::is_none")]
    pub max_status: Option<AssertStatusCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssertStatusCount {
    pub min: i64,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssertSelector {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssertPerf {
    #[serde(rename = "lcpMaxMs", default, skip_serializing_if = "Option::is_none")]
    pub lcp_max_ms: Option<f64>,
    #[serde(rename = "clsMax", default, skip_serializing_if = "Option::is_none")]
    pub cls_max: Option<f64>,
}

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("--rules is required")]
    Empty,

    #[error("--rules @path requires a non-empty path")]
    EmptyPath,

    #[error("failed to read rules file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid rules JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("selectors[{0}].selector is required")]
    EmptySelector(usize),
}

/// Parse a rule document. A leading `@` reads the rules from that path.
pub fn parse_assert_rules(raw: &str) -> Result<AssertRules, RulesError> {
    let mut raw = raw.trim().to_string();
    if raw.is_empty() {
        return Err(RulesError::Empty);
    }
    if let Some(path) = raw.strip_prefix('@') {
        let path = path.trim();
        if path.is_empty() {
            return Err(RulesError::EmptyPath);
        }
        raw = std::fs::read_to_string(path).map_err(|e| RulesError::ReadFile {
            path: path.to_string(),
            source: e,
        })?;
    }

    let mut rules: AssertRules = serde_json::from_str(&raw)?;
    if let Some(selectors) = rules.selectors.as_mut() {
        for (i, sel) in selectors.iter_mut().enumerate() {
            sel.selector = sel.selector.trim().to_string();
            if sel.selector.is_empty() {
                return Err(RulesError::EmptySelector(i));
            }
        }
    }
    Ok(rules)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedCheck {
    pub id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssertResult {
    pub passed: bool,
    #[serde(rename = "failedChecks")]
    pub failed_checks: Vec<FailedCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Evaluate rules against a report and pre-collected selector counts.
///
/// Pure: identical inputs yield identical output, bit for bit.
pub fn evaluate_assert(
    report: &DiagnoseReport,
    rules: &AssertRules,
    selector_counts: &HashMap<String, usize>,
    perf_override: Option<&Value>,
) -> AssertResult {
    let mut failed: Vec<FailedCheck> = Vec::new();

    // Context subset (stable fields only).
    let perf = perf_override.or(report.perf.as_ref());
    let mut context = serde_json::json!({
        "console": { "counts": report.console.counts },
        "network": { "matched": report.network.matched, "total": report.network.total },
    });
    if let Some(p) = perf {
        context["perf"] = perf_summary(p);
    }

    // maxConsole: iteration over a sorted key set for deterministic order.
    if let Some(max_console) = &rules.max_console {
        for (level, max) in max_console {
            let level_lc = level.to_lowercase();
            let count = match level_lc.as_str() {
                "error" | "errors" => Some(report.console.counts.error),
                "warning" | "warn" | "warnings" => Some(report.console.counts.warning),
                "info" => Some(report.console.counts.info),
                _ => None,
            };
            match count {
                Some(count) if (count as i64) > *max => failed.push(FailedCheck {
                    id: "console.max".into(),
                    message: format!("console {level_lc} count {count} > max {max}"),
                    context: Some(serde_json::json!({
                        "level": level_lc, "count": count, "max": max,
                    })),
                }),
                Some(_) => {}
                None => failed.push(FailedCheck {
                    id: "rules.maxConsole".into(),
                    message: format!("unknown console level '{level}'"),
                    context: None,
                }),
            }
        }
    }

    // network rules.
    if let Some(network) = &rules.network {
        let failed_count = report
            .network
            .entries
            .iter()
            .filter(|e| e.failed())
            .count() as i64;
        if failed_count > network.max_failed {
            failed.push(FailedCheck {
                id: "network.maxFailed".into(),
                message: format!(
                    "failed requests {failed_count} > max {}",
                    network.max_failed
                ),
                context: Some(serde_json::json!({
                    "failed": failed_count, "max": network.max_failed,
                })),
            });
        }
        if let Some(max_status) = &network.max_status {
            let count = report
                .network
                .entries
                .iter()
                .filter(|e| e.status >= max_status.min)
                .count() as i64;
            if count > max_status.count {
                failed.push(FailedCheck {
                    id: "network.maxStatus".into(),
                    message: format!(
                        "responses with status >= {}: {count} > max {}",
                        max_status.min, max_status.count
                    ),
                    context: Some(serde_json::json!({
                        "min": max_status.min, "count": count, "max": max_status.count,
                    })),
                });
            }
        }
    }

    // selector checks, in rule order.
    if let Some(selectors) = &rules.selectors {
        for sel in selectors {
            let count = selector_counts.get(&sel.selector).copied().unwrap_or(0) as i64;
            if let Some(min) = sel.min {
                if count < min {
                    failed.push(FailedCheck {
                        id: "selectors.min".into(),
                        message: format!("selector {:?} count {count} < min {min}", sel.selector),
                        context: Some(serde_json::json!({
                            "selector": sel.selector, "count": count, "min": min,
                        })),
                    });
                }
            }
            if let Some(max) = sel.max {
                if count > max {
                    failed.push(FailedCheck {
                        id: "selectors.max".into(),
                        message: format!("selector {:?} count {count} > max {max}", sel.selector),
                        context: Some(serde_json::json!({
                            "selector": sel.selector, "count": count, "max": max,
                        })),
                    });
                }
            }
        }
    }

    // perf checks (only when the metric is present).
    if let Some(perf_rules) = &rules.perf {
        if let (Some(max), Some(p)) = (perf_rules.lcp_max_ms, perf) {
            if let Some(lcp) = extract_float(p, &["cwv", "lcp"]) {
                if lcp > max {
                    failed.push(FailedCheck {
                        id: "perf.lcpMaxMs".into(),
                        message: format!("LCP {lcp:.1}ms > max {max:.1}ms"),
                        context: Some(serde_json::json!({ "lcpMs": lcp, "maxMs": max })),
                    });
                }
            }
        }
        if let (Some(max), Some(p)) = (perf_rules.cls_max, perf) {
            if let Some(cls) = extract_float(p, &["cwv", "cls"]) {
                if cls > max {
                    failed.push(FailedCheck {
                        id: "perf.clsMax".into(),
                        message: format!("CLS {cls:.3} > max {max:.3}"),
                        context: Some(serde_json::json!({ "cls": cls, "max": max })),
                    });
                }
            }
        }
    }

    failed.sort_by(|a, b| (&a.id, &a.message).cmp(&(&b.id, &b.message)));

    AssertResult {
        passed: failed.is_empty(),
        failed_checks: failed,
        context: Some(context),
    }
}

/// Attach evaluation context to failed selector checks: `evalError` is
/// deterministic and always allowed; a live-DOM `preview` reflects page
/// state and is only attached in `full` artifact mode.
pub fn attach_selector_failure_context(
    result: &mut AssertResult,
    mode: ArtifactMode,
    eval_errors: &HashMap<String, String>,
    previews: &HashMap<String, Value>,
) {
    for check in &mut result.failed_checks {
        if check.id != "selectors.min" && check.id != "selectors.max" {
            continue;
        }
        let Some(context) = check.context.as_mut() else {
            continue;
        };
        let Some(selector) = context
            .get("selector")
            .and_then(|v| v.as_str())
            .map(str::to_string)
        else {
            continue;
        };
        if let Some(err) = eval_errors.get(&selector) {
            context["evalError"] = Value::String(err.clone());
        }
        if mode == ArtifactMode::Full {
            if let Some(preview) = previews.get(&selector) {
                context["preview"] = preview.clone();
            }
        }
    }
}

/// Write `assert.json` into the run directory (skipped in `none` mode).
pub fn write_assert_artifacts(
    dir: &str,
    result: &AssertResult,
    mode: ArtifactMode,
) -> std::io::Result<Option<std::path::PathBuf>> {
    if mode == ArtifactMode::None || dir.trim().is_empty() {
        return Ok(None);
    }
    std::fs::create_dir_all(dir)?;
    let path = std::path::Path::new(dir).join("assert.json");
    let mut json = serde_json::to_string_pretty(result)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    json.push('\n');
    std::fs::write(&path, json)?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use devbrowser_types::NetworkEntry;

    fn report_with(
        errors: usize,
        entries: Vec<NetworkEntry>,
        perf: Option<Value>,
    ) -> DiagnoseReport {
        let mut report = DiagnoseReport::default();
        report.console.counts.error = errors;
        report.network.total = entries.len();
        report.network.matched = entries.len();
        report.network.entries = entries;
        report.perf = perf;
        report
    }

    fn net(status: i64) -> NetworkEntry {
        let mut e = NetworkEntry {
            url: "https://app.local/x".into(),
            method: "GET".into(),
            status,
            ..Default::default()
        };
        e.compute_ok();
        e
    }

    fn ids(result: &AssertResult) -> Vec<&str> {
        result.failed_checks.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn clean_pass() {
        // S1: everything within limits.
        let rules = parse_assert_rules(
            r##"{
                "maxConsole": {"error": 0},
                "network": {"maxFailed": 0, "maxStatus": {"min": 400, "count": 0}},
                "selectors": [{"selector": "#app-root", "min": 1}],
                "perf": {"lcpMaxMs": 2500, "clsMax": 0.1}
            }"##,
        )
        .unwrap();
        let report = report_with(
            0,
            vec![net(200)],
            Some(serde_json::json!({"cwv": {"lcp": 1200.0, "cls": 0.01}})),
        );
        let counts = HashMap::from([("#app-root".to_string(), 1usize)]);
        let result = evaluate_assert(&report, &rules, &counts, None);
        assert!(result.passed);
        assert!(result.failed_checks.is_empty());
    }

    #[test]
    fn console_and_network_failures_sorted() {
        // S2: two console errors plus a 500.
        let rules = parse_assert_rules(
            r##"{
                "maxConsole": {"error": 0},
                "network": {"maxFailed": 0, "maxStatus": {"min": 400, "count": 0}},
                "selectors": [{"selector": "#app-root", "min": 1}]
            }"##,
        )
        .unwrap();
        let report = report_with(2, vec![net(500)], None);
        let counts = HashMap::from([("#app-root".to_string(), 1usize)]);
        let result = evaluate_assert(&report, &rules, &counts, None);
        assert!(!result.passed);
        assert_eq!(
            ids(&result),
            vec!["console.max", "network.maxFailed", "network.maxStatus"]
        );
    }

    #[test]
    fn selector_min_violation_message() {
        // S3: .hero expected but absent.
        let rules = parse_assert_rules(r#"{"selectors": [{"selector": ".hero", "min": 1}]}"#)
            .unwrap();
        let report = report_with(0, vec![], None);
        let counts = HashMap::from([(".hero".to_string(), 0usize)]);
        let result = evaluate_assert(&report, &rules, &counts, None);
        assert_eq!(ids(&result), vec!["selectors.min"]);
        assert!(result.failed_checks[0].message.contains("< min 1"));
    }

    #[test]
    fn unknown_console_level_is_single_rules_failure() {
        let rules =
            parse_assert_rules(r#"{"maxConsole": {"fatal": 0}}"#).unwrap();
        let report = report_with(5, vec![], None);
        let result = evaluate_assert(&report, &rules, &HashMap::new(), None);
        assert_eq!(ids(&result), vec!["rules.maxConsole"]);
        assert!(result.failed_checks[0]
            .message
            .contains("unknown console level 'fatal'"));
    }

    #[test]
    fn status_zero_not_counted_by_max_status() {
        let rules = parse_assert_rules(
            r#"{"network": {"maxFailed": 5, "maxStatus": {"min": 400, "count": 0}}}"#,
        )
        .unwrap();
        let report = report_with(0, vec![net(0)], None);
        let result = evaluate_assert(&report, &rules, &HashMap::new(), None);
        assert!(result.passed, "status 0 must not count toward maxStatus");
    }

    #[test]
    fn perf_checks_only_when_metric_present() {
        let rules =
            parse_assert_rules(r#"{"perf": {"lcpMaxMs": 100, "clsMax": 0.01}}"#).unwrap();
        // No perf section at all: both checks are skipped.
        let report = report_with(0, vec![], None);
        assert!(evaluate_assert(&report, &rules, &HashMap::new(), None).passed);

        // Metrics over the limits.
        let report = report_with(
            0,
            vec![],
            Some(serde_json::json!({"cwv": {"lcp": 300.0, "cls": 0.5}})),
        );
        let result = evaluate_assert(&report, &rules, &HashMap::new(), None);
        assert_eq!(ids(&result), vec!["perf.clsMax", "perf.lcpMaxMs"]);
    }

    #[test]
    fn perf_override_wins() {
        let rules = parse_assert_rules(r#"{"perf": {"lcpMaxMs": 100}}"#).unwrap();
        let report = report_with(
            0,
            vec![],
            Some(serde_json::json!({"cwv": {"lcp": 5000.0}})),
        );
        let override_perf = serde_json::json!({"cwv": {"lcp": 50.0}});
        let result = evaluate_assert(&report, &rules, &HashMap::new(), Some(&override_perf));
        assert!(result.passed);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let rules = parse_assert_rules(
            r#"{"maxConsole": {"error": 0, "warning": 3}, "selectors": [{"selector": "a", "min": 2}]}"#,
        )
        .unwrap();
        let report = report_with(1, vec![net(404)], None);
        let counts = HashMap::from([("a".to_string(), 1usize)]);
        let a = evaluate_assert(&report, &rules, &counts, None);
        let b = evaluate_assert(&report, &rules, &counts, None);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn passed_iff_no_failed_checks() {
        let rules = parse_assert_rules(r#"{"maxConsole": {"error": 0}}"#).unwrap();
        for errors in [0usize, 1, 3] {
            let report = report_with(errors, vec![], None);
            let result = evaluate_assert(&report, &rules, &HashMap::new(), None);
            assert_eq!(result.passed, result.failed_checks.is_empty());
        }
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let err = parse_assert_rules(r#"{"maxConsol": {"error": 0}}"#).unwrap_err();
        assert!(matches!(err, RulesError::Parse(_)));
    }

    #[test]
    fn parse_trims_and_rejects_empty_selectors() {
        let rules =
            parse_assert_rules(r#"{"selectors": [{"selector": "  .hero  ", "min": 1}]}"#).unwrap();
        assert_eq!(rules.selectors.unwrap()[0].selector, ".hero");

        let err =
            parse_assert_rules(r#"{"selectors": [{"selector": "   ", "min": 1}]}"#).unwrap_err();
        assert!(err.to_string().contains("selectors[0].selector"));
    }

    #[test]
    fn parse_at_path_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("rules.json");
        std::fs::write(&path, r#"{"maxConsole": {"error": 2}}"#).unwrap();
        let rules = parse_assert_rules(&format!("@{}", path.display())).unwrap();
        assert_eq!(rules.max_console.unwrap()["error"], 2);

        assert!(matches!(
            parse_assert_rules("@  ").unwrap_err(),
            RulesError::EmptyPath
        ));
        assert!(matches!(parse_assert_rules("  ").unwrap_err(), RulesError::Empty));
    }

    #[test]
    fn rules_round_trip_preserves_semantics() {
        let rules = parse_assert_rules(
            r#"{
                "maxConsole": {"error": 0},
                "network": {"maxFailed": 1, "maxStatus": {"min": 500, "count": 2}},
                "selectors": [{"selector": ".x", "min": 1, "max": 4}],
                "perf": {"lcpMaxMs": 1000.5}
            }"#,
        )
        .unwrap();
        let serialized = serde_json::to_string(&rules).unwrap();
        let reparsed = parse_assert_rules(&serialized).unwrap();
        assert_eq!(rules, reparsed);
    }

    #[test]
    fn context_attachment_respects_artifact_mode() {
        let rules = parse_assert_rules(r#"{"selectors": [{"selector": ".x", "min": 1}]}"#)
            .unwrap();
        let report = report_with(0, vec![], None);
        let counts = HashMap::from([(".x".to_string(), 0usize)]);
        let eval_errors =
            HashMap::from([(".x".to_string(), "bad selector".to_string())]);
        let previews = HashMap::from([(
            ".x".to_string(),
            serde_json::json!([{"tag": "div"}]),
        )]);

        let mut minimal = evaluate_assert(&report, &rules, &counts, None);
        attach_selector_failure_context(
            &mut minimal,
            ArtifactMode::Minimal,
            &eval_errors,
            &previews,
        );
        let ctx = minimal.failed_checks[0].context.as_ref().unwrap();
        assert_eq!(ctx["evalError"], "bad selector");
        assert!(ctx.get("preview").is_none());

        let mut full = evaluate_assert(&report, &rules, &counts, None);
        attach_selector_failure_context(&mut full, ArtifactMode::Full, &eval_errors, &previews);
        let ctx = full.failed_checks[0].context.as_ref().unwrap();
        assert!(ctx.get("preview").is_some());
    }

    #[test]
    fn assert_artifact_written_outside_none_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let result = AssertResult {
            passed: true,
            failed_checks: vec![],
            context: None,
        };
        let dir = tmp.path().display().to_string();
        assert!(write_assert_artifacts(&dir, &result, ArtifactMode::None)
            .unwrap()
            .is_none());
        let path = write_assert_artifacts(&dir, &result, ArtifactMode::Minimal)
            .unwrap()
            .unwrap();
        assert!(path.is_file());
    }
}
