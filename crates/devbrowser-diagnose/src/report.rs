//! The `DiagnoseReport` document and its derived summary.

use serde::Serialize;
use serde_json::Value;

use devbrowser_types::truncate::clamp_body;
use devbrowser_types::{
    console_level_for_type, sort_console_entries, sort_network_entries, ConsoleEntry, NetworkEntry,
};

use crate::events::{build_diagnose_events, DiagnoseEvent};

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnoseMeta {
    pub url: String,
    pub page: String,
    pub profile: String,
    pub ts: String,
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(rename = "artifactDir", skip_serializing_if = "String::is_empty")]
    pub artifact_dir: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsoleCounts {
    pub error: usize,
    pub warning: usize,
    pub info: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsoleSection {
    pub entries: Vec<ConsoleEntry>,
    pub counts: ConsoleCounts,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkSection {
    pub total: usize,
    pub matched: usize,
    pub entries: Vec<NetworkEntry>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotSection {
    pub engine: String,
    pub yaml: String,
    pub items: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HarnessSection {
    pub state: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportArtifacts {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub screenshot: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub snapshot: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub network: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub console: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub report: String,
}

/// Quick-look booleans derived from the populated sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiagnoseSummary {
    #[serde(rename = "hasConsoleErrors")]
    pub has_console_errors: bool,
    #[serde(rename = "hasHttp4xx5xx")]
    pub has_http_4xx_5xx: bool,
    #[serde(rename = "hasFailedRequests")]
    pub has_failed_requests: bool,
    #[serde(rename = "hasHarnessErrors")]
    pub has_harness_errors: bool,
    #[serde(rename = "harnessErrorCount")]
    pub harness_error_count: usize,
    #[serde(rename = "hasViteOverlay")]
    pub has_vite_overlay: bool,
    #[serde(rename = "viteOverlayText", skip_serializing_if = "String::is_empty")]
    pub vite_overlay_text: String,
    #[serde(rename = "viteOverlayTopLine", skip_serializing_if = "String::is_empty")]
    pub vite_overlay_top_line: String,
    #[serde(rename = "harnessErrorTopLine", skip_serializing_if = "String::is_empty")]
    pub harness_error_top_line: String,
}

/// Probe failures recorded without aborting the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub phase: String,
    pub error: String,
}

/// One deterministic capture of a page's runtime.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnoseReport {
    pub meta: DiagnoseMeta,
    pub console: ConsoleSection,
    pub network: NetworkSection,
    pub perf: Option<Value>,
    pub snapshot: SnapshotSection,
    pub harness: HarnessSection,
    pub events: Vec<DiagnoseEvent>,
    pub artifacts: ReportArtifacts,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
    pub summary: DiagnoseSummary,
}

/// First non-empty line of a block of text.
pub fn first_non_empty_line(s: &str) -> String {
    s.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_string()
}

impl DiagnoseReport {
    /// Populate the console section from daemon-buffered entries: sort,
    /// clamp, count by level, then rebuild events and summary.
    pub fn set_console(&mut self, mut entries: Vec<ConsoleEntry>) {
        sort_console_entries(&mut entries);
        for e in &mut entries {
            let (text, _, _) = clamp_body(&e.text, 4096);
            e.text = text;
            let (url, _, _) = clamp_body(&e.url, 1024);
            e.url = url;
        }

        let mut counts = ConsoleCounts::default();
        for e in &entries {
            match console_level_for_type(&e.kind) {
                "error" => counts.error += 1,
                "warning" => counts.warning += 1,
                _ => counts.info += 1,
            }
        }
        self.console = ConsoleSection { entries, counts };
        self.rebuild_events();
        self.compute_summary();
    }

    /// Sort network entries and rebuild the merged timeline.
    pub fn finalize(&mut self) {
        sort_network_entries(&mut self.network.entries);
        self.rebuild_events();
        self.compute_summary();
    }

    fn rebuild_events(&mut self) {
        self.events = build_diagnose_events(
            &self.console.entries,
            &self.network.entries,
            self.harness.state.as_ref(),
        );
    }

    pub fn compute_summary(&mut self) {
        let has_console_errors = self.console.counts.error > 0;

        let mut has_4xx_5xx = false;
        let mut has_failed = false;
        for e in &self.network.entries {
            if e.status >= 400 {
                has_4xx_5xx = true;
            }
            if e.failed() {
                has_failed = true;
            }
        }

        let mut harness_error_count = 0;
        let mut has_vite_overlay = false;
        let mut vite_overlay_text = String::new();
        let mut harness_error_top_line = String::new();
        if let Some(state) = &self.harness.state {
            if let Some(errors) = state.get("errors").and_then(|v| v.as_array()) {
                harness_error_count = errors.len();
                if let Some(last) = errors.last() {
                    let msg = last.get("message").and_then(|v| v.as_str()).unwrap_or("");
                    harness_error_top_line = first_non_empty_line(msg);
                }
            }
            if let Some(overlays) = state.get("overlays").and_then(|v| v.as_array()) {
                if let Some(last) = overlays.last() {
                    has_vite_overlay = true;
                    if let Some(text) = last.get("text").and_then(|v| v.as_str()) {
                        vite_overlay_text = text.trim().to_string();
                    }
                }
            }
        }
        if !vite_overlay_text.is_empty() {
            let (clamped, _, _) = clamp_body(&vite_overlay_text, 800);
            vite_overlay_text = clamped;
        }
        let vite_overlay_top_line = first_non_empty_line(&vite_overlay_text);

        self.summary = DiagnoseSummary {
            has_console_errors,
            has_http_4xx_5xx: has_4xx_5xx,
            has_failed_requests: has_failed,
            has_harness_errors: harness_error_count > 0,
            harness_error_count,
            has_vite_overlay,
            vite_overlay_text,
            vite_overlay_top_line,
            harness_error_top_line,
        };
    }

    /// Record a non-fatal probe failure.
    pub fn push_diagnostic(&mut self, phase: &str, error: impl std::fmt::Display) {
        tracing::warn!(phase, error = %error, "probe failed; section left empty");
        self.diagnostics.push(Diagnostic {
            phase: phase.to_string(),
            error: error.to_string(),
        });
    }
}
