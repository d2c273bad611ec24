//! Materialize report files under the run directory.
//!
//! Artifact files are written once per run and never mutated. The report's
//! `artifacts` section records the paths actually written.

use std::path::{Path, PathBuf};

use serde::Serialize;

use devbrowser_types::ArtifactMode;

use crate::report::DiagnoseReport;

fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> std::io::Result<PathBuf> {
    let path = dir.join(name);
    let mut json = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    json.push('\n');
    std::fs::write(&path, json)?;
    Ok(path)
}

/// Write the report files selected by `mode` into the report's artifact dir.
///
/// `minimal` writes `report.json`; `full` adds `console.json`,
/// `network.json`, and `snapshot.yaml`. Failures are best-effort: a section
/// that cannot be written is simply missing from `artifacts`.
pub fn write_diagnose_artifacts(report: &mut DiagnoseReport, mode: ArtifactMode) {
    if mode == ArtifactMode::None || report.meta.artifact_dir.trim().is_empty() {
        return;
    }
    let dir = PathBuf::from(&report.meta.artifact_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }

    if mode == ArtifactMode::Full {
        if let Ok(path) = write_json(&dir, "console.json", &report.console) {
            report.artifacts.console = path.display().to_string();
        }
        if let Ok(path) = write_json(&dir, "network.json", &report.network) {
            report.artifacts.network = path.display().to_string();
        }
        if !report.snapshot.yaml.trim().is_empty() {
            let path = dir.join("snapshot.yaml");
            if std::fs::write(&path, &report.snapshot.yaml).is_ok() {
                report.artifacts.snapshot = path.display().to_string();
            }
        }
    }

    // report.json last so it reflects the other artifact paths.
    if let Ok(path) = write_json(&dir, "report.json", report) {
        report.artifacts.report = path.display().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devbrowser_types::ConsoleEntry;

    fn report_in(dir: &Path) -> DiagnoseReport {
        let mut report = DiagnoseReport::default();
        report.meta.artifact_dir = dir.display().to_string();
        report.snapshot.yaml = "- [e1] button".into();
        report.set_console(vec![ConsoleEntry {
            id: 1,
            time_ms: 1,
            kind: "log".into(),
            text: "hello".into(),
            ..Default::default()
        }]);
        report
    }

    #[test]
    fn none_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut report = report_in(tmp.path());
        write_diagnose_artifacts(&mut report, ArtifactMode::None);
        assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
        assert!(report.artifacts.report.is_empty());
    }

    #[test]
    fn minimal_writes_report_only() {
        let tmp = tempfile::tempdir().unwrap();
        let mut report = report_in(tmp.path());
        write_diagnose_artifacts(&mut report, ArtifactMode::Minimal);
        assert!(tmp.path().join("report.json").is_file());
        assert!(!tmp.path().join("console.json").exists());
        assert!(!tmp.path().join("snapshot.yaml").exists());
        assert!(!report.artifacts.report.is_empty());
    }

    #[test]
    fn full_writes_sections() {
        let tmp = tempfile::tempdir().unwrap();
        let mut report = report_in(tmp.path());
        write_diagnose_artifacts(&mut report, ArtifactMode::Full);
        for name in ["report.json", "console.json", "network.json", "snapshot.yaml"] {
            assert!(tmp.path().join(name).is_file(), "{name} missing");
        }
        let report_json = std::fs::read_to_string(tmp.path().join("report.json")).unwrap();
        assert!(report_json.contains("console.json"));
    }
}
