//! The per-profile daemon state record.
//!
//! A single `daemon.json` under the profile's state directory advertises the
//! live daemon. Writes are atomic (temp file + rename); readers treat a
//! missing or unparsable file as "no daemon".

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discovery record for a running daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStateRecord {
    /// HTTP base URL of the daemon (e.g. `http://127.0.0.1:39181`).
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    /// Browser-level CDP WebSocket endpoint.
    #[serde(rename = "wsEndpoint")]
    pub ws_endpoint: String,
    /// Daemon process id.
    pub pid: u32,
    /// Version stamp derived from the embedded harness script.
    pub version: String,
    /// When the daemon started.
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
}

impl DaemonStateRecord {
    /// Atomically write the record (temp file + rename).
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        json.push('\n');
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)
    }

    /// Load the record; `None` for a missing or partial file.
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Remove the record, ignoring a missing file.
    pub fn remove(path: &Path) {
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DaemonStateRecord {
        DaemonStateRecord {
            base_url: "http://127.0.0.1:4000".into(),
            ws_endpoint: "ws://127.0.0.1:9222/devtools/browser/abc".into(),
            pid: 4242,
            version: "dev-browser-daemon/0011223344556677".into(),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn save_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("daemon.json");
        let rec = record();
        rec.save(&path).unwrap();
        let loaded = DaemonStateRecord::load(&path).unwrap();
        assert_eq!(loaded, rec);
    }

    #[test]
    fn partial_file_reads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("daemon.json");
        std::fs::write(&path, "{\"baseUrl\": \"http://127").unwrap();
        assert!(DaemonStateRecord::load(&path).is_none());
    }

    #[test]
    fn missing_file_reads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(DaemonStateRecord::load(&tmp.path().join("daemon.json")).is_none());
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("daemon.json");
        record().save(&path).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
