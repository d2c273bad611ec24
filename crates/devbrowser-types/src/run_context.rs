//! Run identifiers and per-run artifact directories.
//!
//! A run writes its artifacts under `<artifact_root>/run-<UTC ts>-<uuid8>/`.
//! Timestamps are always formatted in UTC so paths are stable across
//! machines and timezones.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::paths::{artifact_root, safe_artifact_path, PathError};

/// Options for constructing a [`RunContext`]. Empty fields are defaulted.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub profile: String,
    pub artifact_root: Option<PathBuf>,
    pub run_id: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Cross-command run metadata: profile, artifact root, run id, timestamp.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub profile: String,
    pub artifact_root: Option<PathBuf>,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Fresh UUIDv4 run id.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl RunContext {
    pub fn new(opts: RunOptions) -> Self {
        let profile = if opts.profile.trim().is_empty() {
            "default".to_string()
        } else {
            opts.profile
        };
        let root = opts
            .artifact_root
            .or_else(|| artifact_root(&profile).ok());
        let run_id = if opts.run_id.trim().is_empty() {
            new_run_id()
        } else {
            opts.run_id
        };
        Self {
            profile,
            artifact_root: root,
            run_id,
            timestamp: opts.timestamp.unwrap_or_else(Utc::now),
        }
    }

    pub fn from_profile(profile: &str) -> Self {
        Self::new(RunOptions {
            profile: profile.to_string(),
            ..Default::default()
        })
    }

    /// RFC 3339 timestamp for report metadata.
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// The default per-run artifact directory, or `None` without a root.
    pub fn default_run_dir(&self) -> Option<PathBuf> {
        self.artifact_root
            .as_deref()
            .map(|root| default_run_artifact_dir(root, &self.run_id, &self.timestamp))
    }

    /// Resolve a `--artifact-dir` style argument: empty means the default
    /// per-run directory, relative paths resolve under the artifact root.
    pub fn resolve_run_dir(&self, dir_arg: &str) -> Result<Option<PathBuf>, PathError> {
        let Some(root) = self.artifact_root.as_deref() else {
            return Ok(None);
        };
        if dir_arg.trim().is_empty() {
            return Ok(self.default_run_dir());
        }
        safe_artifact_path(root, dir_arg, "").map(Some)
    }
}

/// `run-<YYYYMMDDThhmmssZ>-<runId[:8]>` under `root`.
pub fn default_run_artifact_dir(root: &Path, run_id: &str, ts: &DateTime<Utc>) -> PathBuf {
    let stamp = ts.format("%Y%m%dT%H%M%SZ").to_string();
    let short: String = run_id.chars().take(8).collect();
    root.join(format!("run-{stamp}-{short}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_dir_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 7, 9, 11).unwrap();
        let dir = default_run_artifact_dir(
            Path::new("/tmp/root"),
            "0a1b2c3d-aaaa-bbbb-cccc-121212121212",
            &ts,
        );
        assert_eq!(dir, PathBuf::from("/tmp/root/run-20240305T070911Z-0a1b2c3d"));
    }

    #[test]
    fn defaults_fill_in() {
        let ctx = RunContext::new(RunOptions::default());
        assert_eq!(ctx.profile, "default");
        assert_eq!(ctx.run_id.len(), 36);
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(new_run_id(), new_run_id());
    }

    #[test]
    fn resolve_relative_dir_under_root() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(RunOptions {
            profile: "p".into(),
            artifact_root: Some(tmp.path().to_path_buf()),
            ..Default::default()
        });
        let dir = ctx.resolve_run_dir("nested/run").unwrap().unwrap();
        assert_eq!(dir, tmp.path().join("nested/run"));
    }
}
