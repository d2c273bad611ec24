//! Profile-scoped directory resolution and the safe artifact-path rule.
//!
//! Per profile, the layout is:
//!
//! ```text
//! <cache>/dev-browser/<profile>/artifacts/   -- run artifacts
//! <state>/dev-browser/<profile>/daemon.json  -- daemon state record
//! <state>/dev-browser/<profile>/chromium-profile/
//! ```
//!
//! `<cache>` honors `XDG_CACHE_HOME`, `<state>` honors `XDG_STATE_HOME`,
//! with platform fallbacks under the home directory.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::env::env_truthy;

const APP_SUBDIR: &str = "dev-browser";

/// Errors from path resolution and containment checks.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("could not determine home directory")]
    NoHome,

    #[error("Refusing to write outside artifact dir: {path} (allowed under {root}). Set DEV_BROWSER_ALLOW_UNSAFE_PATHS=1 to override.")]
    OutsideArtifactDir { path: String, root: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn home_dir() -> Result<PathBuf, PathError> {
    std::env::var("HOME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .map(PathBuf::from)
        .ok_or(PathError::NoHome)
}

/// Platform cache directory (`XDG_CACHE_HOME` or `~/.cache`, `~/Library/Caches` on macOS).
pub fn platform_cache_dir() -> Result<PathBuf, PathError> {
    if let Ok(dir) = std::env::var("XDG_CACHE_HOME") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = home_dir()?;
    if cfg!(target_os = "macos") {
        Ok(home.join("Library").join("Caches"))
    } else {
        Ok(home.join(".cache"))
    }
}

/// Platform state directory (`XDG_STATE_HOME` or `~/.local/state`,
/// `~/Library/Application Support` on macOS).
pub fn platform_state_dir() -> Result<PathBuf, PathError> {
    if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = home_dir()?;
    if cfg!(target_os = "macos") {
        Ok(home.join("Library").join("Application Support"))
    } else {
        Ok(home.join(".local").join("state"))
    }
}

/// Root directory for a profile's run artifacts.
pub fn artifact_root(profile: &str) -> Result<PathBuf, PathError> {
    Ok(platform_cache_dir()?.join(APP_SUBDIR).join(profile).join("artifacts"))
}

/// Per-profile state directory (daemon record, browser profile, logs).
pub fn state_dir(profile: &str) -> Result<PathBuf, PathError> {
    Ok(platform_state_dir()?.join(APP_SUBDIR).join(profile))
}

/// Path of the daemon state record for a profile.
pub fn state_file(profile: &str) -> Result<PathBuf, PathError> {
    Ok(state_dir(profile)?.join("daemon.json"))
}

/// Lexically normalize a path, resolving `.` and `..` components without
/// touching the filesystem (the target may not exist yet).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Resolve a user-supplied output path against the artifact directory,
/// refusing anything that escapes it unless `DEV_BROWSER_ALLOW_UNSAFE_PATHS`
/// is truthy.
///
/// An empty `path_arg` resolves to `<artifact_dir>/<default_name>`. Relative
/// paths resolve under `artifact_dir`. The parent directory of the result is
/// created.
pub fn safe_artifact_path(
    artifact_dir: &Path,
    path_arg: &str,
    default_name: &str,
) -> Result<PathBuf, PathError> {
    let allow_unsafe = env_truthy("DEV_BROWSER_ALLOW_UNSAFE_PATHS");

    if path_arg.trim().is_empty() {
        std::fs::create_dir_all(artifact_dir).map_err(|e| PathError::Io {
            path: artifact_dir.display().to_string(),
            source: e,
        })?;
        return Ok(artifact_dir.join(default_name));
    }

    let mut expanded = path_arg.trim().to_string();
    if let Some(rest) = expanded.strip_prefix("~") {
        if let Ok(home) = home_dir() {
            expanded = home
                .join(rest.trim_start_matches('/'))
                .display()
                .to_string();
        }
    }

    let raw = PathBuf::from(&expanded);
    let resolved = if raw.is_absolute() {
        normalize(&raw)
    } else {
        normalize(&artifact_dir.join(&raw))
    };

    if !allow_unsafe {
        let root = normalize(artifact_dir);
        if resolved != root && !resolved.starts_with(&root) {
            return Err(PathError::OutsideArtifactDir {
                path: resolved.display().to_string(),
                root: root.display().to_string(),
            });
        }
    }

    if let Some(parent) = resolved.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PathError::Io {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_name_lands_in_artifact_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let p = safe_artifact_path(tmp.path(), "", "shot.png").unwrap();
        assert_eq!(p, tmp.path().join("shot.png"));
    }

    #[test]
    fn relative_path_resolves_under_root() {
        let tmp = tempfile::tempdir().unwrap();
        let p = safe_artifact_path(tmp.path(), "sub/out.json", "x").unwrap();
        assert_eq!(p, tmp.path().join("sub").join("out.json"));
        assert!(p.parent().unwrap().is_dir());
    }

    #[test]
    fn escape_is_refused() {
        std::env::remove_var("DEV_BROWSER_ALLOW_UNSAFE_PATHS");
        let tmp = tempfile::tempdir().unwrap();
        let err = safe_artifact_path(tmp.path(), "../../etc/passwd", "x").unwrap_err();
        assert!(err
            .to_string()
            .contains("Refusing to write outside artifact dir"));
    }

    #[test]
    fn absolute_escape_is_refused() {
        std::env::remove_var("DEV_BROWSER_ALLOW_UNSAFE_PATHS");
        let tmp = tempfile::tempdir().unwrap();
        assert!(safe_artifact_path(tmp.path(), "/etc/passwd", "x").is_err());
    }

    #[test]
    fn dot_segments_inside_root_are_fine() {
        let tmp = tempfile::tempdir().unwrap();
        let p = safe_artifact_path(tmp.path(), "a/../b.json", "x").unwrap();
        assert_eq!(p, tmp.path().join("b.json"));
    }

    #[test]
    fn state_paths_are_profile_scoped() {
        std::env::set_var("XDG_STATE_HOME", "/tmp/devb-state-test");
        let f = state_file("p1").unwrap();
        assert_eq!(
            f,
            PathBuf::from("/tmp/devb-state-test/dev-browser/p1/daemon.json")
        );
        std::env::remove_var("XDG_STATE_HOME");
    }
}
