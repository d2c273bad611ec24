//! Watch stamp for `loop --watch`.
//!
//! The stamp is the maximum modification time (nanoseconds) of any file
//! reachable under the watch paths, skipping build output and VCS noise.

use std::path::Path;
use std::time::UNIX_EPOCH;

const SKIP_DIRS: &[&str] = &[".git", "node_modules", "dist", "build"];

fn mtime_nanos(path: &Path) -> Option<i128> {
    let meta = std::fs::metadata(path).ok()?;
    let mtime = meta.modified().ok()?;
    Some(mtime.duration_since(UNIX_EPOCH).ok()?.as_nanos() as i128)
}

fn walk(dir: &Path, max: &mut i128) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if SKIP_DIRS.contains(&name.as_ref()) {
                continue;
            }
            walk(&path, max);
        } else if !name.starts_with('.') {
            if let Some(ts) = mtime_nanos(&path) {
                *max = (*max).max(ts);
            }
        }
    }
}

/// Compute the watch stamp over the given paths (files or directories).
pub fn watch_stamp(paths: &[String]) -> i128 {
    let mut max = 0i128;
    for raw in paths {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let path = Path::new(raw);
        let Ok(meta) = std::fs::metadata(path) else {
            continue;
        };
        if meta.is_dir() {
            walk(path, &mut max);
        } else if let Some(ts) = mtime_nanos(path) {
            max = max.max(ts);
        }
    }
    max
}
