//! Embedded in-page scripts and the daemon version stamp.
//!
//! The harness and snapshot engine are self-contained scripts embedded at
//! build time. The daemon version stamp is derived from the harness bytes so
//! a changed harness forces a daemon restart.

use sha2::{Digest, Sha256};

/// In-page harness: console patching, error hooks, overlay detection.
pub const HARNESS_INIT_JS: &str = include_str!("../assets/harness_init.js");

/// In-page snapshot engine (`simple` and `aria`), ref selection, overlays.
pub const SNAPSHOT_JS: &str = include_str!("../assets/snapshot.js");

/// Sentinel global the harness installs; used for idempotence checks.
pub const HARNESS_SENTINEL: &str = "__devBrowser_getHarnessState";

/// Sentinel global the snapshot engine installs.
pub const SNAPSHOT_SENTINEL: &str = "__devBrowser_getAISnapshot";

/// Compatibility stamp used to decide whether an existing daemon can be
/// reused. Purely derived from the embedded harness bytes.
pub fn daemon_version() -> String {
    let sum = Sha256::digest(HARNESS_INIT_JS.as_bytes());
    format!("dev-browser-daemon/{}", hex::encode(&sum[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_shape() {
        let v = daemon_version();
        let hex_part = v.strip_prefix("dev-browser-daemon/").unwrap();
        assert_eq!(hex_part.len(), 16);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn version_is_stable() {
        assert_eq!(daemon_version(), daemon_version());
    }

    #[test]
    fn harness_exposes_contract_globals() {
        assert!(HARNESS_INIT_JS.contains("__devBrowser_getHarnessState"));
        assert!(HARNESS_INIT_JS.contains("__devBrowser_pushConsole"));
    }

    #[test]
    fn snapshot_exposes_contract_globals() {
        assert!(SNAPSHOT_JS.contains("__devBrowser_getAISnapshot"));
        assert!(SNAPSHOT_JS.contains("__devBrowser_selectSnapshotRef"));
        assert!(SNAPSHOT_JS.contains("__devBrowser_drawRefOverlay"));
    }
}
