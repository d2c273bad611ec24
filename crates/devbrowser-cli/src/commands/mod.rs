//! CLI command implementations.
//!
//! Each command is a thin orchestrator: talk to the daemon through
//! `devbrowser-client`, drive the page over CDP, render with the output
//! writer, and map failures to the process exit codes (0 success, 1 error,
//! 2 assert-fail, 3 timeout).

pub mod assert_cmd;
pub mod diagnose_cmd;
pub mod lifecycle;
pub mod loop_cmd;
pub mod page;

use std::path::PathBuf;

use devbrowser_cdp::CdpError;
use devbrowser_types::paths::artifact_root;
use devbrowser_types::WindowSize;

/// Exit codes used across commands.
pub const EXIT_OK: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_ASSERT_FAIL: u8 = 2;
pub const EXIT_TIMEOUT: u8 = 3;

/// Persistent flags resolved once in `main`.
#[derive(Debug, Clone)]
pub struct Globals {
    pub profile: String,
    pub headless: bool,
    pub output: String,
    pub out_path: String,
    pub window: WindowSize,
}

impl Globals {
    pub fn artifact_root(&self) -> anyhow::Result<PathBuf> {
        Ok(artifact_root(&self.profile)?)
    }
}

/// Map an error to the process exit code: deadline breaches are `3`,
/// everything else is `1`.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cdp) = cause.downcast_ref::<CdpError>() {
            if cdp.is_timeout() {
                return EXIT_TIMEOUT;
            }
        }
    }
    EXIT_ERROR
}

/// The wait phase a timeout occurred in, for `FAIL(timeout)` messages.
pub fn timeout_phase(err: &anyhow::Error) -> Option<&'static str> {
    for cause in err.chain() {
        match cause.downcast_ref::<CdpError>() {
            Some(CdpError::WaitTimeout { .. }) => return Some("wait"),
            Some(CdpError::CommandTimeout { .. }) => return Some("probe"),
            Some(CdpError::NavigationFailed { .. }) => return Some("nav"),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timeouts_map_to_exit_3() {
        let err = anyhow::Error::from(CdpError::WaitTimeout {
            state: "load".into(),
            duration: Duration::from_secs(1),
        });
        assert_eq!(exit_code_for(&err), EXIT_TIMEOUT);
        assert_eq!(timeout_phase(&err), Some("wait"));

        let err = anyhow::Error::from(CdpError::NavigationFailed {
            reason: "net::ERR_CONNECTION_REFUSED".into(),
        });
        assert_eq!(exit_code_for(&err), EXIT_ERROR);
        assert_eq!(timeout_phase(&err), Some("nav"));

        let err = anyhow::anyhow!("plain failure");
        assert_eq!(exit_code_for(&err), EXIT_ERROR);
        assert_eq!(timeout_phase(&err), None);
    }
}
