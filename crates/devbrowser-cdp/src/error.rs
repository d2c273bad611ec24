//! Error types for the devbrowser-cdp crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during browser operations.
#[derive(Debug, Error)]
pub enum CdpError {
    /// Failed to establish a WebSocket connection to the browser.
    #[error("failed to connect to DevTools at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// A CDP command returned an error response.
    #[error("CDP error {code}: {message}")]
    Protocol {
        code: i64,
        message: String,
        data: Option<String>,
    },

    /// A CDP command timed out waiting for a response.
    #[error("CDP command '{method}' timed out after {duration:?}")]
    CommandTimeout { method: String, duration: Duration },

    /// Malformed traffic or an unexpected message shape.
    #[error("CDP transport error: {detail}")]
    Transport { detail: String },

    /// Navigation failed (e.g. net::ERR_NAME_NOT_RESOLVED).
    #[error("navigation failed: {reason}")]
    NavigationFailed { reason: String },

    /// JavaScript evaluation threw in the page.
    #[error("JavaScript exception: {message}")]
    JsException { message: String },

    /// Waiting for a page state exceeded its deadline.
    #[error("wait for '{state}' timed out after {duration:?}")]
    WaitTimeout { state: String, duration: Duration },

    /// Could not find a Chromium binary to launch.
    #[error("no Chromium binary found; set DEV_BROWSER_CHROMIUM or install chromium/google-chrome")]
    BrowserNotFound,

    /// Launching or talking to the browser process failed.
    #[error("browser launch failed: {reason}")]
    LaunchFailed { reason: String },
}

impl CdpError {
    /// Whether this error represents a deadline breach.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CommandTimeout { .. } | Self::WaitTimeout { .. })
    }
}
