//! Chrome DevTools Protocol plumbing for dev-browser.
//!
//! Three layers:
//!
//! - [`client`]: WebSocket JSON-RPC client with command/response correlation
//!   and flat-session multiplexing (`Target.attachToTarget`).
//! - [`driver`]: [`PageDriver`] with navigation, evaluation, wait strategies,
//!   screenshots, and input dispatch over one attached session.
//! - [`launch`]: Chromium binary discovery, launch flags, and the
//!   `/json/version` endpoint handshake.
//!
//! The in-page assets (harness, snapshot engine) are embedded here so the
//! daemon version stamp in [`assets::daemon_version`] stays purely derived
//! from the bytes that actually run in the page.

pub mod assets;
pub mod client;
pub mod driver;
pub mod error;
pub mod launch;

pub use assets::{daemon_version, HARNESS_INIT_JS, SNAPSHOT_JS};
pub use client::{CdpClient, CdpEvent, CdpSession};
pub use driver::{ClipRect, PageDriver, WaitResult, WaitState, WaitStrategy};
pub use error::CdpError;
