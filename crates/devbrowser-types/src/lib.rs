//! Shared types and determinism primitives for the dev-browser workspace.
//!
//! This crate holds everything the other crates agree on:
//!
//! - profile-scoped cache/state directory resolution and the safe
//!   artifact-path containment rule
//! - run contexts (UUID run ids, per-run artifact directories)
//! - the console/network entry types with their canonical sort orders
//! - bounded-size truncation helpers
//! - window-size parsing and small environment helpers
//!
//! Everything here is synchronous and side-effect free apart from the
//! filesystem helpers in [`paths`].

pub mod artifact;
pub mod console;
pub mod daemon_state;
pub mod env;
pub mod network;
pub mod paths;
pub mod run_context;
pub mod truncate;
pub mod window;

pub use artifact::ArtifactMode;
pub use console::{console_level_for_type, sort_console_entries, ConsoleEntry};
pub use daemon_state::DaemonStateRecord;
pub use network::{looks_binary, sort_network_entries, NetworkEntry};
pub use paths::{artifact_root, safe_artifact_path, state_dir, state_file, PathError};
pub use run_context::{default_run_artifact_dir, new_run_id, RunContext, RunOptions};
pub use truncate::{clamp_body, truncate_string_chars};
pub use window::WindowSize;
