//! Browser window-size parsing.

use serde::{Deserialize, Serialize};

use crate::env::getenv_default;

/// Viewport/window size in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl WindowSize {
    pub const DEFAULT: WindowSize = WindowSize {
        width: 2500,
        height: 1920,
    };

    /// Parse `WxH` (also accepting `*` or `,` separators and a `px` suffix).
    pub fn parse(raw: &str) -> Result<Self, String> {
        let normalized = raw.trim().to_lowercase().replace("px", "");
        let mut parts = normalized
            .split(|c| c == 'x' || c == '*' || c == ',')
            .map(str::trim);
        let (w, h) = match (parts.next(), parts.next(), parts.next()) {
            (Some(w), Some(h), None) => (w, h),
            _ => return Err(window_size_err()),
        };
        let width: u32 = w.parse().map_err(|_| window_size_err())?;
        let height: u32 = h.parse().map_err(|_| window_size_err())?;
        if width == 0 || height == 0 {
            return Err("window size must be positive (e.g. 2500x1920)".to_string());
        }
        Ok(Self { width, height })
    }

    /// Resolve from an explicit flag value, `DEV_BROWSER_WINDOW_SIZE`, or the
    /// default, applying an optional scale factor.
    pub fn resolve(flag: &str, scale: f64) -> Result<Self, String> {
        let raw = if flag.trim().is_empty() {
            getenv_default("DEV_BROWSER_WINDOW_SIZE", "")
        } else {
            flag.trim().to_string()
        };
        let base = if raw.is_empty() {
            Self::DEFAULT
        } else {
            Self::parse(&raw)?
        };
        if !(0.1..=1.0).contains(&scale) {
            return Err("window scale must be between 0.1 and 1.0".to_string());
        }
        Ok(Self {
            width: ((base.width as f64) * scale).round().max(1.0) as u32,
            height: ((base.height as f64) * scale).round().max(1.0) as u32,
        })
    }
}

fn window_size_err() -> String {
    "window size must be WIDTHxHEIGHT (e.g. 2500x1920)".to_string()
}
