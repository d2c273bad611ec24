//! Artifact mode controlling what files a run materializes.

use serde::{Deserialize, Serialize};

/// What diagnose/assert/loop runs write to disk.
///
/// - `None`: nothing
/// - `Minimal`: `report.json` + screenshot (+ `assert.json` when assert ran)
/// - `Full`: minimal plus per-section `console.json`, `network.json`,
///   `snapshot.yaml`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactMode {
    None,
    #[default]
    Minimal,
    Full,
}

impl ArtifactMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Some(Self::None),
            "minimal" => Some(Self::Minimal),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Minimal => "minimal",
            Self::Full => "full",
        }
    }
}

impl std::fmt::Display for ArtifactMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        for mode in [ArtifactMode::None, ArtifactMode::Minimal, ArtifactMode::Full] {
            assert_eq!(ArtifactMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(ArtifactMode::parse("everything"), None);
    }
}
