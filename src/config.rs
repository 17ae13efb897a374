//! Build configuration.
//!
//! Everything the orchestrator treats as policy rather than mechanism lives
//! here: which mount root the attach output is scanned for, which install
//! artifact names are recognized, and where output images are allowed to go.
//! Defaults match a stock macOS host; a TOML file can override any field.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Install artifact names recognized inside a payload image, in priority
/// order. First existing candidate wins.
pub const PAYLOAD_CANDIDATES: &[&str] = &["sources/install.wim", "sources/install.esd"];

/// Install artifact names stripped from the base copy, unconditionally.
pub const STRIPPED_ARTIFACTS: &[&str] = &["sources/install.wim", "sources/install.esd"];

const DEFAULT_MOUNT_ROOT: &str = "/Volumes/";
const DEFAULT_VOLUME_LABEL: &str = "Win11_BootCamp";

/// Policy knobs for one build.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Path prefix that identifies a mount point in attach output.
    pub mount_root: String,
    /// Payload artifact paths (relative to the mounted payload image),
    /// tried in order.
    pub payload_candidates: Vec<String>,
    /// Artifact paths removed from the base copy before authoring.
    pub stripped_artifacts: Vec<String>,
    /// Volume label for the authored image.
    pub volume_label: String,
    /// Output images must live under this directory. `None` disables the
    /// check (used by tests; the CLI always sets a prefix).
    pub output_prefix: Option<PathBuf>,
    /// Parent directory for per-run scratch workspaces and logs.
    pub scratch_base: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            mount_root: DEFAULT_MOUNT_ROOT.to_string(),
            payload_candidates: PAYLOAD_CANDIDATES.iter().map(|s| s.to_string()).collect(),
            stripped_artifacts: STRIPPED_ARTIFACTS.iter().map(|s| s.to_string()).collect(),
            volume_label: DEFAULT_VOLUME_LABEL.to_string(),
            output_prefix: dirs::home_dir(),
            scratch_base: std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    mount_root: Option<String>,
    payload_candidates: Option<Vec<String>>,
    stripped_artifacts: Option<Vec<String>>,
    volume_label: Option<String>,
    output_prefix: Option<PathBuf>,
    scratch_base: Option<PathBuf>,
}

impl BuildConfig {
    /// Load overrides from a TOML file on top of the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        let parsed: ConfigToml = toml::from_str(&text)
            .with_context(|| format!("parsing config '{}'", path.display()))?;

        let mut config = Self::default();
        if let Some(mount_root) = parsed.mount_root {
            if mount_root.trim().is_empty() {
                bail!("invalid config '{}': mount_root is empty", path.display());
            }
            config.mount_root = mount_root;
        }
        if let Some(candidates) = parsed.payload_candidates {
            if candidates.is_empty() {
                bail!(
                    "invalid config '{}': payload_candidates is empty",
                    path.display()
                );
            }
            config.payload_candidates = candidates;
        }
        if let Some(stripped) = parsed.stripped_artifacts {
            config.stripped_artifacts = stripped;
        }
        if let Some(label) = parsed.volume_label {
            config.volume_label = label;
        }
        if let Some(prefix) = parsed.output_prefix {
            config.output_prefix = Some(prefix);
        }
        if let Some(base) = parsed.scratch_base {
            config.scratch_base = base;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_known_artifact_names() {
        let config = BuildConfig::default();
        assert_eq!(
            config.payload_candidates,
            vec!["sources/install.wim", "sources/install.esd"]
        );
        assert_eq!(config.volume_label, "Win11_BootCamp");
        assert!(config.mount_root.starts_with("/Volumes"));
    }

    #[test]
    fn test_load_overrides_only_named_fields() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("wimswap.toml");
        fs::write(&path, "volume_label = \"WIN_CUSTOM\"\n").unwrap();

        let config = BuildConfig::load(&path).unwrap();
        assert_eq!(config.volume_label, "WIN_CUSTOM");
        // Untouched fields keep their defaults.
        assert_eq!(config.payload_candidates.len(), 2);
    }

    #[test]
    fn test_load_rejects_empty_candidate_list() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("wimswap.toml");
        fs::write(&path, "payload_candidates = []\n").unwrap();

        assert!(BuildConfig::load(&path).is_err());
    }

    #[test]
    fn test_load_rejects_unknown_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("wimswap.toml");
        fs::write(&path, "volume_labell = \"typo\"\n").unwrap();

        assert!(BuildConfig::load(&path).is_err());
    }
}
