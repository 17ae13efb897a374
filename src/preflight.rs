//! Preflight checks for build validation.
//!
//! Validates that the host has the required disk-image tools before a run
//! starts. This prevents cryptic mid-run errors after a source image has
//! already been attached.

use anyhow::{bail, Result};

/// Required host tools for building hybrid installer images.
///
/// Each tuple is (command_name, where_it_comes_from).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("hdiutil", "macOS DiskImages framework (preinstalled)"),
    ("cp", "coreutils (preinstalled)"),
];

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` listing every missing tool and its provenance
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let mut missing = Vec::new();

    for (tool, provenance) in tools {
        if !command_exists(tool) {
            missing.push((*tool, *provenance));
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} ({})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check that all tools in [`REQUIRED_TOOLS`] are available.
pub fn check_host_tools() -> Result<()> {
    check_required_tools(REQUIRED_TOOLS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("ls"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_success() {
        let tools = &[("ls", "coreutils"), ("cat", "coreutils")];
        assert!(check_required_tools(tools).is_ok());
    }

    #[test]
    fn test_check_required_tools_reports_all_missing() {
        let tools = &[
            ("nonexistent_command_xyz", "fake-package"),
            ("another_missing_tool_abc", "fake-package"),
        ];
        let err = check_required_tools(tools).unwrap_err().to_string();
        assert!(err.contains("nonexistent_command_xyz"));
        assert!(err.contains("another_missing_tool_abc"));
    }
}
