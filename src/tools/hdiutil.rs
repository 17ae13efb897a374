//! Parsing of `hdiutil attach` output.
//!
//! `hdiutil attach` prints a human-readable device table; the mount point is
//! whatever column happens to contain a `/Volumes/...` path. The format is
//! not contractually guaranteed, so the coupling is kept in this one place:
//! scan for the first line containing the configured mount root and take
//! everything from the mount root to the end of the line. When several lines
//! match (multi-partition images), the first listed wins.

use anyhow::{bail, Result};

/// Extract the assigned mount point from attach output.
pub fn parse_mount_point(output: &str, mount_root: &str) -> Result<String> {
    for line in output.lines() {
        if let Some(idx) = line.find(mount_root) {
            let mount_point = line[idx..].trim_end();
            if mount_point.len() > mount_root.len() {
                return Ok(mount_point.to_string());
            }
        }
    }
    bail!(
        "could not find a mount point under '{}' in attach output:\n{}",
        mount_root,
        output.trim_end()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_mount_point_from_device_table() {
        let output = "/dev/disk4          \tGUID_partition_scheme\n\
                      /dev/disk4s1        \tUDF                  \t/Volumes/CCCOMA_X64FRE_EN-US\n";
        let mp = parse_mount_point(output, "/Volumes/").unwrap();
        assert_eq!(mp, "/Volumes/CCCOMA_X64FRE_EN-US");
    }

    #[test]
    fn test_first_listed_mount_point_wins() {
        let output = "/dev/disk4s1\tUDF\t/Volumes/FIRST\n\
                      /dev/disk4s2\tISO9660\t/Volumes/SECOND\n";
        let mp = parse_mount_point(output, "/Volumes/").unwrap();
        assert_eq!(mp, "/Volumes/FIRST");
    }

    #[test]
    fn test_volume_names_with_spaces_survive() {
        let output = "/dev/disk5s1\tUDF\t/Volumes/Windows 11 Disc   \n";
        let mp = parse_mount_point(output, "/Volumes/").unwrap();
        assert_eq!(mp, "/Volumes/Windows 11 Disc");
    }

    #[test]
    fn test_unparsable_output_is_an_error() {
        let output = "/dev/disk4\tGUID_partition_scheme\n";
        let err = parse_mount_point(output, "/Volumes/").unwrap_err().to_string();
        assert!(err.contains("/Volumes/"));
    }

    #[test]
    fn test_bare_mount_root_does_not_count() {
        // A line ending exactly at the mount root names no volume.
        let output = "/dev/disk4s1\tUDF\t/Volumes/\n";
        assert!(parse_mount_point(output, "/Volumes/").is_err());
    }
}
