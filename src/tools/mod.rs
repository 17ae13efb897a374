//! External disk-image tool invocations.
//!
//! Every outbound operation the orchestrator performs against the host goes
//! through the [`ImageTools`] trait, one method per tool call, so the
//! orchestration sequence can be exercised in tests with canned results.
//! [`HostTools`] is the real implementation backed by `hdiutil` and `cp`.

pub mod hdiutil;

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// A mount point assigned by the host for one attached image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint(pub PathBuf);

impl MountPoint {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// One method per external operation; implementations either shell out to
/// the host tools or fake the call in tests.
pub trait ImageTools {
    /// Mount an image read-only and report its assigned mount point.
    fn attach(&self, image: &Path) -> Result<MountPoint>;

    /// Force-unmount a previously attached image.
    fn detach(&self, mount_point: &MountPoint) -> Result<()>;

    /// Recursively copy the contents of `src_dir` into `dst_dir`
    /// (contents, not the directory itself).
    fn copy_tree(&self, src_dir: &Path, dst_dir: &Path) -> Result<()>;

    /// Copy a single file.
    fn copy_file(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Make every entry under `dir` user-writable. Trees copied from
    /// optical media come back read-only.
    fn make_writable(&self, dir: &Path) -> Result<()>;

    /// Delete a file, tolerating its absence.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Author a hybrid ISO/Joliet/UDF image from a directory tree.
    fn make_hybrid(&self, tree: &Path, dest: &Path, volume_label: &str) -> Result<()>;
}

/// Real tool invocations against the host.
#[derive(Debug, Clone)]
pub struct HostTools {
    mount_root: String,
}

impl HostTools {
    pub fn new(mount_root: &str) -> Self {
        Self {
            mount_root: mount_root.to_string(),
        }
    }
}

/// Run a command to completion, capturing output; non-zero exit becomes an
/// error carrying the tool's stderr.
fn run_tool(mut cmd: Command, what: &str) -> Result<String> {
    let output = cmd
        .output()
        .with_context(|| format!("spawning {what}"))?;
    if !output.status.success() {
        bail!(
            "{} failed ({}): {}",
            what,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim_end()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

impl ImageTools for HostTools {
    fn attach(&self, image: &Path) -> Result<MountPoint> {
        let mut cmd = Command::new("hdiutil");
        cmd.args(["attach", "-noverify", "-nobrowse", "-readonly"])
            .arg(image);
        let stdout = run_tool(cmd, &format!("hdiutil attach '{}'", image.display()))?;
        let mount_point = hdiutil::parse_mount_point(&stdout, &self.mount_root)?;
        Ok(MountPoint(PathBuf::from(mount_point)))
    }

    fn detach(&self, mount_point: &MountPoint) -> Result<()> {
        let mut cmd = Command::new("hdiutil");
        cmd.arg("detach").arg(mount_point.path()).arg("-force");
        run_tool(
            cmd,
            &format!("hdiutil detach '{}'", mount_point.path().display()),
        )?;
        Ok(())
    }

    fn copy_tree(&self, src_dir: &Path, dst_dir: &Path) -> Result<()> {
        // Trailing slashes: copy contents-into-contents, BSD cp semantics.
        let mut cmd = Command::new("cp");
        cmd.arg("-R")
            .arg(format!("{}/", src_dir.display()))
            .arg(format!("{}/", dst_dir.display()));
        run_tool(
            cmd,
            &format!(
                "cp -R '{}' -> '{}'",
                src_dir.display(),
                dst_dir.display()
            ),
        )?;
        Ok(())
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> Result<()> {
        fs::copy(src, dst)
            .with_context(|| format!("copying '{}' -> '{}'", src.display(), dst.display()))?;
        Ok(())
    }

    fn make_writable(&self, dir: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        for entry in walkdir::WalkDir::new(dir) {
            let entry =
                entry.with_context(|| format!("walking '{}'", dir.display()))?;
            let metadata = entry
                .metadata()
                .with_context(|| format!("stat '{}'", entry.path().display()))?;
            let mode = metadata.permissions().mode();
            if mode & 0o200 == 0 {
                fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode | 0o200))
                    .with_context(|| {
                        format!("making '{}' writable", entry.path().display())
                    })?;
            }
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("removing '{}'", path.display()))
            }
        }
    }

    fn make_hybrid(&self, tree: &Path, dest: &Path, volume_label: &str) -> Result<()> {
        // -iso -joliet -udf keeps the image readable by both the firmware
        // and the Windows installer.
        let mut cmd = Command::new("hdiutil");
        cmd.arg("makehybrid")
            .arg("-o")
            .arg(dest)
            .arg(tree)
            .args(["-iso", "-joliet", "-udf", "-default-volume-name"])
            .arg(volume_label);
        run_tool(
            cmd,
            &format!("hdiutil makehybrid -o '{}'", dest.display()),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn host() -> HostTools {
        HostTools::new("/Volumes/")
    }

    #[test]
    fn test_remove_file_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        host()
            .remove_file(&temp.path().join("not-there.wim"))
            .unwrap();
    }

    #[test]
    fn test_remove_file_deletes_existing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("install.esd");
        fs::write(&path, "payload").unwrap();

        host().remove_file(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_make_writable_adds_user_write_bit() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let file = temp.path().join("readonly.txt");
        fs::write(&file, "x").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o444)).unwrap();

        host().make_writable(temp.path()).unwrap();

        let mode = fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o200, 0o200);
    }

    // BSD cp trailing-slash semantics; GNU cp treats the paths differently.
    #[cfg(target_os = "macos")]
    #[test]
    fn test_copy_tree_copies_contents() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(src.join("sources")).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("sources/boot.wim"), "boot").unwrap();

        host().copy_tree(&src, &dst).unwrap();
        assert_eq!(
            fs::read_to_string(dst.join("sources/boot.wim")).unwrap(),
            "boot"
        );
    }
}
