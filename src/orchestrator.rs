//! The six-stage build sequence.
//!
//! A run mounts the base image, copies its tree into a scratch workspace,
//! strips the base install images, mounts the payload image, substitutes its
//! install artifact, then authors a hybrid ISO from the workspace. Stages
//! execute in strict order; at most one image is attached at any moment, and
//! cleanup runs on every path to a terminal state.
//!
//! ```text
//! Idle -> Validating -> PreparingWorkspace -> ExtractingBase
//!      -> ExtractingPayload -> Authoring -> CleaningUp -> Succeeded
//! any stage --(error)--> CleaningUp -> Failed
//! ```

use anyhow::{anyhow, bail, Context, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use uuid::Uuid;

use crate::config::BuildConfig;
use crate::runlog::{LogStreamer, RunLog};
use crate::tools::{HostTools, ImageTools, MountPoint};
use crate::workspace::ScratchWorkspace;

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Image supplying the filesystem skeleton.
    pub base_image: PathBuf,
    /// Image supplying the install artifact.
    pub payload_image: PathBuf,
    /// Where the authored hybrid image goes.
    pub destination: PathBuf,
    pub config: BuildConfig,
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    PreparingWorkspace,
    ExtractingBase,
    ExtractingPayload,
    Authoring,
    CleaningUp,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validation",
            Stage::PreparingWorkspace => "workspace preparation",
            Stage::ExtractingBase => "base extraction",
            Stage::ExtractingPayload => "payload extraction",
            Stage::Authoring => "authoring",
            Stage::CleaningUp => "cleanup",
        };
        f.write_str(name)
    }
}

/// A failed run: which stage broke, and the underlying tool diagnostic.
#[derive(Debug)]
pub struct RunError {
    stage: Stage,
    source: anyhow::Error,
}

impl RunError {
    fn new(stage: Stage, source: anyhow::Error) -> Self {
        Self { stage, source }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {:#}", self.stage, self.source)
    }
}

impl std::error::Error for RunError {}

/// Execute one full run against the given tool implementation.
///
/// Writes progress to `log`, ending with either a success marker or a
/// `FAILED` line naming the stage. The scratch workspace named by `run_id`
/// is gone by the time this returns, whatever the outcome.
pub fn build_hybrid_image(
    request: &BuildRequest,
    tools: &dyn ImageTools,
    log: &mut RunLog,
    run_id: &str,
) -> Result<(), RunError> {
    log.line("------------------------------------------------");
    log.line("Starting creation process...");
    log.line(&format!("Base:    {}", request.base_image.display()));
    log.line(&format!("Payload: {}", request.payload_image.display()));
    log.line(&format!("Dest:    {}", request.destination.display()));
    log.line("------------------------------------------------");

    let outcome = run_stages(request, tools, log, run_id);

    match &outcome {
        Ok(()) => log.line("Success!"),
        Err(e) => log.line(&format!("FAILED ({}): {:#}", e.stage, e.source)),
    }
    outcome
}

fn run_stages(
    request: &BuildRequest,
    tools: &dyn ImageTools,
    log: &mut RunLog,
    run_id: &str,
) -> Result<(), RunError> {
    validate(request).map_err(|e| RunError::new(Stage::Validating, e))?;

    log.line("Creating scratch workspace...");
    let mut workspace = ScratchWorkspace::create_with_id(&request.config.scratch_base, run_id)
        .map_err(|e| RunError::new(Stage::PreparingWorkspace, e))?;

    let staged = stage_images(request, tools, log, &workspace);

    // Cleanup always runs before a terminal state is reported, and its own
    // failures never override the run's outcome.
    log.line("Cleaning up...");
    if let Err(e) = workspace.cleanup() {
        log.line(&format!("WARNING: cleanup failed: {e:#}"));
    }

    staged
}

/// Stages 3-5: everything that happens between workspace creation and
/// cleanup.
fn stage_images(
    request: &BuildRequest,
    tools: &dyn ImageTools,
    log: &mut RunLog,
    workspace: &ScratchWorkspace,
) -> Result<(), RunError> {
    extract_base(request, tools, log, workspace.path())
        .map_err(|e| RunError::new(Stage::ExtractingBase, e))?;

    extract_payload(request, tools, log, workspace.path())?;

    author(request, tools, log, workspace.path())
        .map_err(|e| RunError::new(Stage::Authoring, e))
}

fn validate(request: &BuildRequest) -> Result<()> {
    if request.base_image.as_os_str().is_empty() {
        bail!("no base image path given");
    }
    if request.payload_image.as_os_str().is_empty() {
        bail!("no payload image path given");
    }
    if request.destination.as_os_str().is_empty() {
        bail!("no destination path given");
    }

    if let Some(prefix) = &request.config.output_prefix {
        if !request.destination.starts_with(prefix) {
            bail!(
                "destination '{}' is outside the allowed output directory '{}'",
                request.destination.display(),
                prefix.display()
            );
        }
    }

    let parent = request
        .destination
        .parent()
        .ok_or_else(|| anyhow!("destination '{}' has no parent directory", request.destination.display()))?;
    if !parent.is_dir() {
        bail!(
            "destination directory '{}' does not exist",
            parent.display()
        );
    }
    let metadata = fs::metadata(parent)
        .with_context(|| format!("stat '{}'", parent.display()))?;
    if metadata.permissions().readonly() {
        bail!(
            "destination directory '{}' is not writable",
            parent.display()
        );
    }
    Ok(())
}

/// Stage 3: copy the base image's tree into the workspace and strip its
/// install artifacts, so the payload's artifact is the only one left by the
/// time authoring runs.
fn extract_base(
    request: &BuildRequest,
    tools: &dyn ImageTools,
    log: &mut RunLog,
    scratch: &Path,
) -> Result<()> {
    log.line("Mounting base image...");
    let mount = tools.attach(&request.base_image)?;
    log.line(&format!("Base mounted at: {}", mount.path().display()));

    let result = copy_and_strip_base(request, tools, log, &mount, scratch);

    log.line("Unmounting base image...");
    let detached = tools.detach(&mount);
    result?;
    detached
}

fn copy_and_strip_base(
    request: &BuildRequest,
    tools: &dyn ImageTools,
    log: &mut RunLog,
    mount: &MountPoint,
    scratch: &Path,
) -> Result<()> {
    log.line("Copying base files...");
    tools.copy_tree(mount.path(), scratch)?;
    tools.make_writable(scratch)?;

    // Unconditional: the authored image must carry the payload's install
    // artifact, never the base's, whichever container format the base used.
    log.line("Removing base install images...");
    for artifact in &request.config.stripped_artifacts {
        tools.remove_file(&scratch.join(artifact))?;
    }
    Ok(())
}

/// Stage 4: locate the payload's install artifact and substitute it into the
/// workspace at the same relative location.
fn extract_payload(
    request: &BuildRequest,
    tools: &dyn ImageTools,
    log: &mut RunLog,
    scratch: &Path,
) -> Result<(), RunError> {
    log.line("Mounting payload image...");
    let mount = tools
        .attach(&request.payload_image)
        .map_err(|e| RunError::new(Stage::ExtractingPayload, e))?;
    log.line(&format!("Payload mounted at: {}", mount.path().display()));

    let result = copy_payload_artifact(request, tools, log, &mount, scratch);

    log.line("Unmounting payload image...");
    let detached = tools
        .detach(&mount)
        .map_err(|e| RunError::new(Stage::ExtractingPayload, e));
    result?;
    detached
}

fn copy_payload_artifact(
    request: &BuildRequest,
    tools: &dyn ImageTools,
    log: &mut RunLog,
    mount: &MountPoint,
    scratch: &Path,
) -> Result<(), RunError> {
    log.line("Searching for install image in payload...");
    // First existing candidate wins; absence of all of them is fatal and
    // reported as its own condition, distinct from a mount failure.
    let found = request
        .config
        .payload_candidates
        .iter()
        .find(|candidate| mount.path().join(candidate.as_str()).is_file());

    let Some(candidate) = found else {
        return Err(RunError::new(
            Stage::ExtractingPayload,
            anyhow!(
                "no install image found in payload; tried: {}",
                request.config.payload_candidates.join(", ")
            ),
        ));
    };
    log.line(&format!("Found: {candidate}"));

    let src = mount.path().join(candidate);
    let dst = scratch.join(candidate);
    let stage_err = |e| RunError::new(Stage::ExtractingPayload, e);
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating '{}'", parent.display()))
            .map_err(stage_err)?;
    }
    log.line("Copying payload install image...");
    tools.copy_file(&src, &dst).map_err(stage_err)?;
    Ok(())
}

/// Stage 5: author the hybrid image. Any pre-existing destination file is
/// deleted first; a partial file left by a failed authoring attempt is
/// removed so a failed run leaves nothing at the destination.
fn author(
    request: &BuildRequest,
    tools: &dyn ImageTools,
    log: &mut RunLog,
    scratch: &Path,
) -> Result<()> {
    log.line("Creating hybrid image...");
    tools.remove_file(&request.destination)?;

    if let Err(e) = tools.make_hybrid(scratch, &request.destination, &request.config.volume_label)
    {
        let _ = tools.remove_file(&request.destination);
        return Err(e);
    }
    log.line(&format!("Wrote: {}", request.destination.display()));
    Ok(())
}

/// Handle to a run executing on a background thread.
///
/// The caller polls [`LogStreamer`] for progress and joins via
/// [`wait`](Self::wait) for the terminal state. One handle, one run; the
/// caller enforces single-flight by holding at most one live handle.
#[derive(Debug)]
pub struct RunHandle {
    thread: JoinHandle<Result<(), RunError>>,
    log_path: PathBuf,
}

/// Start a run on a background thread against the real host tools.
pub fn spawn_build(request: BuildRequest) -> Result<RunHandle> {
    let run_id = Uuid::new_v4().to_string();
    let mut log = RunLog::create(&request.config.scratch_base, &run_id)?;
    let log_path = log.path().to_path_buf();

    let thread = std::thread::spawn(move || {
        let tools = HostTools::new(&request.config.mount_root);
        build_hybrid_image(&request, &tools, &mut log, &run_id)
    });

    Ok(RunHandle { thread, log_path })
}

impl RunHandle {
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Open an incremental reader over this run's log.
    pub fn log_streamer(&self) -> Result<LogStreamer> {
        LogStreamer::open(&self.log_path)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Join the run and return its terminal state.
    pub fn wait(self) -> Result<()> {
        let outcome = self
            .thread
            .join()
            .map_err(|_| anyhow!("run thread panicked"))?;
        outcome?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(temp: &TempDir) -> BuildRequest {
        let config = BuildConfig {
            output_prefix: Some(temp.path().to_path_buf()),
            scratch_base: temp.path().to_path_buf(),
            ..BuildConfig::default()
        };
        BuildRequest {
            base_image: temp.path().join("base.iso"),
            payload_image: temp.path().join("payload.iso"),
            destination: temp.path().join("out.iso"),
            config,
        }
    }

    #[test]
    fn test_validate_accepts_destination_under_prefix() {
        let temp = TempDir::new().unwrap();
        assert!(validate(&request(&temp)).is_ok());
    }

    #[test]
    fn test_validate_rejects_destination_outside_prefix() {
        let temp = TempDir::new().unwrap();
        let mut req = request(&temp);
        req.destination = PathBuf::from("/somewhere/else/out.iso");

        let err = validate(&req).unwrap_err().to_string();
        assert!(err.contains("outside the allowed output directory"));
    }

    #[test]
    fn test_validate_rejects_empty_paths() {
        let temp = TempDir::new().unwrap();
        let mut req = request(&temp);
        req.base_image = PathBuf::new();
        assert!(validate(&req).is_err());
    }

    #[test]
    fn test_validate_rejects_unwritable_destination_directory() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let out_dir = temp.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();
        std::fs::set_permissions(&out_dir, std::fs::Permissions::from_mode(0o555)).unwrap();

        let mut req = request(&temp);
        req.destination = out_dir.join("out.iso");

        let err = validate(&req).unwrap_err().to_string();
        assert!(err.contains("is not writable"));

        std::fs::set_permissions(&out_dir, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_validate_rejects_missing_destination_directory() {
        let temp = TempDir::new().unwrap();
        let mut req = request(&temp);
        req.destination = temp.path().join("no-such-dir/out.iso");
        assert!(validate(&req).is_err());
    }

    #[test]
    fn test_stage_display_names() {
        assert_eq!(Stage::ExtractingPayload.to_string(), "payload extraction");
        assert_eq!(Stage::Authoring.to_string(), "authoring");
    }

    #[test]
    fn test_run_error_reports_stage_and_diagnostic() {
        let err = RunError::new(Stage::Authoring, anyhow!("disk full"));
        let text = err.to_string();
        assert!(text.contains("authoring failed"));
        assert!(text.contains("disk full"));
    }
}
