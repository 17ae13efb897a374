//! Builds a hybrid Windows installer ISO from two source ISOs.
//!
//! One image (the *base*) supplies the filesystem skeleton; the other (the
//! *payload*) supplies the install artifact (`install.wim` or
//! `install.esd`). The result is a single hybrid ISO/Joliet/UDF image
//! suitable for BootCamp-style installation tooling.
//!
//! # Architecture
//!
//! ```text
//! orchestrator  - the six-stage build sequence and its state machine
//! tools         - external tool boundary (hdiutil, cp); mockable in tests
//! workspace     - per-run scratch directory with guaranteed removal
//! runlog        - append-only run log + polling reader for the caller
//! config        - policy: artifact names, mount root, output prefix
//! preflight     - host tool validation before a run starts
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use wimswap::{spawn_build, BuildConfig, BuildRequest};
//!
//! let request = BuildRequest {
//!     base_image: "Win10.iso".into(),
//!     payload_image: "Win11.iso".into(),
//!     destination: home.join("Win11_BootCamp.iso"),
//!     config: BuildConfig::default(),
//! };
//! let handle = spawn_build(request)?;
//! let mut stream = handle.log_streamer()?;
//! // ...poll `stream` while the run proceeds...
//! handle.wait()?;
//! ```

pub mod config;
pub mod orchestrator;
pub mod preflight;
pub mod runlog;
pub mod tools;
pub mod workspace;

pub use config::BuildConfig;
pub use orchestrator::{build_hybrid_image, spawn_build, BuildRequest, RunError, RunHandle, Stage};
pub use runlog::{LogStreamer, RunLog};
pub use tools::{HostTools, ImageTools, MountPoint};
pub use workspace::ScratchWorkspace;
