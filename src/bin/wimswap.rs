use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use wimswap::{preflight, spawn_build, BuildConfig, BuildRequest};

/// How often newly appended log text is surfaced while a run is in flight.
const LOG_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn usage() -> &'static str {
    "Usage:\n  wimswap build <base.iso> <payload.iso> <output.iso> [--label NAME] [--config FILE]"
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [build, base, payload, dest, flags @ ..] if build == "build" => {
            let options = parse_flags(flags)?;
            run_build(
                PathBuf::from(base),
                PathBuf::from(payload),
                PathBuf::from(dest),
                options,
            )
        }
        _ => bail!(usage()),
    }
}

#[derive(Default)]
struct BuildFlags {
    label: Option<String>,
    config: Option<PathBuf>,
}

fn parse_flags(flags: &[String]) -> Result<BuildFlags> {
    let mut parsed = BuildFlags::default();
    let mut iter = flags.iter();
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--label" => match iter.next() {
                Some(value) => parsed.label = Some(value.clone()),
                None => bail!("--label requires a value\n{}", usage()),
            },
            "--config" => match iter.next() {
                Some(value) => parsed.config = Some(PathBuf::from(value)),
                None => bail!("--config requires a value\n{}", usage()),
            },
            other => bail!("unknown flag '{}'\n{}", other, usage()),
        }
    }
    Ok(parsed)
}

fn run_build(
    base_image: PathBuf,
    payload_image: PathBuf,
    destination: PathBuf,
    flags: BuildFlags,
) -> Result<()> {
    preflight::check_host_tools()?;

    let mut config = match &flags.config {
        Some(path) => BuildConfig::load(path)?,
        None => BuildConfig::default(),
    };
    if let Some(label) = flags.label {
        config.volume_label = label;
    }

    let request = BuildRequest {
        base_image,
        payload_image,
        destination: destination.clone(),
        config,
    };

    let handle = spawn_build(request)?;
    let mut stream = handle.log_streamer()?;
    let log_path = handle.log_path().to_path_buf();

    while !handle.is_finished() {
        if let Some(chunk) = stream.poll() {
            print!("{chunk}");
            let _ = std::io::stdout().flush();
        }
        std::thread::sleep(LOG_POLL_INTERVAL);
    }

    let outcome = handle.wait();
    if let Some(chunk) = stream.finish() {
        print!("{chunk}");
        let _ = std::io::stdout().flush();
    }
    // The log is a transient artifact; the run's scratch dir is already gone.
    let _ = fs::remove_file(&log_path);

    outcome?;
    println!("\nDONE! Saved to {}", destination.display());
    Ok(())
}
