//! CLI command handlers
//!
//! Each handler reports through [`Output`] and returns a semantic
//! [`ExitCode`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::ControlError;
use crate::cli::{DeviceEntry, ExitCode, Output, PlayResponse, PlayedEntry};
use crate::config::Config;
use crate::discovery::{DeviceRegistry, DiscoveryError};
use crate::models::Receiver;
use crate::stream::{PlaybackSession, SessionError};

// =============================================================================
// Devices
// =============================================================================

fn device_entry(receiver: &Receiver) -> DeviceEntry {
    DeviceEntry {
        name: receiver.name.clone(),
        address: receiver.address.to_string(),
        port: receiver.port,
    }
}

/// List every receiver seen within `window`
pub async fn list_cmd(registry: &DeviceRegistry, window: Duration, output: &Output) -> ExitCode {
    output.progress("Searching for AirPlay receivers...");

    let receivers = registry
        .watch(window, |r| output.progress(format!("   * {}", r.name)))
        .await;

    if receivers.is_empty() {
        return output.fail("No AirPlay receivers found", ExitCode::DeviceNotFound);
    }

    let entries: Vec<DeviceEntry> = receivers.iter().map(device_entry).collect();
    output.emit(&entries)
}

/// Print usage, then the receivers visible right now for reference
pub async fn usage_error(registry: &DeviceRegistry, window: Duration, output: &Output) -> ExitCode {
    output.usage("USAGE ERROR: Incorrect command line arguments");
    output.usage("Usage: airstream [OPTIONS] <DEVICE> <PATH>...");
    output.usage("Searching for valid device names (for your reference)... please wait...");

    registry
        .watch(window, |r| output.usage(format!("   * {}", r.name)))
        .await;

    ExitCode::InvalidArgs
}

// =============================================================================
// Play
// =============================================================================

/// Expand files and directories into the list of files to play.
///
/// Directories are walked recursively, entries in file name order.
pub fn collect_media_files(path: &Path) -> std::io::Result<Vec<PathBuf>> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();

    let mut files = Vec::new();
    for entry in entries {
        files.extend(collect_media_files(&entry)?);
    }
    Ok(files)
}

/// Exit code for a failed session
pub fn session_exit_code(error: &SessionError) -> ExitCode {
    match error {
        SessionError::Control(ControlError::BadStatus { .. }) => ExitCode::CastFailed,
        SessionError::Control(_) | SessionError::PollRetriesExhausted { .. } => {
            ExitCode::NetworkError
        }
        SessionError::Timeout(_) => ExitCode::CastFailed,
        SessionError::Io(_) | SessionError::Cancelled => ExitCode::Error,
    }
}

/// Find `device`, then play every file under `paths` on it in order
pub async fn play_cmd(
    device: &str,
    paths: &[PathBuf],
    registry: &DeviceRegistry,
    config: &Config,
    wait: Duration,
    cancel: CancellationToken,
    output: &Output,
) -> ExitCode {
    let mut files = Vec::new();
    for path in paths {
        match collect_media_files(path) {
            Ok(found) => files.extend(found),
            Err(e) => {
                return output.fail(
                    format!("Cannot read {}: {}", path.display(), e),
                    ExitCode::InvalidArgs,
                )
            }
        }
    }
    if files.is_empty() {
        return output.fail("No media files to play", ExitCode::InvalidArgs);
    }

    output.progress(format!("Looking for '{}'...", device));
    let found = tokio::select! {
        _ = cancel.cancelled() => return output.fail("Interrupted", ExitCode::Error),
        found = registry.wait_for_named(device, wait) => found,
    };
    let receiver = match found {
        Ok(receiver) => receiver,
        Err(e @ DiscoveryError::NotFound { .. }) => {
            return output.fail(e.to_string(), ExitCode::DeviceNotFound)
        }
        Err(e) => return output.fail(e.to_string(), ExitCode::NetworkError),
    };
    // Discovery is only needed to find the receiver.
    registry.shutdown().await;
    info!("Using receiver {}", receiver);

    let options = config.session_options();
    let mut played = Vec::with_capacity(files.len());

    for file in files {
        output.progress(format!("Playing {} on {}...", file.display(), receiver.name));

        let mut session = PlaybackSession::new(receiver.clone(), &file, options.clone())
            .with_cancellation(cancel.child_token());
        debug!("Session {} for {}", session.id(), file.display());

        match session.play().await {
            Ok(report) => {
                output.progress(&report);
                played.push(PlayedEntry {
                    file: report.file,
                    url: report.url,
                    polls: report.polls,
                });
            }
            Err(e) => {
                return output.fail(
                    format!("Playback of {} failed: {}", file.display(), e),
                    session_exit_code(&e),
                )
            }
        }
    }

    output.emit(PlayResponse {
        device: receiver.name.clone(),
        played,
    })
}
