//! CLI - Command Line Interface for airstream
//!
//! Every action prints JSON-parseable output when `--json` is set or stdout
//! is not a terminal.
//!
//! # Examples
//!
//! ```bash
//! # Play a file, waiting up to 3 seconds for the device to show up
//! airstream "Living Room" ~/Music/StairwayToHeaven.mp3
//!
//! # Play a whole album directory
//! airstream "Living Room" ~/Music/Album/
//!
//! # List receivers visible on the network
//! airstream --list
//! ```

use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::path::PathBuf;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes for CLI operations (semantic for scripting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid arguments
    InvalidArgs = 2,
    /// Network error
    NetworkError = 3,
    /// Device not found
    DeviceNotFound = 4,
    /// Cast failed
    CastFailed = 6,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// airstream - play local media on AirPlay receivers
#[derive(Parser, Debug)]
#[command(
    name = "airstream",
    version,
    author = "Gorka & Hermes",
    about = "Play local media files on AirPlay receivers",
    long_about = "Finds an AirPlay receiver by name on the local network, serves \
                  each file to it over a temporary HTTP server and waits until \
                  playback finishes.\n\n\
                  Directories are played recursively in name order.",
    after_help = "EXAMPLES:\n\
                  airstream \"Living Room\" song.mp3     Play one file\n\
                  airstream \"Living Room\" ~/Music/Album Play a directory\n\
                  airstream --list                     List visible receivers"
)]
pub struct Cli {
    /// Output format as JSON (default for non-TTY)
    #[arg(long, short = 'j')]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short = 'v', action = ArgAction::Count)]
    pub verbose: u8,

    /// Path to config file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Seconds to wait for the device to appear on the network
    #[arg(long, short = 't')]
    pub timeout: Option<u64>,

    /// List receivers visible on the network and exit
    #[arg(long, short = 'l')]
    pub list: bool,

    /// Receiver name as advertised over mDNS
    pub device: Option<String>,

    /// Media files or directories to play
    pub paths: Vec<PathBuf>,
}

impl Cli {
    /// Check if JSON output should be used
    pub fn should_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }

    /// Resolve the device and paths to play.
    ///
    /// With a default device configured, a lone positional argument is read
    /// as a path. Returns `None` when there is nothing to play.
    pub fn play_request(&self, default_device: Option<&str>) -> Option<(String, Vec<PathBuf>)> {
        match (&self.device, self.paths.is_empty(), default_device) {
            (Some(device), false, _) => Some((device.clone(), self.paths.clone())),
            (Some(path), true, Some(default)) => {
                Some((default.to_string(), vec![PathBuf::from(path)]))
            }
            _ => None,
        }
    }
}

// =============================================================================
// Machine-readable Output
// =============================================================================

/// Top-level JSON document written for every invocation in JSON mode.
///
/// ```json
/// {"status": "ok", "data": {...}}
/// {"status": "error", "message": "...", "code": 4}
/// ```
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Envelope<T: Serialize> {
    Ok { data: T },
    Error { message: String, code: i32 },
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Envelope::Ok { data }
    }
}

impl Envelope<()> {
    pub fn failure(message: impl Into<String>, code: ExitCode) -> Self {
        Envelope::Error {
            message: message.into(),
            code: code.into(),
        }
    }
}

/// One played file
#[derive(Debug, Serialize, Deserialize)]
pub struct PlayedEntry {
    pub file: PathBuf,
    pub url: String,
    pub polls: u32,
}

/// Summary of a `play` run
#[derive(Debug, Serialize, Deserialize)]
pub struct PlayResponse {
    pub device: String,
    pub played: Vec<PlayedEntry>,
}

/// A receiver as shown by `--list`
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    pub address: String,
    pub port: u16,
}

// =============================================================================
// Terminal Reporting
// =============================================================================

/// Routes results to stdout and progress to stderr.
///
/// In JSON mode stdout carries exactly one [`Envelope`] and progress is
/// silenced; in human mode progress lines go to stderr unless `quiet`.
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self {
            json: cli.should_json(),
            quiet: cli.quiet,
        }
    }

    /// Write the final result. Human mode has already shown it as progress.
    pub fn emit<T: Serialize>(&self, data: T) -> ExitCode {
        if !self.json {
            return ExitCode::Success;
        }
        match serde_json::to_string_pretty(&Envelope::ok(data)) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::Success
            }
            Err(e) => self.fail(format!("Cannot encode result: {}", e), ExitCode::Error),
        }
    }

    /// Report a failure and hand back `code` for the caller to return
    pub fn fail(&self, message: impl Into<String>, code: ExitCode) -> ExitCode {
        let message = message.into();
        if self.json {
            match serde_json::to_string_pretty(&Envelope::failure(&message, code)) {
                Ok(json) => println!("{}", json),
                Err(_) => eprintln!("airstream: {}", message),
            }
        } else if !self.quiet {
            eprintln!("airstream: {}", message);
        }
        code
    }

    /// Progress line for humans
    pub fn progress(&self, message: impl std::fmt::Display) {
        if !self.json && !self.quiet {
            eprintln!("{}", message);
        }
    }

    /// Usage help; shown even when quiet
    pub fn usage(&self, message: impl std::fmt::Display) {
        eprintln!("{}", message);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_device_and_paths() {
        let cli = Cli::parse_from(["airstream", "Living Room", "a.mp3", "b.mp3"]);
        assert_eq!(cli.device.as_deref(), Some("Living Room"));
        assert_eq!(cli.paths, vec![PathBuf::from("a.mp3"), PathBuf::from("b.mp3")]);
        assert!(!cli.list);
    }

    #[test]
    fn test_play_request_requires_paths() {
        let cli = Cli::parse_from(["airstream", "Living Room"]);
        assert!(cli.play_request(None).is_none());

        let (device, paths) = cli.play_request(Some("Den")).unwrap();
        assert_eq!(device, "Den");
        assert_eq!(paths, vec![PathBuf::from("Living Room")]);
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["airstream", "--json", "-q", "-vv", "-t", "5", "TV", "x.mp3"]);
        assert!(cli.json);
        assert!(cli.quiet);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.timeout, Some(5));
    }

    #[test]
    fn test_envelope_tags() {
        let ok = serde_json::to_value(Envelope::ok(3)).unwrap();
        assert_eq!(ok, serde_json::json!({"status": "ok", "data": 3}));

        let err = serde_json::to_value(Envelope::failure("gone", ExitCode::DeviceNotFound)).unwrap();
        assert_eq!(
            err,
            serde_json::json!({"status": "error", "message": "gone", "code": 4})
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(i32::from(ExitCode::Success), 0);
        assert_eq!(i32::from(ExitCode::InvalidArgs), 2);
        assert_eq!(i32::from(ExitCode::DeviceNotFound), 4);
        assert_eq!(i32::from(ExitCode::CastFailed), 6);
    }
}
