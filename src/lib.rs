//! airstream - play local media on AirPlay receivers
//!
//! Discovers receivers over mDNS, serves a file to one of them from a
//! temporary HTTP server and follows playback until it ends.
//!
//! # Modules
//!
//! - `models` - Receivers, transport reports, session states
//! - `discovery` - mDNS event source and the receiver registry
//! - `api` - AirPlay control protocol client
//! - `stream` - Media server and playback session
//! - `clock` - Overflow-safe deadlines
//! - `config`, `cli`, `commands`, `logging` - the command line application

pub mod api;
pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod logging;
pub mod models;
pub mod stream;

// Re-export commonly used types
pub use models::{PlaybackReport, Receiver, SessionState, TransportState};

pub use api::{ControlClient, ControlError};
pub use discovery::{DeviceRegistry, DiscoveryError};
pub use stream::{PlaybackSession, SessionError, SessionOptions};
