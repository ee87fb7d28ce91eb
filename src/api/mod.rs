//! Receiver API clients
//!
//! - Control: the AirPlay `/play`, `/stop` and `/scrub` endpoints

pub mod control;

pub use control::{ControlClient, ControlError};
