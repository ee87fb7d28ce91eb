//! Integration tests for airstream
//!
//! Tests are organized by component:
//! - registry_test: Receiver registry with a scripted event source
//! - control_test: AirPlay control client against mocked receivers
//! - session_test: Whole playback sessions against a fake receiver
//! - cli_test: Argument parsing, JSON output and command handlers

// Note: Each test file is a separate integration test crate
// Tests are run individually by cargo, not via mod.rs
