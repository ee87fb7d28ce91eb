//! Streaming infrastructure
//!
//! - Server: ephemeral web root and HTTP file server for one media file
//! - Session: the play/poll/stop state machine driving one receiver

pub mod server;
pub mod session;

pub use server::{MediaServer, ServerError, StagingDir};
pub use session::{PlaybackSession, SessionError, SessionOptions};
