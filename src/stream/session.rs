//! Playback session state machine
//!
//! One session plays one file on one receiver:
//!
//! ```text
//! Staging -> Serving -> Commanded -> Polling -> Stopping -> Done
//!    \__________\___________\___________\______________-> Failed
//! ```
//!
//! The staging directory and media server are released on every exit path.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::server::{self, MediaServer, ServerError, StagingDir};
use crate::api::{ControlClient, ControlError};
use crate::clock::deadline_after;
use crate::models::{PlaybackReport, Receiver, SessionState, TransportState};

/// Session error types
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Io(#[from] ServerError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("Receiver unreachable after {attempts} consecutive failed polls (last: {last})")]
    PollRetriesExhausted { attempts: u32, last: String },

    #[error("Playback did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Playback cancelled")]
    Cancelled,
}

/// Tunables for a playback session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Delay between `/scrub` polls
    pub poll_interval: Duration,
    /// Consecutive failed polls tolerated before giving up
    pub max_poll_failures: u32,
    /// Upper bound on total polling time
    pub max_duration: Duration,
    /// Per-request timeout for control calls
    pub request_timeout: Duration,
    /// Interface the media server binds to
    pub bind_address: IpAddr,
    /// Address put in the media URL; detected per receiver when unset
    pub advertise_address: Option<IpAddr>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_poll_failures: 5,
            max_duration: Duration::from_secs(6 * 60 * 60),
            request_timeout: crate::api::control::DEFAULT_REQUEST_TIMEOUT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertise_address: None,
        }
    }
}

/// Plays one file on one receiver
pub struct PlaybackSession {
    id: Uuid,
    receiver: Receiver,
    file: PathBuf,
    control: ControlClient,
    options: SessionOptions,
    cancel: CancellationToken,
    state: SessionState,
    history: Vec<SessionState>,
    media_root: Option<PathBuf>,
}

/// Outcome of the polling phase
struct Finished {
    polls: u32,
    last_state: Option<TransportState>,
}

impl PlaybackSession {
    pub fn new(receiver: Receiver, file: impl Into<PathBuf>, options: SessionOptions) -> Self {
        let control = ControlClient::with_timeout(&receiver, options.request_timeout);
        Self {
            id: Uuid::new_v4(),
            receiver,
            file: file.into(),
            control,
            options,
            cancel: CancellationToken::new(),
            state: SessionState::Staging,
            history: Vec::new(),
            media_root: None,
        }
    }

    /// Use `token` (typically a child of an app-wide token) for cancellation
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state entered so far, in order
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Staging directory used by the last run, if it got that far
    pub fn media_root(&self) -> Option<&Path> {
        self.media_root.as_deref()
    }

    /// Token that cancels this session when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn enter(&mut self, state: SessionState) {
        debug!(session = %self.id, "{} -> {}", self.state, state);
        self.state = state;
        self.history.push(state);
    }

    fn fail(&mut self, error: SessionError) -> SessionError {
        warn!(session = %self.id, "Playback of {} failed: {}", self.file.display(), error);
        self.enter(SessionState::Failed);
        error
    }

    /// Run the whole session. Blocks until playback ends, fails or is
    /// cancelled; returns after teardown either way.
    ///
    /// Dropping the future mid-session still deletes the staging directory
    /// and aborts the server, but [`state`](Self::state) keeps the last
    /// state entered, which is not terminal.
    pub async fn play(&mut self) -> Result<PlaybackReport, SessionError> {
        self.history.clear();
        self.enter(SessionState::Staging);

        let staging = match StagingDir::create(&self.file) {
            Ok(staging) => staging,
            Err(e) => return Err(self.fail(e.into())),
        };
        self.media_root = Some(staging.root().to_path_buf());

        self.enter(SessionState::Serving);
        let server = match MediaServer::start(staging, self.options.bind_address).await {
            Ok(server) => server,
            Err(e) => return Err(self.fail(e.into())),
        };

        let outcome = self.drive(&server).await;
        let teardown = server.stop().await;

        match (outcome, teardown) {
            (Ok((url, finished)), Ok(())) => {
                self.enter(SessionState::Done);
                info!(session = %self.id, "Finished {} on {}", self.file.display(), self.receiver);
                Ok(PlaybackReport {
                    session_id: self.id,
                    receiver: self.receiver.clone(),
                    file: self.file.clone(),
                    url,
                    polls: finished.polls,
                    last_state: finished.last_state,
                    states: self.history.clone(),
                })
            }
            (Ok(_), Err(e)) => Err(self.fail(e.into())),
            (Err(e), teardown) => {
                if let Err(cleanup) = teardown {
                    warn!(session = %self.id, "Teardown after failure also failed: {}", cleanup);
                }
                Err(self.fail(e))
            }
        }
    }

    /// Commanded, Polling and Stopping, with the server already up
    async fn drive(&mut self, server: &MediaServer) -> Result<(String, Finished), SessionError> {
        let advertise = match self.options.advertise_address {
            Some(ip) => ip,
            None => server::advertise_address(self.receiver.address)?,
        };
        let url = server.url_for(advertise);

        // Nothing has been sent yet; don't start a stream only to stop it.
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        self.enter(SessionState::Commanded);
        info!(session = %self.id, "Streaming {} to {}", url, self.receiver);
        self.control.start_stream(&url).await?;

        self.enter(SessionState::Polling);
        let finished = match self.poll_until_finished().await {
            Ok(finished) => finished,
            Err(e) => {
                // The receiver may still be playing; tell it to stop.
                if let Err(stop) = self.control.stop_stream().await {
                    debug!(session = %self.id, "Stop after failure: {}", stop);
                }
                return Err(e);
            }
        };

        self.enter(SessionState::Stopping);
        if let Err(e) = self.control.stop_stream().await {
            warn!(session = %self.id, "Failed to stop receiver: {}", e);
        }

        Ok((url, finished))
    }

    async fn poll_until_finished(&mut self) -> Result<Finished, SessionError> {
        let deadline = deadline_after(self.options.max_duration);
        let mut polls = 0u32;
        let mut failures = 0u32;
        let mut last_state = None;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(SessionError::Timeout(self.options.max_duration));
            }
            let wait = self.options.poll_interval.min(deadline - now);

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }

            if Instant::now() >= deadline {
                return Err(SessionError::Timeout(self.options.max_duration));
            }

            polls += 1;
            let result = self.control.query_state().await.and_then(|state| {
                match state.is_finished() {
                    Some(finished) => Ok((state, finished)),
                    None => Err(ControlError::MalformedState(state.to_string())),
                }
            });

            match result {
                Ok((state, finished)) => {
                    failures = 0;
                    debug!(session = %self.id, "Poll {}: {}", polls, state);
                    last_state = Some(state);
                    if finished {
                        return Ok(Finished { polls, last_state });
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        session = %self.id,
                        "Poll {} failed ({}/{}): {}",
                        polls, failures, self.options.max_poll_failures, e
                    );
                    if failures >= self.options.max_poll_failures {
                        return Err(SessionError::PollRetriesExhausted {
                            attempts: failures,
                            last: e.to_string(),
                        });
                    }
                }
            }
        }
    }
}
