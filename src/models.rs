//! Data structures shared across airstream
//!
//! Contains the models used by discovery, control and playback:
//! - **Receiver**: an AirPlay endpoint learned from mDNS
//! - **Transport**: the `key: value` report returned by `/scrub`
//! - **Session**: playback lifecycle states and the final report

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use uuid::Uuid;

// =============================================================================
// Receiver Models
// =============================================================================

/// AirPlay receiver discovered on the network
///
/// Identity is the `(address, port)` pair. Two receivers with the same name
/// on different endpoints are distinct devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receiver {
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
}

impl Receiver {
    pub fn new(name: impl Into<String>, address: IpAddr, port: u16) -> Self {
        Self {
            name: name.into(),
            address,
            port,
        }
    }

    /// Socket address of the control endpoint
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// True when this receiver lives at the given endpoint (name is ignored)
    pub fn is_at(&self, endpoint: SocketAddr) -> bool {
        self.endpoint() == endpoint
    }

    /// Base URL of the control protocol, e.g. `http://192.168.1.20:7000`
    pub fn base_url(&self) -> String {
        format!("http://{}", self.endpoint())
    }
}

impl PartialEq for Receiver {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint() == other.endpoint()
    }
}

impl Eq for Receiver {}

impl Hash for Receiver {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.endpoint().hash(state);
    }
}

impl fmt::Display for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.endpoint())
    }
}

// =============================================================================
// Transport Models
// =============================================================================

/// Playback position report from a receiver's `/scrub` endpoint
///
/// Holds every field verbatim. Numeric fields are only parsed when asked for,
/// so an unexpected value never causes the whole report to be rejected.
///
/// ```text
/// duration: 180.000000
/// position: 12.500000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportState {
    fields: BTreeMap<String, String>,
}

impl TransportState {
    /// Parse a `/scrub` response body
    ///
    /// Each line is split on the first `": "`; everything after it is the
    /// value, colons included. A line without the separator is kept as a key
    /// with an empty value.
    pub fn parse(body: &str) -> Self {
        let mut fields = BTreeMap::new();

        for line in body.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            match line.split_once(": ") {
                Some((key, value)) => fields.insert(key.to_string(), value.to_string()),
                None => fields.insert(line.to_string(), String::new()),
            };
        }

        Self { fields }
    }

    /// Raw value of a field
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// All fields as reported
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Playback position in seconds, if present and numeric
    pub fn position(&self) -> Option<f64> {
        self.seconds("position")
    }

    /// Media duration in seconds, if present and numeric
    pub fn duration(&self) -> Option<f64> {
        self.seconds("duration")
    }

    fn seconds(&self, key: &str) -> Option<f64> {
        self.get(key)?.trim().parse::<f64>().ok()
    }

    /// Whether this report says the media has played to the end
    ///
    /// Returns `None` when `position` or `duration` is missing or malformed.
    pub fn is_finished(&self) -> Option<bool> {
        Some(playback_finished(self.position()?, self.duration()?))
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.position(), self.duration()) {
            (Some(position), Some(duration)) => write!(f, "{:.1}s / {:.1}s", position, duration),
            _ => {
                let pairs: Vec<String> = self
                    .fields
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                write!(f, "{{{}}}", pairs.join(", "))
            }
        }
    }
}

/// Completion rule for a poll: the receiver has started (`position != 0`) and
/// is within one second of the end.
pub fn playback_finished(position: f64, duration: f64) -> bool {
    position != 0.0 && position >= duration - 1.0
}

// =============================================================================
// Session Models
// =============================================================================

/// Playback session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Copying the file into the ephemeral root
    Staging,
    /// File server bound
    Serving,
    /// Receiver told to start streaming
    Commanded,
    /// Waiting for playback to reach the end
    Polling,
    /// Receiver told to stop
    Stopping,
    Done,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Staging => "staging",
            SessionState::Serving => "serving",
            SessionState::Commanded => "commanded",
            SessionState::Polling => "polling",
            SessionState::Stopping => "stopping",
            SessionState::Done => "done",
            SessionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Summary of a playback session that ran to completion
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackReport {
    pub session_id: Uuid,
    pub receiver: Receiver,
    pub file: PathBuf,
    /// URL the receiver was told to fetch
    pub url: String,
    /// Number of `/scrub` requests issued
    pub polls: u32,
    /// Last well-formed transport report seen
    pub last_state: Option<TransportState>,
    pub states: Vec<SessionState>,
}

impl fmt::Display for PlaybackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Played {} on {} ({} polls)",
            self.file.display(),
            self.receiver,
            self.polls
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn receiver(name: &str, last_octet: u8, port: u16) -> Receiver {
        Receiver::new(name, IpAddr::V4(Ipv4Addr::new(192, 168, 1, last_octet)), port)
    }

    #[test]
    fn test_receiver_identity_ignores_name() {
        let a = receiver("Living Room", 20, 7000);
        let b = receiver("Apple TV", 20, 7000);
        let c = receiver("Living Room", 21, 7000);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, receiver("Living Room", 20, 7001));
    }

    #[test]
    fn test_receiver_base_url_brackets_ipv6() {
        let v6 = Receiver::new("Den", "fe80::1".parse().unwrap(), 7000);
        assert_eq!(v6.base_url(), "http://[fe80::1]:7000");
        assert_eq!(receiver("Den", 5, 7000).base_url(), "http://192.168.1.5:7000");
    }

    #[test]
    fn test_parse_scrub_body() {
        let state = TransportState::parse("position: 12.5\nduration: 180.0\n");

        assert_eq!(state.len(), 2);
        assert_eq!(state.get("position"), Some("12.5"));
        assert_eq!(state.get("duration"), Some("180.0"));
    }

    #[test]
    fn test_parse_keeps_colons_in_value() {
        let state = TransportState::parse("uri: http://10.0.0.2:8080/a b.mp3\r\n");
        assert_eq!(state.get("uri"), Some("http://10.0.0.2:8080/a b.mp3"));
    }

    #[test]
    fn test_parse_preserves_malformed_fields() {
        let state = TransportState::parse("position: abc\nrate\n\nduration: 3.0");

        assert_eq!(state.get("position"), Some("abc"));
        assert_eq!(state.get("rate"), Some(""));
        assert_eq!(state.position(), None);
        assert_eq!(state.duration(), Some(3.0));
        assert_eq!(state.is_finished(), None);
    }

    #[test]
    fn test_completion_predicate() {
        assert!(playback_finished(179.2, 180.0));
        assert!(playback_finished(180.0, 180.0));
        assert!(!playback_finished(0.0, 180.0));
        assert!(!playback_finished(0.0, 0.5));
        assert!(!playback_finished(10.0, 180.0));
    }

    #[test]
    fn test_transport_state_is_finished() {
        let done = TransportState::parse("duration: 3.000000\nposition: 3.000000\n");
        let playing = TransportState::parse("duration: 3.000000\nposition: 1.000000\n");

        assert_eq!(done.is_finished(), Some(true));
        assert_eq!(playing.is_finished(), Some(false));
    }

    #[test]
    fn test_session_state_terminal() {
        assert!(SessionState::Done.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Polling.is_terminal());
        assert_eq!(SessionState::Commanded.to_string(), "commanded");
    }
}
