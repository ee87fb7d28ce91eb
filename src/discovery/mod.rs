//! Receiver discovery
//!
//! - Source: the event seam consumed by the registry
//! - Registry: the live, de-duplicated set of receivers with bounded waits
//! - mDNS: the production event source, backed by `mdns-sd`

pub mod mdns;
pub mod registry;
pub mod source;

pub use mdns::MdnsEventSource;
pub use registry::{DeviceRegistry, DiscoveryError, DEFAULT_RESOLVE_TIMEOUT};
pub use source::{BrowseEvent, ServiceEventSource, ServiceRef};

/// AirPlay service type for mDNS discovery.
pub const AIRPLAY_SERVICE_TYPE: &str = "_airplay._tcp.local.";
