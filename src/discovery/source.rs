//! Service advertisement events (seam between the registry and mDNS).

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;

/// A service as announced on the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    /// Full DNS-SD name, e.g. `Living Room._airplay._tcp.local.`
    pub fullname: String,
    /// Instance name shown to users, e.g. `Living Room`
    pub name: String,
    /// Control endpoint, when the announcement already carried it
    pub endpoint: Option<SocketAddr>,
}

impl ServiceRef {
    pub fn new(fullname: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            fullname: fullname.into(),
            name: name.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: SocketAddr) -> Self {
        self.endpoint = Some(endpoint);
        self
    }
}

/// Event emitted by a service event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseEvent {
    /// Service appeared.
    Added(ServiceRef),
    /// Service went away.
    Removed(ServiceRef),
    /// Service record (re)resolved. The registry does not act on these.
    Resolved(ServiceRef),
}

/// Source of add/remove/resolve events for one service type.
///
/// Delivery is sequential: the registry's listener task is the only caller of
/// `next_event`.
#[async_trait]
pub trait ServiceEventSource: Send + Sync {
    /// Wait for the next event. `None` means the source has ended.
    async fn next_event(&mut self) -> Option<BrowseEvent>;

    /// Look up the endpoint of a service whose event arrived unresolved.
    async fn resolve(&self, service: &ServiceRef, timeout: Duration) -> Option<SocketAddr>;

    /// Stop browsing and release the subscription.
    fn close(&mut self);
}
