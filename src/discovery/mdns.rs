//! mDNS service browser for AirPlay receivers, backed by `mdns-sd`.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{debug, trace};

use super::registry::DiscoveryError;
use super::source::{BrowseEvent, ServiceEventSource, ServiceRef};
use crate::clock::deadline_after;

/// Browses one service type and turns daemon events into [`BrowseEvent`]s.
pub struct MdnsEventSource {
    daemon: ServiceDaemon,
    service_type: String,
    events: mdns_sd::Receiver<ServiceEvent>,
    tracker: Mutex<ServiceTracker>,
    closed: bool,
}

impl MdnsEventSource {
    /// Start browsing for `service_type` (e.g. `_airplay._tcp.local.`)
    pub fn browse(service_type: &str) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| DiscoveryError::Daemon(format!("Failed to create mDNS daemon: {}", e)))?;

        let events = daemon
            .browse(service_type)
            .map_err(|e| DiscoveryError::Daemon(format!("Failed to browse {}: {}", service_type, e)))?;

        debug!("Browsing for {}", service_type);

        Ok(Self {
            daemon,
            service_type: service_type.to_string(),
            events,
            tracker: Mutex::new(ServiceTracker::new(service_type)),
            closed: false,
        })
    }

    fn tracker(&self) -> MutexGuard<'_, ServiceTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ServiceEventSource for MdnsEventSource {
    async fn next_event(&mut self) -> Option<BrowseEvent> {
        loop {
            if self.closed {
                return None;
            }

            let deferred = self.tracker().next_deferred();
            let event = match deferred {
                Some(event) => event,
                // Cancel-safe: an event is either returned or left queued.
                None => match self.events.recv_async().await {
                    Ok(event) => event,
                    Err(_) => {
                        debug!("mDNS event channel closed");
                        return None;
                    }
                },
            };

            if let Some(event) = self.tracker().translate(event) {
                return Some(event);
            }
        }
    }

    /// Wait for the daemon to resolve `service`, reading the event channel
    /// meanwhile. Events read here are queued for [`next_event`](Self::next_event).
    async fn resolve(&self, service: &ServiceRef, timeout: Duration) -> Option<SocketAddr> {
        let deadline = deadline_after(timeout);
        loop {
            if let Some(endpoint) = self.tracker().endpoint(&service.fullname) {
                return Some(endpoint);
            }
            if self.closed {
                return None;
            }

            match tokio::time::timeout_at(deadline, self.events.recv_async()).await {
                Ok(Ok(event)) => self.tracker().defer(event),
                Ok(Err(_)) | Err(_) => return None,
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.daemon.stop_browse(&self.service_type) {
            debug!("Failed to stop mDNS browse cleanly: {}", e);
        }
        // Shutdown may report a closed channel; nothing to do about it.
        if let Err(e) = self.daemon.shutdown() {
            debug!("mDNS shutdown error (harmless): {}", e);
        }
    }
}

impl Drop for MdnsEventSource {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Event Translation
// =============================================================================

/// Endpoint cache and backlog behind [`MdnsEventSource`].
///
/// Removal announcements carry no address, so the endpoint of every live
/// service is kept until its removal is translated.
struct ServiceTracker {
    service_type: String,
    endpoints: HashMap<String, SocketAddr>,
    backlog: VecDeque<ServiceEvent>,
}

impl ServiceTracker {
    fn new(service_type: &str) -> Self {
        Self {
            service_type: service_type.to_string(),
            endpoints: HashMap::new(),
            backlog: VecDeque::new(),
        }
    }

    fn endpoint(&self, fullname: &str) -> Option<SocketAddr> {
        self.endpoints.get(fullname).copied()
    }

    /// Cache the endpoint of a resolved service
    fn record(&mut self, info: &ServiceInfo) -> Option<SocketAddr> {
        let endpoint = SocketAddr::new(preferred_address(info)?, info.get_port());
        self.endpoints
            .insert(info.get_fullname().to_string(), endpoint);
        Some(endpoint)
    }

    /// Keep an event read out of turn, caching what it resolves right away
    fn defer(&mut self, event: ServiceEvent) {
        if let ServiceEvent::ServiceResolved(info) = &event {
            self.record(info);
        }
        self.backlog.push_back(event);
    }

    fn next_deferred(&mut self) -> Option<ServiceEvent> {
        self.backlog.pop_front()
    }

    fn translate(&mut self, event: ServiceEvent) -> Option<BrowseEvent> {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                let fullname = info.get_fullname().to_string();
                let name = instance_name(&fullname, &self.service_type);
                let service = ServiceRef::new(fullname.clone(), name);

                match self.record(&info) {
                    Some(endpoint) => Some(BrowseEvent::Added(service.with_endpoint(endpoint))),
                    None => {
                        debug!("Service {} has no addresses yet", fullname);
                        Some(BrowseEvent::Added(service))
                    }
                }
            }
            ServiceEvent::ServiceRemoved(_, fullname) => match self.endpoints.remove(&fullname) {
                Some(endpoint) => {
                    let name = instance_name(&fullname, &self.service_type);
                    Some(BrowseEvent::Removed(
                        ServiceRef::new(fullname, name).with_endpoint(endpoint),
                    ))
                }
                None => {
                    debug!("Ignoring removal of never-resolved {}", fullname);
                    None
                }
            },
            ServiceEvent::ServiceFound(_, fullname) => {
                trace!("Service found (will resolve): {}", fullname);
                None
            }
            ServiceEvent::SearchStarted(_) => {
                trace!("Search started");
                None
            }
            ServiceEvent::SearchStopped(_) => {
                trace!("Search stopped");
                None
            }
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}

/// Strip the service type suffix from a DNS-SD full name
///
/// `Living Room._airplay._tcp.local.` becomes `Living Room`.
pub fn instance_name(fullname: &str, service_type: &str) -> String {
    let trimmed = fullname.trim();
    let suffix = format!(".{}", service_type.trim_start_matches('.'));

    trimmed
        .strip_suffix(suffix.as_str())
        .or_else(|| trimmed.strip_suffix(suffix.trim_end_matches('.')))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(trimmed)
        .to_string()
}

/// Pick the address to control a receiver through, preferring IPv4
fn preferred_address(info: &ServiceInfo) -> Option<IpAddr> {
    let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    addresses.sort_by_key(|addr| (!addr.is_ipv4(), *addr));
    addresses.into_iter().next()
}
