//! Live set of AirPlay receivers
//!
//! The registry is fed by a [`ServiceEventSource`] on a background task and
//! read by any number of callers. One mutex guards the receiver list, the
//! closed flag and the wake signal; readers only ever get copies.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::source::{BrowseEvent, ServiceEventSource, ServiceRef};
use crate::clock::deadline_after;
use crate::models::Receiver;

/// How long an unresolved announcement may take to resolve
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Discovery error types
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("'{name}' could not be found on the network (visible: {})", format_names(.available))]
    NotFound {
        name: String,
        available: Vec<String>,
    },

    #[error("mDNS daemon error: {0}")]
    Daemon(String),
}

fn format_names(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    receivers: Vec<Receiver>,
    closed: bool,
}

struct Shared {
    state: Mutex<RegistryState>,
    /// Bumped on every add/remove/close; waiters re-check after each bump
    generation: watch::Sender<u64>,
    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
    resolve_timeout: Duration,
}

/// Handle to a receiver registry. Clones share the same registry.
#[derive(Clone)]
pub struct DeviceRegistry {
    shared: Arc<Shared>,
}

impl DeviceRegistry {
    /// Create an empty registry with no event source attached
    pub fn new() -> Self {
        Self::with_resolve_timeout(DEFAULT_RESOLVE_TIMEOUT)
    }

    pub fn with_resolve_timeout(resolve_timeout: Duration) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RegistryState::default()),
                generation,
                shutdown: CancellationToken::new(),
                listener: Mutex::new(None),
                resolve_timeout,
            }),
        }
    }

    /// Create a registry and pump events from `source` into it on a
    /// background task until the source ends or the registry is closed.
    pub fn spawn<S>(source: S) -> Self
    where
        S: ServiceEventSource + 'static,
    {
        let registry = Self::new();
        registry.attach(source);
        registry
    }

    /// Start the listener task for `source`
    pub fn attach<S>(&self, mut source: S)
    where
        S: ServiceEventSource + 'static,
    {
        // The task only holds a weak reference so dropping the last handle
        // closes the registry.
        let weak = Arc::downgrade(&self.shared);
        let shutdown = self.shared.shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = source.next_event() => event,
                };

                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let registry = DeviceRegistry { shared };

                match event {
                    Some(BrowseEvent::Added(service)) => registry.on_added(&source, service).await,
                    Some(BrowseEvent::Removed(service)) => {
                        registry.on_removed(&source, service).await
                    }
                    Some(BrowseEvent::Resolved(service)) => {
                        trace!("Service resolved: {}", service.fullname);
                    }
                    None => {
                        debug!("Service event source ended");
                        break;
                    }
                }
            }

            source.close();
            debug!("Discovery listener stopped");
        });

        let mut listener = self
            .shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = listener.replace(handle) {
            previous.abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_all(&self) {
        self.shared.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    /// Current generation of the wake signal
    pub fn generation(&self) -> u64 {
        *self.shared.generation.borrow()
    }

    async fn endpoint_of<S>(&self, source: &S, service: &ServiceRef) -> Option<SocketAddr>
    where
        S: ServiceEventSource + ?Sized,
    {
        if let Some(endpoint) = service.endpoint {
            return Some(endpoint);
        }

        let timeout = self.shared.resolve_timeout;
        tokio::time::timeout(timeout, source.resolve(service, timeout))
            .await
            .ok()
            .flatten()
    }

    /// Handle an add-event, resolving the endpoint first if needed
    pub async fn on_added<S>(&self, source: &S, service: ServiceRef)
    where
        S: ServiceEventSource + ?Sized,
    {
        match self.endpoint_of(source, &service).await {
            Some(endpoint) => {
                self.insert(Receiver::new(service.name, endpoint.ip(), endpoint.port()));
            }
            None => warn!("Could not resolve {}, ignoring", service.fullname),
        }
    }

    /// Handle a remove-event, resolving the endpoint first if needed
    pub async fn on_removed<S>(&self, source: &S, service: ServiceRef)
    where
        S: ServiceEventSource + ?Sized,
    {
        match self.endpoint_of(source, &service).await {
            Some(endpoint) => {
                self.remove(endpoint);
            }
            None => warn!("Could not resolve removed service {}", service.fullname),
        }
    }

    /// Add a receiver unless one already lives at its endpoint.
    ///
    /// Returns true if the receiver was added. Waiters are woken either way.
    pub fn insert(&self, receiver: Receiver) -> bool {
        let mut state = self.lock();
        if state.closed {
            debug!("Registry closed, dropping {}", receiver);
            return false;
        }

        let added = if state.receivers.iter().any(|r| r == &receiver) {
            trace!("Already known: {}", receiver);
            false
        } else {
            info!("Receiver added: {}", receiver);
            state.receivers.push(receiver);
            true
        };

        self.wake_all();
        added
    }

    /// Remove the first receiver at `endpoint`. No match is a no-op.
    pub fn remove(&self, endpoint: SocketAddr) -> Option<Receiver> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }

        let removed = state
            .receivers
            .iter()
            .position(|r| r.is_at(endpoint))
            .map(|idx| state.receivers.remove(idx));

        match &removed {
            Some(receiver) => info!("Receiver removed: {}", receiver),
            None => trace!("No receiver at {}, nothing to remove", endpoint),
        }

        self.wake_all();
        removed
    }

    /// Copy of the currently known receivers
    pub fn snapshot(&self) -> Vec<Receiver> {
        self.lock().receivers.clone()
    }

    /// Names of the currently known receivers
    pub fn names(&self) -> Vec<String> {
        self.lock().receivers.iter().map(|r| r.name.clone()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Wait up to `timeout` for a receiver named `name` to appear.
    ///
    /// Every registry change wakes the waiter, which re-checks the full list.
    /// Returns [`DiscoveryError::NotFound`] on deadline or when the registry
    /// is closed.
    pub async fn wait_for_named(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Receiver, DiscoveryError> {
        let deadline = deadline_after(timeout);
        // Subscribe before the first check so no change can slip in between.
        let mut changes = self.shared.generation.subscribe();

        loop {
            {
                let state = self.lock();
                if let Some(receiver) = state.receivers.iter().find(|r| r.name == name) {
                    return Ok(receiver.clone());
                }
                if state.closed {
                    debug!("Registry closed while waiting for '{}'", name);
                    break;
                }
            }

            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => break,
            }
        }

        Err(DiscoveryError::NotFound {
            name: name.to_string(),
            available: self.names(),
        })
    }

    /// Collect every receiver seen during `window`, calling `on_new` for
    /// each one the first time it shows up.
    pub async fn watch<F>(&self, window: Duration, mut on_new: F) -> Vec<Receiver>
    where
        F: FnMut(&Receiver),
    {
        let deadline = deadline_after(window);
        let mut changes = self.shared.generation.subscribe();
        let mut seen: HashSet<Receiver> = HashSet::new();
        let mut ordered = Vec::new();

        loop {
            let (current, closed) = {
                let state = self.lock();
                (state.receivers.clone(), state.closed)
            };

            for receiver in current {
                if seen.insert(receiver.clone()) {
                    on_new(&receiver);
                    ordered.push(receiver);
                }
            }

            if closed {
                break;
            }

            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => break,
            }
        }

        ordered
    }

    /// Close the registry: stop the listener (which closes the event source),
    /// reject further mutation and release every waiter.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            self.wake_all();
        }
        self.shared.shutdown.cancel();
        debug!("Device registry closed");
    }

    /// Close the registry and wait for the listener task to finish
    pub async fn shutdown(&self) {
        self.close();

        let handle = self
            .shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Discovery listener task failed: {}", e);
            }
        }
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
