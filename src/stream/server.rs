//! Ephemeral media server
//!
//! A session copies its file into a fresh temporary directory and serves that
//! directory, and only that directory, over HTTP on an OS-assigned port.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::Router;
use tempfile::TempDir;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tracing::{debug, warn};

/// How long in-flight downloads get to finish once shutdown starts
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Errors from staging and serving media
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),
}

impl ServerError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ServerError::Io {
            context: context.into(),
            source,
        }
    }
}

// =============================================================================
// Staging
// =============================================================================

/// Temporary web root holding one copied media file
///
/// The directory is deleted when this value is dropped or closed.
#[derive(Debug)]
pub struct StagingDir {
    dir: TempDir,
    file_name: String,
}

impl StagingDir {
    /// Create a uniquely named temporary directory and copy `source` into it
    pub fn create(source: &Path) -> Result<Self, ServerError> {
        let metadata = std::fs::metadata(source)
            .map_err(|e| ServerError::io(format!("Cannot read {}", source.display()), e))?;
        if !metadata.is_file() {
            return Err(ServerError::NotAFile(source.to_path_buf()));
        }

        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ServerError::NotAFile(source.to_path_buf()))?;

        let dir = tempfile::Builder::new()
            .prefix("airstream-")
            .tempdir()
            .map_err(|e| ServerError::io("Cannot create staging directory", e))?;

        let target = dir.path().join(&file_name);
        std::fs::copy(source, &target).map_err(|e| {
            ServerError::io(
                format!("Cannot copy {} to {}", source.display(), target.display()),
                e,
            )
        })?;

        debug!("Staged {} in {}", file_name, dir.path().display());

        Ok(Self { dir, file_name })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Path of the staged copy
    pub fn staged_file(&self) -> PathBuf {
        self.dir.path().join(&self.file_name)
    }

    /// Delete the directory and its contents, reporting failures
    pub fn close(self) -> Result<(), ServerError> {
        let root = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|e| ServerError::io(format!("Cannot remove {}", root.display()), e))
    }
}

// =============================================================================
// Serving
// =============================================================================

/// HTTP file server rooted at a [`StagingDir`]
///
/// Dropping the server without calling [`MediaServer::stop`] aborts the
/// server task and deletes the staging directory.
#[derive(Debug)]
pub struct MediaServer {
    staging: Option<StagingDir>,
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl MediaServer {
    /// Bind to `bind_address` on an OS-assigned port and serve `staging`
    pub async fn start(staging: StagingDir, bind_address: IpAddr) -> Result<Self, ServerError> {
        let listener = tokio::net::TcpListener::bind(SocketAddr::new(bind_address, 0))
            .await
            .map_err(|e| ServerError::io(format!("Cannot bind media server on {}", bind_address), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::io("Cannot read media server address", e))?;

        let app = Router::new().fallback_service(ServeDir::new(staging.root()));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        debug!("Serving {} on {}", staging.root().display(), local_addr);

        Ok(Self {
            staging: Some(staging),
            local_addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Staging directory being served
    pub fn root(&self) -> Option<&Path> {
        self.staging.as_ref().map(StagingDir::root)
    }

    /// URL a receiver should fetch the staged file from, given the local
    /// address it can reach us on
    pub fn url_for(&self, advertise: IpAddr) -> String {
        let file_name = self
            .staging
            .as_ref()
            .map(StagingDir::file_name)
            .unwrap_or_default();
        media_url(advertise, self.port(), file_name)
    }

    /// Shut the server down and delete the staging directory
    pub async fn stop(mut self) -> Result<(), ServerError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!("Media server exited with error: {}", e),
                Ok(Err(e)) => warn!("Media server task failed: {}", e),
                Err(_) => {
                    debug!("Media server still busy after {:?}, aborting", SHUTDOWN_GRACE);
                    task.abort();
                }
            }
        }

        debug!("Media server on {} stopped", self.local_addr);

        match self.staging.take() {
            Some(staging) => staging.close(),
            None => Ok(()),
        }
    }
}

impl Drop for MediaServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// Addressing
// =============================================================================

/// Build `http://<address>:<port>/<percent-encoded file name>`
pub fn media_url(address: IpAddr, port: u16, file_name: &str) -> String {
    format!(
        "http://{}/{}",
        SocketAddr::new(address, port),
        urlencoding::encode(file_name)
    )
}

/// Local address the OS would use to reach `remote`
///
/// Connecting a UDP socket sends nothing; it only asks the routing table.
pub fn local_address_for(remote: IpAddr) -> std::io::Result<IpAddr> {
    let unspecified = match remote {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let socket = UdpSocket::bind(SocketAddr::new(unspecified, 0))?;
    socket.connect(SocketAddr::new(remote, 9))?;
    Ok(socket.local_addr()?.ip())
}

/// Address to advertise to `remote`: the routed local address, falling back
/// to the host's primary address
pub fn advertise_address(remote: IpAddr) -> Result<IpAddr, ServerError> {
    match local_address_for(remote) {
        Ok(ip) if !ip.is_unspecified() => Ok(ip),
        _ => local_ip_address::local_ip().map_err(|e| {
            ServerError::io(
                format!("Cannot determine a local address reachable from {}", remote),
                std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, e.to_string()),
            )
        }),
    }
}
