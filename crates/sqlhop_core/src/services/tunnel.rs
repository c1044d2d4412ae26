//! Named tunnels and local port forwarding.
//!
//! A [`TunnelManager`] dials each named tunnel at most once and hands out
//! its local endpoint to every connection that references it. The
//! [`Forwarder`] owns the local listener and the set of forwarded
//! connections; the transport behind it is supplied by a [`ChannelOpener`].

use crate::error::{HopError, HopResult};
use crate::models::TunnelSpec;
use crate::services::prompt::SecretPrompter;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Address the forwarder listens on. Port 0 lets the OS pick.
pub const LOCAL_BIND_ADDR: &str = "127.0.0.1:0";

/// Pause after a transient accept failure such as fd exhaustion.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Database endpoint reached through a tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
}

impl RemoteTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A live tunnel exposing a local endpoint.
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Local address forwarding to the remote target.
    fn local_addr(&self) -> SocketAddr;

    /// Whether the accept loop is still running.
    fn is_alive(&self) -> bool;

    /// Tear down forwarded connections, the listener and the transport.
    async fn close(&self) -> HopResult<()>;
}

/// Establishes tunnels.
#[async_trait]
pub trait TunnelDialer: Send + Sync {
    async fn dial(
        &self,
        spec: &TunnelSpec,
        remote: &RemoteTarget,
        prompter: &dyn SecretPrompter,
    ) -> HopResult<Box<dyn Tunnel>>;
}

struct ActiveTunnel {
    tunnel: Box<dyn Tunnel>,
    remote: RemoteTarget,
}

/// Owns every active tunnel, keyed by tunnel name.
pub struct TunnelManager {
    dialer: Box<dyn TunnelDialer>,
    active: HashMap<String, ActiveTunnel>,
}

impl TunnelManager {
    pub fn new(dialer: Box<dyn TunnelDialer>) -> Self {
        Self { dialer, active: HashMap::new() }
    }

    /// Reuse the tunnel named by `spec` or dial it, returning its local
    /// endpoint.
    ///
    /// The remote target is fixed by whichever connection dials first.
    pub async fn establish(
        &mut self,
        spec: &TunnelSpec,
        remote: RemoteTarget,
        prompter: &dyn SecretPrompter,
    ) -> HopResult<SocketAddr> {
        if let Some(active) = self.active.get(&spec.name) {
            if active.remote != remote {
                tracing::warn!(
                    tunnel = %spec.name,
                    bound = %active.remote,
                    requested = %remote,
                    "Tunnel already forwards to a different target; reusing it"
                );
            }
            if !active.tunnel.is_alive() {
                tracing::warn!(tunnel = %spec.name, "Reusing tunnel whose listener has stopped");
            }
            return Ok(active.tunnel.local_addr());
        }

        tracing::info!(tunnel = %spec.name, bastion = %spec.address(), target = %remote, "Dialing tunnel");

        let tunnel = self
            .dialer
            .dial(spec, &remote, prompter)
            .await
            .map_err(|e| e.context(format!("tunnel '{}'", spec.name)))?;
        let local = tunnel.local_addr();

        tracing::info!(tunnel = %spec.name, local = %local, "Tunnel established");
        self.active.insert(spec.name.clone(), ActiveTunnel { tunnel, remote });
        Ok(local)
    }

    /// Whether a tunnel with this name is active.
    pub fn is_active(&self, name: &str) -> bool {
        self.active.contains_key(name)
    }

    /// Number of active tunnels.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Close every tunnel. Failures are logged and returned.
    pub async fn close_all(&mut self) -> Vec<(String, HopError)> {
        let mut failures = Vec::new();
        for (name, active) in self.active.drain() {
            match active.tunnel.close().await {
                Ok(()) => tracing::debug!(tunnel = %name, "Tunnel closed"),
                Err(e) => {
                    tracing::warn!(tunnel = %name, error = %e, "Failed to close tunnel");
                    failures.push((name, e));
                }
            }
        }
        failures
    }
}

/// Opens one transport channel per forwarded connection.
#[async_trait]
pub trait ChannelOpener: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a channel to the remote target on behalf of `peer`.
    async fn open_channel(&self, peer: SocketAddr) -> HopResult<Self::Stream>;
}

type Tracked = Arc<Mutex<HashMap<u64, AbortHandle>>>;

/// Local listener forwarding each accepted connection over its own channel.
pub struct Forwarder {
    name: String,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    alive: Arc<AtomicBool>,
    connections: Tracked,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Forwarder {
    /// Bind [`LOCAL_BIND_ADDR`] and start accepting.
    pub async fn bind<O: ChannelOpener>(name: &str, opener: Arc<O>) -> HopResult<Self> {
        let listener = TcpListener::bind(LOCAL_BIND_ADDR).await.map_err(|e| {
            HopError::connection_with_source(format!("tunnel '{name}': failed to bind local port"), e)
        })?;
        let local_addr = listener.local_addr().map_err(|e| {
            HopError::connection_with_source(format!("tunnel '{name}': no local address"), e)
        })?;

        let cancel = CancellationToken::new();
        let alive = Arc::new(AtomicBool::new(true));
        let connections: Tracked = Arc::new(Mutex::new(HashMap::new()));

        let accept_task = tokio::spawn(accept_loop(
            name.to_string(),
            listener,
            opener,
            cancel.clone(),
            alive.clone(),
            connections.clone(),
        ));

        tracing::debug!(tunnel = %name, local = %local_addr, "Forwarder listening");

        Ok(Self {
            name: name.to_string(),
            local_addr,
            cancel,
            alive,
            connections,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Number of forwarded connections currently tracked.
    pub fn tracked(&self) -> usize {
        self.connections.lock().len()
    }

    /// Abort every forwarded connection, then stop the accept loop and
    /// drop the listener.
    pub async fn shutdown(&self) {
        let aborted: Vec<AbortHandle> =
            self.connections.lock().drain().map(|(_, handle)| handle).collect();
        for handle in &aborted {
            handle.abort();
        }

        self.cancel.cancel();
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(tunnel = %self.name, error = %e, "Accept loop ended abnormally");
                }
            }
        }
        self.alive.store(false, Ordering::Release);

        tracing::debug!(tunnel = %self.name, aborted = aborted.len(), "Forwarder stopped");
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.cancel.cancel();
        for (_, handle) in self.connections.lock().drain() {
            handle.abort();
        }
    }
}

async fn accept_loop<O: ChannelOpener>(
    name: String,
    listener: TcpListener,
    opener: Arc<O>,
    cancel: CancellationToken,
    alive: Arc<AtomicBool>,
    connections: Tracked,
) {
    let next_id = AtomicU64::new(0);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(tunnel = %name, %peer, id, "Accepted tunnel connection");

                    // Hold the lock across spawn so the task cannot deregister
                    // before it is registered.
                    let mut tracked = connections.lock();
                    let task = tokio::spawn(forward_connection(
                        name.clone(),
                        id,
                        stream,
                        peer,
                        opener.clone(),
                        connections.clone(),
                    ));
                    tracked.insert(id, task.abort_handle());
                }
                Err(e) if is_transient_accept_error(&e) => {
                    tracing::warn!(tunnel = %name, error = %e, "Transient accept error");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
                Err(e) => {
                    tracing::error!(tunnel = %name, error = %e, "Accept loop terminated");
                    break;
                }
            },
            _ = cancel.cancelled() => break,
        }
    }

    alive.store(false, Ordering::Release);
}

async fn forward_connection<O: ChannelOpener>(
    name: String,
    id: u64,
    mut local: TcpStream,
    peer: SocketAddr,
    opener: Arc<O>,
    connections: Tracked,
) {
    match opener.open_channel(peer).await {
        Ok(mut remote) => match tokio::io::copy_bidirectional(&mut local, &mut remote).await {
            Ok((sent, received)) => {
                tracing::debug!(tunnel = %name, id, sent, received, "Tunnel connection finished")
            }
            Err(e) => tracing::debug!(tunnel = %name, id, error = %e, "Tunnel connection ended"),
        },
        Err(e) => {
            tracing::warn!(tunnel = %name, id, error = %e, "Could not open remote channel")
        }
    }

    connections.lock().remove(&id);
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || matches!(e.raw_os_error(), Some(23) | Some(24))
}
