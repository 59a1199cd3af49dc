//! TCP Acceptors
//!
//! A node runs exactly one acceptor, chosen once at startup from its descriptor:
//! - **`FrontendAcceptor`**: client connections, served by a `ConnectionHandler`.
//! - **`BackendAcceptor`**: peer connections, served by the `RpcService`.
//!
//! Both share the same accept loop. Every accepted connection is handled on its own task, so a
//! slow handler never holds up the next `accept()`. A failed bind is fatal and returned to the
//! caller; a failed accept is logged and retried after an exponential backoff. The loop watches
//! the shutdown signal while accepting and while backing off, and on shutdown gives in-flight
//! connections a bounded window to finish before aborting them.

use super::backoff::{AcceptBackoff, BackoffConfig};
use super::handler::{ConnectionHandler, RpcService};
use crate::error::NodeError;
use crate::membership::types::{NodeRole, ServerDescriptor};

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

/// Runtime settings shared by both acceptor variants.
#[derive(Debug, Clone, Copy)]
pub struct AcceptSettings {
    pub backoff: BackoffConfig,
    /// How long in-flight connections may keep running after shutdown is signalled.
    pub drain_timeout: Duration,
}

impl Default for AcceptSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Where the accept loop gets its connections from. `TcpListener` in production.
pub trait AcceptSource: Send + Sync + 'static {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl AcceptSource for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// A bound listener ready to serve one role.
pub trait Acceptor: Send + 'static {
    fn role(&self) -> NodeRole;

    /// The address actually bound, which differs from the configured one when port 0 is used.
    fn local_addr(&self) -> SocketAddr;

    /// Starts the accept loop. The task ends once `shutdown` changes (or its sender is dropped)
    /// and in-flight connections have been drained.
    fn spawn(self: Box<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()>;
}

/// Accepts client connections on behalf of a frontend node.
pub struct FrontendAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<dyn ConnectionHandler>,
    settings: AcceptSettings,
}

impl FrontendAcceptor {
    pub async fn bind(
        server: &ServerDescriptor,
        handler: Arc<dyn ConnectionHandler>,
        settings: AcceptSettings,
    ) -> Result<Self, NodeError> {
        let (listener, local_addr) = bind_listener(server, NodeRole::Frontend).await?;

        Ok(Self {
            listener,
            local_addr,
            handler,
            settings,
        })
    }
}

impl Acceptor for FrontendAcceptor {
    fn role(&self) -> NodeRole {
        NodeRole::Frontend
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn spawn(self: Box<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = *self;
        tokio::spawn(accept_loop(
            NodeRole::Frontend,
            this.listener,
            this.handler,
            this.settings,
            shutdown,
        ))
    }
}

/// Accepts peer RPC connections on behalf of a backend node.
pub struct BackendAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    rpc: Arc<dyn RpcService>,
    settings: AcceptSettings,
}

impl BackendAcceptor {
    pub async fn bind(
        server: &ServerDescriptor,
        rpc: Arc<dyn RpcService>,
        settings: AcceptSettings,
    ) -> Result<Self, NodeError> {
        let (listener, local_addr) = bind_listener(server, NodeRole::Backend).await?;

        Ok(Self {
            listener,
            local_addr,
            rpc,
            settings,
        })
    }
}

impl Acceptor for BackendAcceptor {
    fn role(&self) -> NodeRole {
        NodeRole::Backend
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn spawn(self: Box<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = *self;
        tokio::spawn(accept_loop(
            NodeRole::Backend,
            this.listener,
            this.rpc,
            this.settings,
            shutdown,
        ))
    }
}

/// Binds the acceptor matching the server's role. The only place the role is branched on.
pub async fn bind_acceptor(
    server: &ServerDescriptor,
    settings: AcceptSettings,
    rpc: Arc<dyn RpcService>,
    handler: Arc<dyn ConnectionHandler>,
) -> Result<Box<dyn Acceptor>, NodeError> {
    match server.role() {
        NodeRole::Frontend => Ok(Box::new(
            FrontendAcceptor::bind(server, handler, settings).await?,
        )),
        NodeRole::Backend => Ok(Box::new(
            BackendAcceptor::bind(server, rpc, settings).await?,
        )),
    }
}

async fn bind_listener(
    server: &ServerDescriptor,
    role: NodeRole,
) -> Result<(TcpListener, SocketAddr), NodeError> {
    let endpoint = server.endpoint();

    let bound = match TcpListener::bind(endpoint.as_str()).await {
        Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
        Err(e) => Err(e),
    };

    match bound {
        Ok((listener, local_addr)) => {
            tracing::info!("{} listening at {} ({})", role, local_addr, server);
            Ok((listener, local_addr))
        }
        Err(source) => {
            tracing::error!("Failed to bind {} listener on {}: {}", role, endpoint, source);
            Err(NodeError::Bind {
                role,
                endpoint,
                source,
            })
        }
    }
}

/// Serves `source` until shutdown. A failed accept never ends the loop; it is retried after
/// the backoff delay, which resets on the next successful accept.
pub(crate) async fn accept_loop<S, H>(
    role: NodeRole,
    source: S,
    handler: Arc<H>,
    settings: AcceptSettings,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AcceptSource,
    H: ConnectionHandler + ?Sized,
{
    let mut backoff = AcceptBackoff::new(settings.backoff);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = source.accept() => match result {
                Ok((stream, peer)) => {
                    backoff.reset();
                    tracing::debug!("Accepted {} connection from {}", role, peer);

                    let handling = handler.handle(stream, peer);
                    connections.spawn(async move {
                        if let Err(e) = handling.await {
                            tracing::debug!("Connection from {} closed with error: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        "Failed to accept {} connection ({} in a row): {}, retrying in {:?}",
                        role,
                        backoff.consecutive_failures(),
                        e,
                        delay
                    );

                    if sleep_or_shutdown(delay, &mut shutdown).await {
                        break;
                    }
                }
            },

            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished
                    && e.is_panic()
                {
                    tracing::error!("{} connection handler panicked", role);
                }
            }

            _ = shutdown.changed() => break,
        }
    }

    drop(source);
    tracing::info!("{} acceptor stopped accepting", role);

    drain_connections(role, &mut connections, settings.drain_timeout).await;
}

/// Sleeps for `delay`, returning early with `true` if shutdown is signalled meanwhile.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => true,
    }
}

async fn drain_connections(role: NodeRole, connections: &mut JoinSet<()>, drain_timeout: Duration) {
    if connections.is_empty() {
        return;
    }

    tracing::info!(
        "Waiting up to {:?} for {} in-flight {} connection(s)",
        drain_timeout,
        connections.len(),
        role
    );

    let drained = tokio::time::timeout(drain_timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            "Aborting {} {} connection(s) still running after {:?}",
            connections.len(),
            role,
            drain_timeout
        );
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }
}
