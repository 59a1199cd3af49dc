//! Collaborator Contracts
//!
//! The acceptors know nothing about wire protocols. They hand every accepted connection to one
//! of these collaborators, which own the stream from then on.

use crate::protocol::rpc::ServiceObject;

use anyhow::Result;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpStream;

/// Type-erased future returned by connection handlers.
pub type HandleFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Serves one accepted connection until it ends.
///
/// `handle` is called once per connection on the acceptor's task; the returned future is then
/// driven on its own task, so it must own everything it needs.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, stream: TcpStream, peer: SocketAddr) -> HandleFuture;
}

/// The backend RPC collaborator.
///
/// `register` is called once at startup with the node's manager object, `handle` once per
/// accepted backend connection and `close` once at shutdown.
pub trait RpcService: ConnectionHandler {
    fn register(&self, service: Arc<dyn ServiceObject>) -> Result<()>;

    fn close(&self) -> Result<()>;
}
