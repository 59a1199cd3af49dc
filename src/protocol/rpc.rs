//! Default RPC Collaborator
//!
//! A minimal request/response RPC used by backend nodes. Service objects are registered by name
//! in a concurrent registry and invoked by `service` + `method` with an opaque bincode payload.
//!
//! ## Wire Format
//! Every request and response is one frame: a `u32` big-endian length followed by the bincode
//! encoding of `RpcRequest` / `RpcResponse`. A connection carries any number of request/response
//! pairs, strictly in turn.

use crate::acceptor::handler::{ConnectionHandler, HandleFuture, RpcService};

use anyhow::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

/// Type-erased future returned by a service object call.
pub type CallFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send>>;

/// A business object reachable over RPC.
pub trait ServiceObject: Send + Sync + 'static {
    /// Name the object is registered under, e.g. `"Manager"`.
    fn name(&self) -> &str;

    fn call(&self, method: &str, payload: Vec<u8>) -> CallFuture;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcRequest {
    pub service: String,
    pub method: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RpcResponse {
    Ok(Vec<u8>),
    Err(String),
}

pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];

    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame of {} bytes exceeds the {} byte limit", len, MAX_FRAME_LEN);
    }

    let mut frame = vec![0u8; len as usize];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(frame.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| anyhow::anyhow!("frame of {} bytes is too large", frame.len()))?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Registry-backed RPC server.
pub struct RpcServer {
    services: Arc<DashMap<String, Arc<dyn ServiceObject>>>,
    closed: Arc<AtomicBool>,
}

impl RpcServer {
    pub fn new() -> Self {
        Self {
            services: Arc::new(DashMap::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for RpcServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHandler for RpcServer {
    fn handle(&self, stream: TcpStream, peer: SocketAddr) -> HandleFuture {
        let services = self.services.clone();
        let closed = self.closed.clone();

        Box::pin(async move {
            if closed.load(Ordering::SeqCst) {
                tracing::debug!("Refusing RPC connection from {}: server is closed", peer);
                return Ok(());
            }

            serve_peer(stream, peer, services, closed).await
        })
    }
}

impl RpcService for RpcServer {
    fn register(&self, service: Arc<dyn ServiceObject>) -> Result<()> {
        if self.is_closed() {
            anyhow::bail!("cannot register '{}': RPC server is closed", service.name());
        }

        let name = service.name().to_string();
        if self.services.insert(name.clone(), service).is_some() {
            tracing::warn!("Replaced RPC service: {}", name);
        } else {
            tracing::info!("Registered RPC service: {}", name);
        }

        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.services.clear();
            tracing::info!("RPC server closed");
        }
        Ok(())
    }
}

async fn serve_peer(
    mut stream: TcpStream,
    peer: SocketAddr,
    services: Arc<DashMap<String, Arc<dyn ServiceObject>>>,
    closed: Arc<AtomicBool>,
) -> Result<()> {
    while let Some(frame) = read_frame(&mut stream).await? {
        let response = match bincode::deserialize::<RpcRequest>(&frame) {
            Ok(request) => invoke(&services, &closed, request).await,
            Err(e) => {
                tracing::warn!("Malformed RPC request from {}: {}", peer, e);
                RpcResponse::Err(format!("malformed request: {}", e))
            }
        };

        let encoded = bincode::serialize(&response)?;
        write_frame(&mut stream, &encoded).await?;
    }

    tracing::debug!("RPC peer {} disconnected", peer);
    Ok(())
}

async fn invoke(
    services: &DashMap<String, Arc<dyn ServiceObject>>,
    closed: &AtomicBool,
    request: RpcRequest,
) -> RpcResponse {
    if closed.load(Ordering::SeqCst) {
        return RpcResponse::Err("RPC server is closed".to_string());
    }

    // Clone the Arc out so the registry guard is not held across the call.
    let service = services
        .get(&request.service)
        .map(|entry| entry.value().clone());

    let Some(service) = service else {
        tracing::warn!("Unknown RPC service: {}", request.service);
        return RpcResponse::Err(format!("unknown service: {}", request.service));
    };

    tracing::debug!(
        "Calling {}.{} (payload size: {} bytes)",
        request.service,
        request.method,
        request.payload.len()
    );

    match service.call(&request.method, request.payload).await {
        Ok(result) => RpcResponse::Ok(result),
        Err(e) => RpcResponse::Err(e.to_string()),
    }
}

/// Caller side of the RPC protocol, used by peers and tests.
pub struct RpcClient {
    stream: TcpStream,
}

impl RpcClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self { stream })
    }

    /// Sends one request and waits for its response. Remote errors become `Err`.
    pub async fn call(&mut self, service: &str, method: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        let request = RpcRequest {
            service: service.to_string(),
            method: method.to_string(),
            payload,
        };

        write_frame(&mut self.stream, &bincode::serialize(&request)?).await?;

        let frame = read_frame(&mut self.stream)
            .await?
            .ok_or_else(|| anyhow::anyhow!("connection closed before the response"))?;

        match bincode::deserialize::<RpcResponse>(&frame)? {
            RpcResponse::Ok(result) => Ok(result),
            RpcResponse::Err(message) => Err(anyhow::anyhow!(message)),
        }
    }
}
