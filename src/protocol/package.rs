//! Client Package Framing
//!
//! Default client protocol of a frontend node. A client sends a stream of packages, each framed
//! as:
//!
//! ```text
//! +----------------+------------------+-----------------+
//! | type: u32 (BE) | length: u32 (BE) | body: [length]  |
//! +----------------+------------------+-----------------+
//! ```
//!
//! `PackageHandler` decodes frames and pushes each one to the package queue; the dispatcher
//! renders and forwards them.

use crate::acceptor::handler::{ConnectionHandler, HandleFuture};
use crate::dispatch::queue::EventProducer;
use crate::dispatch::types::InboundPackage;

use anyhow::Result;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

pub const PACKAGE_HEADER_LEN: usize = 8;
pub const MAX_PACKAGE_BODY: u32 = 64 * 1024;

/// Reads one package. Returns `Ok(None)` when the peer closes cleanly between frames.
pub async fn read_package<R>(reader: &mut R) -> Result<Option<InboundPackage>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; PACKAGE_HEADER_LEN];

    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let package_type = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

    if length > MAX_PACKAGE_BODY {
        anyhow::bail!(
            "package body of {} bytes exceeds the {} byte limit",
            length,
            MAX_PACKAGE_BODY
        );
    }

    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body).await?;

    Ok(Some(InboundPackage::new(package_type, body)?))
}

pub async fn write_package<W>(writer: &mut W, package: &InboundPackage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if package.length() > MAX_PACKAGE_BODY {
        anyhow::bail!(
            "package body of {} bytes exceeds the {} byte limit",
            package.length(),
            MAX_PACKAGE_BODY
        );
    }

    let mut frame = Vec::with_capacity(PACKAGE_HEADER_LEN + package.body().len());
    frame.extend_from_slice(&package.package_type().to_be_bytes());
    frame.extend_from_slice(&package.length().to_be_bytes());
    frame.extend_from_slice(package.body());

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Frontend connection handler: every decoded package goes to the dispatcher.
#[derive(Clone)]
pub struct PackageHandler {
    producer: EventProducer,
}

impl PackageHandler {
    pub fn new(producer: EventProducer) -> Self {
        Self { producer }
    }
}

impl ConnectionHandler for PackageHandler {
    fn handle(&self, stream: TcpStream, peer: SocketAddr) -> HandleFuture {
        let producer = self.producer.clone();
        Box::pin(serve_client(stream, peer, producer))
    }
}

async fn serve_client(mut stream: TcpStream, peer: SocketAddr, producer: EventProducer) -> Result<()> {
    let mut received = 0u64;

    while let Some(package) = read_package(&mut stream).await? {
        tracing::trace!(
            "Package type {} ({} bytes) from {}",
            package.package_type(),
            package.length(),
            peer
        );

        producer.push_package(package).await?;
        received += 1;
    }

    tracing::debug!("Client {} disconnected after {} package(s)", peer, received);
    Ok(())
}
