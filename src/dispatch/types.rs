use crate::error::NodeError;
use crate::membership::types::{ServerDescriptor, ServerId};

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

/// Routing direction of an application message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageKind {
    /// Travels from the cluster towards a connected client.
    ToClient,
    /// Travels from a client towards the gate (frontend) node.
    ToGate,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::ToClient => f.write_str("to_client"),
            MessageKind::ToGate => f.write_str("to_gate"),
        }
    }
}

/// An application-level event produced by a connection handler and consumed once by the
/// dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundMessage {
    pub kind: MessageKind,
    /// Human-readable summary, used when the message is logged.
    pub summary: String,
    /// Opaque payload; the dispatcher never looks inside.
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(kind: MessageKind, summary: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            kind,
            summary: summary.into(),
            payload,
        }
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({} bytes)",
            self.kind,
            self.summary,
            self.payload.len()
        )
    }
}

/// A framed payload with a type discriminator.
///
/// `length` always equals `body.len()`: the only way to build a package is `InboundPackage::new`,
/// which derives the length from the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPackage {
    package_type: u32,
    length: u32,
    body: Vec<u8>,
}

impl InboundPackage {
    /// Builds a package from its type and body. Fails if the body is longer than `u32::MAX`.
    pub fn new(package_type: u32, body: Vec<u8>) -> Result<Self, NodeError> {
        let length = body_length(body.len())?;

        Ok(Self {
            package_type,
            length,
            body,
        })
    }

    pub fn package_type(&self) -> u32 {
        self.package_type
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// The summary forwarded to standard output: `type: 7, length: 5, data: hello`.
    ///
    /// Non UTF-8 bodies are rendered lossily so a malformed package can never fail dispatch.
    pub fn render(&self) -> String {
        format!(
            "type: {}, length: {}, data: {}",
            self.package_type,
            self.length,
            String::from_utf8_lossy(&self.body)
        )
    }
}

pub(crate) fn body_length(len: usize) -> Result<u32, NodeError> {
    u32::try_from(len).map_err(|_| NodeError::PackageTooLarge(len))
}

/// A read request against the membership table.
///
/// The table belongs to the dispatcher, so reads travel through the query queue and the answer
/// comes back on a oneshot channel.
#[derive(Debug)]
pub enum MembershipQuery {
    /// All descriptors, sorted by id.
    Snapshot(oneshot::Sender<Vec<ServerDescriptor>>),
    /// The descriptor registered under one id, if any.
    Lookup(ServerId, oneshot::Sender<Option<ServerDescriptor>>),
    /// Number of registered servers.
    Count(oneshot::Sender<usize>),
}

/// One unit of work for the dispatcher, tagged by the queue it came from.
#[derive(Debug)]
pub enum Event {
    Register(ServerDescriptor),
    Remove(ServerId),
    Message(InboundMessage),
    Package(InboundPackage),
    Query(MembershipQuery),
}
