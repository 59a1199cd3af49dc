//! Bounded Event Queues
//!
//! The only synchronization mechanism between the network side of a node and its dispatcher.
//! Every queue is a bounded, FIFO, multi-producer/single-consumer tokio channel.
//!
//! ## Capacity Policy
//! - **Control plane** (registration, removal, query): shallow. These events are rare, so a
//!   burst that fills ten slots is an anomaly worth blocking the producer on.
//! - **Data plane** (messages, packages): deep, sized for sustained traffic.
//!
//! A full queue suspends the producer until the dispatcher makes room; events are never
//! dropped or reordered. Once shutdown closes a queue, sends fail with `NodeError::QueueClosed`.

use super::types::{InboundMessage, InboundPackage, MembershipQuery};
use crate::error::NodeError;
use crate::membership::types::{ServerDescriptor, ServerId};

use serde::Deserialize;
use std::fmt;
use tokio::sync::{mpsc, oneshot};

pub const DEFAULT_REGISTRATION_CAPACITY: usize = 10;
pub const DEFAULT_REMOVAL_CAPACITY: usize = 10;
pub const DEFAULT_MESSAGE_CAPACITY: usize = 10_000;
pub const DEFAULT_PACKAGE_CAPACITY: usize = 1_000;
pub const DEFAULT_QUERY_CAPACITY: usize = 10;

/// Identifies one of the dispatcher's queues, mostly for errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Registration,
    Removal,
    Message,
    Package,
    Query,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueKind::Registration => "registration",
            QueueKind::Removal => "removal",
            QueueKind::Message => "message",
            QueueKind::Package => "package",
            QueueKind::Query => "query",
        };
        f.write_str(name)
    }
}

/// Fixed capacity of each queue, chosen once at construction.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueCapacities {
    pub registration: usize,
    pub removal: usize,
    pub message: usize,
    pub package: usize,
    pub query: usize,
}

impl Default for QueueCapacities {
    fn default() -> Self {
        Self {
            registration: DEFAULT_REGISTRATION_CAPACITY,
            removal: DEFAULT_REMOVAL_CAPACITY,
            message: DEFAULT_MESSAGE_CAPACITY,
            package: DEFAULT_PACKAGE_CAPACITY,
            query: DEFAULT_QUERY_CAPACITY,
        }
    }
}

impl QueueCapacities {
    /// Rejects zero capacities; a zero-sized tokio channel cannot be constructed.
    pub fn validate(&self) -> Result<(), NodeError> {
        let capacities = [
            (QueueKind::Registration, self.registration),
            (QueueKind::Removal, self.removal),
            (QueueKind::Message, self.message),
            (QueueKind::Package, self.package),
            (QueueKind::Query, self.query),
        ];

        for (kind, capacity) in capacities {
            if capacity == 0 {
                return Err(NodeError::Config(format!(
                    "{} queue capacity must be greater than zero",
                    kind
                )));
            }
        }

        Ok(())
    }
}

/// Creates the dispatcher's queues and returns both ends.
///
/// Capacities of zero are raised to one; callers that care should run
/// `QueueCapacities::validate` first.
pub fn event_queues(capacities: QueueCapacities) -> (EventProducer, EventReceivers) {
    let (registration_tx, registration_rx) = mpsc::channel(capacities.registration.max(1));
    let (removal_tx, removal_rx) = mpsc::channel(capacities.removal.max(1));
    let (message_tx, message_rx) = mpsc::channel(capacities.message.max(1));
    let (package_tx, package_rx) = mpsc::channel(capacities.package.max(1));
    let (query_tx, query_rx) = mpsc::channel(capacities.query.max(1));

    let producer = EventProducer {
        registration: registration_tx,
        removal: removal_tx,
        message: message_tx,
        package: package_tx,
        query: query_tx,
    };

    let receivers = EventReceivers {
        registration: registration_rx,
        removal: removal_rx,
        message: message_rx,
        package: package_rx,
        query: query_rx,
    };

    (producer, receivers)
}

/// Cloneable producer handle given to connection handlers and service objects.
///
/// All sends are fire-and-forget from the caller's point of view but suspend while the target
/// queue is full.
#[derive(Debug, Clone)]
pub struct EventProducer {
    registration: mpsc::Sender<ServerDescriptor>,
    removal: mpsc::Sender<ServerId>,
    message: mpsc::Sender<InboundMessage>,
    package: mpsc::Sender<InboundPackage>,
    query: mpsc::Sender<MembershipQuery>,
}

impl EventProducer {
    /// Requests that `descriptor` be added to (or replace its entry in) the membership table.
    pub async fn register(&self, descriptor: ServerDescriptor) -> Result<(), NodeError> {
        self.registration
            .send(descriptor)
            .await
            .map_err(|_| NodeError::QueueClosed(QueueKind::Registration))
    }

    /// Requests that the server `id` be removed from the membership table.
    pub async fn remove(&self, id: ServerId) -> Result<(), NodeError> {
        self.removal
            .send(id)
            .await
            .map_err(|_| NodeError::QueueClosed(QueueKind::Removal))
    }

    pub async fn push_message(&self, message: InboundMessage) -> Result<(), NodeError> {
        self.message
            .send(message)
            .await
            .map_err(|_| NodeError::QueueClosed(QueueKind::Message))
    }

    pub async fn push_package(&self, package: InboundPackage) -> Result<(), NodeError> {
        self.package
            .send(package)
            .await
            .map_err(|_| NodeError::QueueClosed(QueueKind::Package))
    }

    /// Returns every registered descriptor, sorted by id.
    ///
    /// Registrations and removals this caller awaited before querying are always reflected:
    /// the dispatcher applies buffered control-plane events before answering.
    pub async fn members(&self) -> Result<Vec<ServerDescriptor>, NodeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.query(MembershipQuery::Snapshot(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| NodeError::QueueClosed(QueueKind::Query))
    }

    pub async fn lookup(&self, id: ServerId) -> Result<Option<ServerDescriptor>, NodeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.query(MembershipQuery::Lookup(id, reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| NodeError::QueueClosed(QueueKind::Query))
    }

    pub async fn count(&self) -> Result<usize, NodeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.query(MembershipQuery::Count(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| NodeError::QueueClosed(QueueKind::Query))
    }

    async fn query(&self, query: MembershipQuery) -> Result<(), NodeError> {
        self.query
            .send(query)
            .await
            .map_err(|_| NodeError::QueueClosed(QueueKind::Query))
    }

    /// Configured capacity of a queue.
    pub fn max_capacity(&self, kind: QueueKind) -> usize {
        match kind {
            QueueKind::Registration => self.registration.max_capacity(),
            QueueKind::Removal => self.removal.max_capacity(),
            QueueKind::Message => self.message.max_capacity(),
            QueueKind::Package => self.package.max_capacity(),
            QueueKind::Query => self.query.max_capacity(),
        }
    }

    /// Free slots currently left in a queue.
    pub fn available(&self, kind: QueueKind) -> usize {
        match kind {
            QueueKind::Registration => self.registration.capacity(),
            QueueKind::Removal => self.removal.capacity(),
            QueueKind::Message => self.message.capacity(),
            QueueKind::Package => self.package.capacity(),
            QueueKind::Query => self.query.capacity(),
        }
    }

    /// True once the dispatcher has closed its queues.
    pub fn is_closed(&self) -> bool {
        self.registration.is_closed()
    }
}

/// The consuming ends of the queues. Owned by exactly one dispatcher.
#[derive(Debug)]
pub struct EventReceivers {
    pub(crate) registration: mpsc::Receiver<ServerDescriptor>,
    pub(crate) removal: mpsc::Receiver<ServerId>,
    pub(crate) message: mpsc::Receiver<InboundMessage>,
    pub(crate) package: mpsc::Receiver<InboundPackage>,
    pub(crate) query: mpsc::Receiver<MembershipQuery>,
}

impl EventReceivers {
    /// Closes every queue for new sends: message, registration, removal, package, query.
    ///
    /// Events already buffered stay receivable so the dispatcher can drain them.
    pub fn close(&mut self) {
        self.message.close();
        self.registration.close();
        self.removal.close();
        self.package.close();
        self.query.close();
    }
}
