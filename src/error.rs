//! Error types for the node lifecycle and its event queues

use crate::dispatch::queue::QueueKind;
use crate::membership::types::NodeRole;

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the node to its owner.
///
/// Everything that can go wrong *inside* the dispatch loop is logged there and never becomes
/// a `NodeError`; these variants cover startup, producers and shutdown.
#[derive(Error, Debug)]
pub enum NodeError {
    /// The listener for the node's role could not be bound. Fatal at startup.
    #[error("failed to bind {role} listener on {endpoint}: {source}")]
    Bind {
        role: NodeRole,
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration was rejected before startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A producer sent on a queue that has already been closed by shutdown.
    #[error("{0} queue is closed")]
    QueueClosed(QueueKind),

    /// The RPC collaborator refused a registration or failed to close.
    #[error("RPC collaborator error: {0}")]
    Rpc(String),

    /// The dispatcher task terminated abnormally.
    #[error("dispatcher task failed: {0}")]
    Dispatcher(String),

    /// A package body does not fit the `u32` length field.
    #[error("package body of {0} bytes does not fit a u32 length")]
    PackageTooLarge(usize),

    /// The dispatcher did not hand back its membership within the drain window.
    #[error("dispatcher did not drain within {0:?}")]
    DrainTimeout(Duration),
}
