//! Cluster Node Library
//!
//! This library crate defines the core modules of a cluster server node. It serves as the
//! foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! The node is composed of loosely coupled subsystems around one single-writer dispatcher:
//!
//! - **`membership`**: Server descriptors and the membership table. The table is owned by the
//!   dispatcher and never shared, so it needs no locking.
//! - **`dispatch`**: Bounded event queues, the dispatcher loop that drains them fairly, and the
//!   fire-and-forget output sink for messages and packages.
//! - **`acceptor`**: Role-selected TCP acceptors (frontend clients or backend RPC peers) and the
//!   collaborator traits they hand connections to.
//! - **`protocol`**: Default collaborators: client package framing, the RPC server and client,
//!   and the `Manager` service object.
//! - **`node`**: Configuration plus the startup and shutdown sequence tying it all together.

pub mod acceptor;
pub mod dispatch;
pub mod error;
pub mod membership;
pub mod node;
pub mod protocol;
