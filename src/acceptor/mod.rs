//! Connection Acceptor Module
//!
//! Owns the node's listening socket and feeds accepted connections to the protocol
//! collaborators. Nothing here touches membership; handlers reach the dispatcher only through
//! an `EventProducer`.
//!
//! ## Submodules
//! - **`handler`**: the `ConnectionHandler` / `RpcService` contracts the acceptors call.
//! - **`listener`**: the frontend and backend acceptors and their shared accept loop.
//! - **`backoff`**: bounded exponential backoff for failing `accept()` calls.

pub mod backoff;
pub mod handler;
pub mod listener;
