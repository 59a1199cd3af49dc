//! Default Protocol Collaborators
//!
//! Concrete implementations of the acceptor contracts, so a node can run out of the box. The
//! dispatch core does not depend on any of these formats.
//!
//! ## Submodules
//! - **`package`**: length-prefixed client packages for frontend nodes (`PackageHandler`).
//! - **`rpc`**: registry-based request/response RPC for backend nodes (`RpcServer`, `RpcClient`).
//! - **`manager`**: the `Manager` service object registered with the RPC server at startup.

pub mod manager;
pub mod package;
pub mod rpc;
