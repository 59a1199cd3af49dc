//! Membership Module
//!
//! Describes the servers that make up the cluster and the table that tracks them.
//!
//! ## Core Types
//! - **`ServerDescriptor`**: identity, endpoint and role (frontend/backend) of one node.
//! - **`ClusterMembership`**: `ServerId -> ServerDescriptor` map, owned exclusively by the
//!   dispatcher. Registration is last-write-wins and removal of an unknown id is a no-op.

pub mod table;
pub mod types;
