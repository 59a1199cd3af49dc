//! Cluster Membership Table
//!
//! The live mapping of known peer servers. A `ClusterMembership` value is created empty by the
//! dispatcher and lives inside its task; the mutating methods are crate-private so that nothing
//! but the dispatcher can change it. Other components see membership only through query
//! messages or the final value returned when the dispatcher stops.

use super::types::{NodeRole, ServerDescriptor, ServerId};

use std::collections::HashMap;

/// Mapping from server id to its descriptor. Exactly one entry per id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterMembership {
    servers: HashMap<ServerId, ServerDescriptor>,
}

impl ClusterMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a descriptor keyed by its id.
    ///
    /// Last write wins: an existing entry for the same id is replaced as a whole and returned.
    pub(crate) fn register(&mut self, descriptor: ServerDescriptor) -> Option<ServerDescriptor> {
        self.servers.insert(descriptor.id.clone(), descriptor)
    }

    /// Deletes the entry for `id`. Removing an unknown id is a no-op and returns `None`.
    pub(crate) fn remove(&mut self, id: &ServerId) -> Option<ServerDescriptor> {
        self.servers.remove(id)
    }

    pub fn get(&self, id: &ServerId) -> Option<&ServerDescriptor> {
        self.servers.get(id)
    }

    pub fn contains(&self, id: &ServerId) -> bool {
        self.servers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerDescriptor> {
        self.servers.values()
    }

    /// All descriptors, sorted by id so callers get a stable order.
    pub fn snapshot(&self) -> Vec<ServerDescriptor> {
        let mut servers: Vec<ServerDescriptor> = self.servers.values().cloned().collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        servers
    }

    /// Descriptors of every known server playing `role`, sorted by id.
    pub fn with_role(&self, role: NodeRole) -> Vec<ServerDescriptor> {
        self.snapshot()
            .into_iter()
            .filter(|server| server.role() == role)
            .collect()
    }
}
