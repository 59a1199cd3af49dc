use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a server in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ServerId(pub String);

impl ServerId {
    /// Generates a random UUID v4-based id, used when the operator does not name the node.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ServerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The role a node plays in the cluster, derived from `ServerDescriptor::is_frontend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// Accepts client-facing connections.
    Frontend,
    /// Accepts peer RPC connections.
    Backend,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Frontend => f.write_str("frontend"),
            NodeRole::Backend => f.write_str("backend"),
        }
    }
}

/// Identifying record for one cluster node.
///
/// Descriptors are immutable once registered: a changed descriptor for the same id
/// is registered again and replaces the old entry as a whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ServerDescriptor {
    pub id: ServerId,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub is_frontend: bool,
}

impl ServerDescriptor {
    pub fn new(id: impl Into<ServerId>, host: impl Into<String>, port: u16, is_frontend: bool) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            is_frontend,
        }
    }

    pub fn role(&self) -> NodeRole {
        if self.is_frontend {
            NodeRole::Frontend
        } else {
            NodeRole::Backend
        }
    }

    /// The `host:port` pair the node listens on.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parses the compact `id@host:port` form used on the command line.
    pub fn parse_compact(raw: &str, is_frontend: bool) -> anyhow::Result<Self> {
        let (id, endpoint) = raw
            .split_once('@')
            .ok_or_else(|| anyhow::anyhow!("expected <id>@<host>:<port>, got '{}'", raw))?;
        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("missing port in '{}'", raw))?;

        if id.is_empty() || host.is_empty() {
            anyhow::bail!("empty id or host in '{}'", raw);
        }

        Ok(Self::new(id, host, port.parse()?, is_frontend))
    }
}

impl fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}@{}:{})", self.id, self.role(), self.host, self.port)
    }
}
