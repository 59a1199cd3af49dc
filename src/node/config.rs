//! Node Configuration
//!
//! Everything a node needs to start, loadable from a TOML file:
//!
//! ```toml
//! drain_timeout_ms = 5000
//!
//! [server]
//! id = "gate-1"
//! host = "0.0.0.0"
//! port = 3250
//! is_frontend = true
//!
//! [master]
//! id = "master"
//! host = "10.0.0.9"
//! port = 7000
//!
//! [queues]
//! message = 20000
//!
//! [accept]
//! max_backoff_ms = 2000
//! ```
//!
//! Omitted sections fall back to their defaults.

use crate::acceptor::backoff::BackoffConfig;
use crate::acceptor::listener::AcceptSettings;
use crate::dispatch::queue::QueueCapacities;
use crate::dispatch::sink::DEFAULT_SINK_CAPACITY;
use crate::error::NodeError;
use crate::membership::types::ServerDescriptor;

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// This node's own descriptor; its role picks the acceptor.
    pub server: ServerDescriptor,

    /// Master server seeded into membership at startup.
    #[serde(default)]
    pub master: Option<ServerDescriptor>,

    #[serde(default)]
    pub queues: QueueCapacities,

    #[serde(default)]
    pub accept: BackoffConfig,

    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
}

fn default_drain_timeout_ms() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_MS
}

fn default_sink_capacity() -> usize {
    DEFAULT_SINK_CAPACITY
}

impl NodeConfig {
    /// A configuration with every tunable at its default.
    pub fn new(server: ServerDescriptor) -> Self {
        Self {
            server,
            master: None,
            queues: QueueCapacities::default(),
            accept: BackoffConfig::default(),
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            sink_capacity: DEFAULT_SINK_CAPACITY,
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, NodeError> {
        let config: NodeConfig =
            toml::from_str(raw).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        if self.server.id.as_str().is_empty() {
            return Err(NodeError::Config("server id must not be empty".to_string()));
        }
        if self.server.host.is_empty() {
            return Err(NodeError::Config("server host must not be empty".to_string()));
        }
        if self.sink_capacity == 0 {
            return Err(NodeError::Config(
                "sink capacity must be greater than zero".to_string(),
            ));
        }
        if let Some(master) = &self.master
            && master.id.as_str().is_empty()
        {
            return Err(NodeError::Config("master id must not be empty".to_string()));
        }

        self.queues.validate()
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn accept_settings(&self) -> AcceptSettings {
        AcceptSettings {
            backoff: self.accept,
            drain_timeout: self.drain_timeout(),
        }
    }
}
