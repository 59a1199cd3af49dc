//! Node Lifecycle
//!
//! Orchestrates startup and shutdown around the dispatcher.
//!
//! ## Startup
//! 1. Register the `Manager` service object with the RPC collaborator.
//! 2. Bind the one acceptor matching the node's role (fatal on failure).
//! 3. Spawn the output sink, the dispatcher and the accept loop.
//! 4. Seed the configured master through the registration queue.
//!
//! ## Shutdown
//! 1. Stop accepting and let in-flight connections drain (bounded).
//! 2. Close the queues and let the dispatcher drain what is buffered (bounded).
//! 3. Close the RPC collaborator.

use super::config::NodeConfig;
use crate::acceptor::handler::{ConnectionHandler, RpcService};
use crate::acceptor::listener::bind_acceptor;
use crate::dispatch::dispatcher::Dispatcher;
use crate::dispatch::queue::{EventProducer, EventReceivers, event_queues};
use crate::dispatch::sink::OutputSink;
use crate::error::NodeError;
use crate::membership::table::ClusterMembership;
use crate::membership::types::NodeRole;
use crate::protocol::manager::Manager;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Extra time granted on top of the drain timeout before the dispatcher is given up on.
const DISPATCHER_GRACE: Duration = Duration::from_secs(1);
const SINK_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// A configured node that has not started yet.
///
/// The queues exist from construction on, so collaborators that need a producer (such as a
/// frontend `PackageHandler`) can be built before `start`.
pub struct Node {
    config: NodeConfig,
    producer: EventProducer,
    receivers: EventReceivers,
    sink: Option<OutputSink>,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        let (producer, receivers) = event_queues(config.queues);

        Self {
            config,
            producer,
            receivers,
            sink: None,
        }
    }

    /// Routes dispatcher output to `sink` instead of spawning the default log/stdout worker.
    pub fn with_sink(mut self, sink: OutputSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn producer(&self) -> EventProducer {
        self.producer.clone()
    }

    /// Starts the node and returns once it is accepting connections.
    pub async fn start(
        self,
        rpc: Arc<dyn RpcService>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<RunningNode, NodeError> {
        self.config.validate()?;

        let server = self.config.server.clone();
        tracing::info!("Starting {} node {}", server.role(), server);

        rpc.register(Arc::new(Manager::new(self.producer.clone())))
            .map_err(|e| NodeError::Rpc(e.to_string()))?;

        let acceptor =
            match bind_acceptor(&server, self.config.accept_settings(), rpc.clone(), handler).await {
                Ok(acceptor) => acceptor,
                Err(e) => {
                    if let Err(close_err) = rpc.close() {
                        tracing::warn!("Failed to close RPC after bind failure: {}", close_err);
                    }
                    return Err(e);
                }
            };

        let (sink, sink_task) = match self.sink {
            Some(sink) => (sink, None),
            None => {
                let (sink, task) = OutputSink::spawn(self.config.sink_capacity);
                (sink, Some(task))
            }
        };

        let (close_tx, close_rx) = oneshot::channel();
        let dispatcher = Dispatcher::new(self.receivers, sink)
            .with_drain_timeout(self.config.drain_timeout());
        let dispatcher_task = tokio::spawn(dispatcher.run(close_rx));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let role = acceptor.role();
        let local_addr = acceptor.local_addr();
        let acceptor_task = acceptor.spawn(shutdown_rx);

        let running = RunningNode {
            config: self.config,
            role,
            local_addr,
            producer: self.producer,
            rpc,
            shutdown_tx,
            close_tx,
            acceptor_task,
            dispatcher_task,
            sink_task,
        };

        if let Some(master) = running.config.master.clone() {
            tracing::info!("Seeding master server {}", master);
            running.producer.register(master).await?;
        }

        Ok(running)
    }

    /// Starts the node, waits for `signal`, then stops it and returns the final membership.
    pub async fn run<F>(
        self,
        rpc: Arc<dyn RpcService>,
        handler: Arc<dyn ConnectionHandler>,
        signal: F,
    ) -> Result<ClusterMembership, NodeError>
    where
        F: Future<Output = ()>,
    {
        let running = self.start(rpc, handler).await?;
        signal.await;
        running.stop().await
    }
}

/// Handle to a started node.
pub struct RunningNode {
    config: NodeConfig,
    role: NodeRole,
    local_addr: SocketAddr,
    producer: EventProducer,
    rpc: Arc<dyn RpcService>,
    shutdown_tx: watch::Sender<bool>,
    close_tx: oneshot::Sender<()>,
    acceptor_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<ClusterMembership>,
    sink_task: Option<JoinHandle<()>>,
}

impl RunningNode {
    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Address the acceptor is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn producer(&self) -> EventProducer {
        self.producer.clone()
    }

    /// Shuts the node down and returns the membership table as the dispatcher left it.
    pub async fn stop(self) -> Result<ClusterMembership, NodeError> {
        let RunningNode {
            config,
            producer,
            rpc,
            shutdown_tx,
            close_tx,
            acceptor_task,
            mut dispatcher_task,
            sink_task,
            ..
        } = self;

        tracing::info!("Server {} is stopping...", config.server);

        // 1. No new connections; in-flight ones get the drain window.
        let _ = shutdown_tx.send(true);
        if let Err(e) = acceptor_task.await {
            tracing::error!("Acceptor task failed: {}", e);
        }

        // 2. Close the queues and collect the membership table.
        drop(producer);
        let _ = close_tx.send(());

        let deadline = config.drain_timeout() + DISPATCHER_GRACE;
        let outcome = match tokio::time::timeout(deadline, &mut dispatcher_task).await {
            Ok(Ok(membership)) => Ok(membership),
            Ok(Err(e)) => Err(NodeError::Dispatcher(e.to_string())),
            Err(_) => {
                dispatcher_task.abort();
                Err(NodeError::DrainTimeout(deadline))
            }
        };

        // 3. Release the RPC collaborator whatever happened above.
        let closed = rpc.close().map_err(|e| NodeError::Rpc(e.to_string()));

        if let Some(task) = sink_task
            && tokio::time::timeout(SINK_FLUSH_TIMEOUT, task).await.is_err()
        {
            tracing::warn!("Output sink did not flush within {:?}", SINK_FLUSH_TIMEOUT);
        }

        let membership = outcome?;
        closed?;

        tracing::info!(
            "Server {} stopped with {} known server(s)",
            config.server,
            membership.len()
        );
        Ok(membership)
    }
}
