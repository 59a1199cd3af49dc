//! Single-Writer Dispatcher
//!
//! The one task allowed to touch the `ClusterMembership` table. It multiplexes the event queues
//! with `tokio::select!` (unbiased, so ready queues are picked at random and none can starve),
//! applies control-plane events to the table and forwards data-plane events to the output sink.
//!
//! ## Invariants
//! - The table is created here, never shared, and handed back when the loop ends.
//! - A dispatch step never awaits: table updates are in-memory, forwarding uses `try_send`
//!   and query replies use oneshot channels.
//! - A failed step is logged and the loop moves on; nothing escapes the loop.
//! - A query sees every registration and removal its caller enqueued before sending it: pending
//!   control-plane events are applied before the answer is computed.

use super::queue::EventReceivers;
use super::sink::{OutputSink, SinkRecord, SinkRejection};
use super::types::{Event, MembershipQuery};
use crate::membership::table::ClusterMembership;

use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure of a single dispatch step. Never stops the loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The output sink refused a forwarded record.
    #[error("{0}")]
    Sink(SinkRejection),

    /// The caller of a membership query went away before the answer was ready.
    #[error("query requester dropped its reply channel")]
    QueryAbandoned,
}

/// Counters of processed events, one per queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub registrations: u64,
    pub removals: u64,
    pub messages: u64,
    pub packages: u64,
    pub queries: u64,
    pub failures: u64,
}

impl DispatchStats {
    pub fn total(&self) -> u64 {
        self.registrations + self.removals + self.messages + self.packages + self.queries
    }
}

/// The single-writer event loop.
pub struct Dispatcher {
    membership: ClusterMembership,
    receivers: EventReceivers,
    sink: OutputSink,
    stats: DispatchStats,
    drain_timeout: Duration,
}

impl Dispatcher {
    pub fn new(receivers: EventReceivers, sink: OutputSink) -> Self {
        Self {
            membership: ClusterMembership::new(),
            receivers,
            sink,
            stats: DispatchStats::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Upper bound on how long buffered events are drained after `close` fires.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn membership(&self) -> &ClusterMembership {
        &self.membership
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Runs until `close` fires (or its sender is dropped), then closes the queues, drains what
    /// is already buffered and returns the final membership table.
    pub async fn run(mut self, mut close: oneshot::Receiver<()>) -> ClusterMembership {
        tracing::info!("Dispatcher started");

        loop {
            let event = tokio::select! {
                Some(descriptor) = self.receivers.registration.recv() => Event::Register(descriptor),
                Some(id) = self.receivers.removal.recv() => Event::Remove(id),
                Some(message) = self.receivers.message.recv() => Event::Message(message),
                Some(package) = self.receivers.package.recv() => Event::Package(package),
                Some(query) = self.receivers.query.recv() => Event::Query(query),
                _ = &mut close => break,
            };

            self.handle(event);
        }

        self.receivers.close();

        let drain_timeout = self.drain_timeout;
        if tokio::time::timeout(drain_timeout, self.drain()).await.is_err() {
            tracing::warn!(
                "Dispatcher drain exceeded {:?}, remaining events are discarded",
                drain_timeout
            );
        }

        tracing::info!(
            "Dispatcher stopped: {} events ({} registrations, {} removals, {} messages, {} packages, {} queries), {} failures, {} servers known",
            self.stats.total(),
            self.stats.registrations,
            self.stats.removals,
            self.stats.messages,
            self.stats.packages,
            self.stats.queries,
            self.stats.failures,
            self.membership.len()
        );

        self.membership
    }

    /// Processes what was buffered before the queues were closed, queue by queue so that
    /// per-queue FIFO order still holds.
    async fn drain(&mut self) {
        while let Some(descriptor) = self.receivers.registration.recv().await {
            self.handle(Event::Register(descriptor));
        }
        while let Some(id) = self.receivers.removal.recv().await {
            self.handle(Event::Remove(id));
        }
        while let Some(message) = self.receivers.message.recv().await {
            self.handle(Event::Message(message));
        }
        while let Some(package) = self.receivers.package.recv().await {
            self.handle(Event::Package(package));
        }
        while let Some(query) = self.receivers.query.recv().await {
            self.handle(Event::Query(query));
        }
    }

    fn handle(&mut self, event: Event) {
        if let Err(e) = self.dispatch(event) {
            self.stats.failures += 1;
            tracing::error!("Dispatch failed: {}", e);
        }
    }

    /// Applies a single event. Exposed so the semantics can be exercised without a runtime.
    pub fn dispatch(&mut self, event: Event) -> Result<(), DispatchError> {
        match event {
            Event::Register(descriptor) => {
                self.stats.registrations += 1;
                let shown = descriptor.to_string();

                match self.membership.register(descriptor) {
                    Some(previous) => {
                        tracing::info!("Replaced server {} with {}", previous, shown);
                    }
                    None => {
                        tracing::info!(
                            "Registered server {} (cluster size now: {})",
                            shown,
                            self.membership.len()
                        );
                    }
                }
                Ok(())
            }

            Event::Remove(id) => {
                self.stats.removals += 1;

                match self.membership.remove(&id) {
                    Some(removed) => {
                        tracing::info!(
                            "Removed server {} (cluster size now: {})",
                            removed,
                            self.membership.len()
                        );
                    }
                    None => {
                        tracing::debug!("Removal of unknown server {} ignored", id);
                    }
                }
                Ok(())
            }

            Event::Message(message) => {
                self.stats.messages += 1;
                self.sink
                    .forward(SinkRecord::Message(message.to_string()))
                    .map_err(DispatchError::Sink)
            }

            Event::Package(package) => {
                self.stats.packages += 1;
                self.sink
                    .forward(SinkRecord::Package(package.render()))
                    .map_err(DispatchError::Sink)
            }

            Event::Query(query) => {
                self.stats.queries += 1;
                self.apply_pending_control();
                self.answer(query)
            }
        }
    }

    /// Applies registrations, then removals, already buffered on the control-plane queues.
    ///
    /// A producer that awaited `register` before querying has its event in the buffer by now,
    /// so the answer reflects it. Never waits for new events.
    fn apply_pending_control(&mut self) {
        while let Ok(descriptor) = self.receivers.registration.try_recv() {
            self.handle(Event::Register(descriptor));
        }
        while let Ok(id) = self.receivers.removal.try_recv() {
            self.handle(Event::Remove(id));
        }
    }

    fn answer(&self, query: MembershipQuery) -> Result<(), DispatchError> {
        let delivered = match query {
            MembershipQuery::Snapshot(reply) => reply.send(self.membership.snapshot()).is_ok(),
            MembershipQuery::Lookup(id, reply) => {
                reply.send(self.membership.get(&id).cloned()).is_ok()
            }
            MembershipQuery::Count(reply) => reply.send(self.membership.len()).is_ok(),
        };

        if delivered {
            Ok(())
        } else {
            Err(DispatchError::QueryAbandoned)
        }
    }
}
