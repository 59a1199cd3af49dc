//! Event Dispatch Module
//!
//! The coordination core of a node: bounded queues filled by the network side and a single
//! dispatcher task that drains them.
//!
//! ## Data Flow
//! 1. **Produce**: connection handlers and service objects hold an `EventProducer` and push
//!    registrations, removals, messages, packages or membership queries.
//! 2. **Queue**: each kind has its own bounded FIFO channel; a full channel blocks the producer.
//! 3. **Dispatch**: the `Dispatcher` picks ready queues fairly, mutates the membership table it
//!    owns, answers queries and forwards payloads to the `OutputSink`.
//!
//! Ordering is guaranteed within a queue only. Nothing outside the dispatcher ever holds a
//! reference to the membership table, which is why no lock guards it.

pub mod dispatcher;
pub mod queue;
pub mod sink;
pub mod types;

#[cfg(test)]
mod tests;
