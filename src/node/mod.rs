//! Node
//!
//! Ties the pieces together: a `NodeConfig` says who this server is, and `Node` starts the
//! acceptor, dispatcher and output sink for it and stops them again in order.
//!
//! ## Submodules
//! - **`config`**: TOML-loadable configuration with defaults for every tunable.
//! - **`lifecycle`**: `Node` (not yet started) and `RunningNode` (started) with `stop`.

pub mod config;
pub mod lifecycle;
