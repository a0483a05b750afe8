//! taskdeck-core library.
//!
//! Client-side state for a team task board: a time-bounded identity cache,
//! project membership resolution, a task snapshot kept in step with a remote
//! store, category filters, and the task status state machine.
//!
//! # Conventions
//!
//! - **Errors**: `TaskDeckError` in the library layers, `anyhow::Result` with
//!   context at config and binary edges.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod clock;
pub mod config;
pub mod error;
pub mod filter;
pub mod ids;
pub mod membership;
pub mod model;
pub mod project;
pub mod remote;
pub mod retry;
pub mod session;
pub mod status;
pub mod store;
