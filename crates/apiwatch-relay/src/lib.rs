//! apiwatch Relay Server Library
//!
//! Core functionality for the apiwatch relay:
//! - Subscriber registry with bounded per-subscriber queues
//! - Stream relay owning a single upstream connection
//! - HTTP surface (`/logs` push channel, `/health`)

pub mod registry;
pub mod relay;
pub mod server;

pub use relay::{RelayError, RelayState, StreamRelay, Subscription};
