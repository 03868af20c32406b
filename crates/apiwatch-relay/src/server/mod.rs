//! HTTP surface of the relay.

pub mod health;
pub mod routes;
pub mod slot;


pub use routes::{AppState, build_router};
pub use slot::RelaySlot;
