//! apiwatch Producer Library
//!
//! Simulated request telemetry for exercising the relay and dashboard:
//! - Random event generator with latency and size spikes
//! - HTTP surface (`/logs` SSE stream, `/api/status`, `/health`)

pub mod routes;
pub mod simulate;
