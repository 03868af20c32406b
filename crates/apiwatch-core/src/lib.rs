//! `apiwatch` Core Library
//!
//! Shared functionality for `apiwatch` components:
//! - Event wire format and SSE frame decoding
//! - Configuration resolution and hierarchy
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod event;
pub mod sse;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use event::Event;
pub use sse::{SseFramer, decode_frame};
