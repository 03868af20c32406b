//! apiwatch dashboard library
//!
//! Sliding-window analytics over the relay's event stream and the consumer
//! that keeps it fed.

pub mod analytics;
pub mod consumer;

pub use analytics::{Aggregates, AnalyticsEngine, EndpointStats, Severity};
pub use consumer::{ConsumerError, ConsumerStatus, DashboardConsumer, DashboardState};
