//! Windowed traffic analytics.

mod aggregates;
mod engine;
mod severity;

pub use aggregates::{Aggregates, EndpointStats};
pub use engine::AnalyticsEngine;
pub use severity::{Severity, SeverityCounts};
