//! Fixed-capacity recency window over decoded events.

use std::collections::VecDeque;

use apiwatch_core::Event;
use apiwatch_core::config::AnalyticsConfig;

use super::aggregates::Aggregates;

/// Sliding window of the most recent events.
///
/// Events are kept in arrival order. Timestamps are never used to reorder.
#[derive(Debug, Clone)]
pub struct AnalyticsEngine {
    config: AnalyticsConfig,
    window: VecDeque<Event>,
}

impl AnalyticsEngine {
    pub fn new(config: AnalyticsConfig) -> apiwatch_core::Result<Self> {
        config.validate()?;
        Ok(Self {
            window: VecDeque::with_capacity(config.window_capacity),
            config,
        })
    }

    /// Append an event, evicting the oldest ones beyond capacity.
    pub fn ingest(&mut self, event: Event) {
        self.window.push_back(event);
        while self.window.len() > self.config.window_capacity {
            self.window.pop_front();
        }
    }

    /// Recompute every aggregate from the current window.
    pub fn snapshot(&self) -> Aggregates {
        Aggregates::compute(&self.window, &self.config)
    }

    /// Window contents, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.window.iter()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.config.window_capacity
    }

    pub const fn config(&self) -> &AnalyticsConfig {
        &self.config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn engine(capacity: usize) -> AnalyticsEngine {
        AnalyticsEngine::new(AnalyticsConfig {
            window_capacity: capacity,
            ..AnalyticsConfig::default()
        })
        .unwrap()
    }

    fn ev(endpoint: &str, status: u16, latency: f64) -> Event {
        Event::new(endpoint, status, latency, "2026-01-01T00:00:00")
    }

    fn endpoints(engine: &AnalyticsEngine) -> Vec<&str> {
        engine.events().map(|e| e.endpoint.as_str()).collect()
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = AnalyticsEngine::new(AnalyticsConfig {
            window_capacity: 0,
            ..AnalyticsConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, apiwatch_core::Error::Config(_)));
    }

    #[test]
    fn rejects_negative_weight() {
        let result = AnalyticsEngine::new(AnalyticsConfig {
            error_weight: -0.1,
            ..AnalyticsConfig::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn new_engine_is_empty() {
        let engine = engine(100);
        assert!(engine.is_empty());
        assert_eq!(engine.capacity(), 100);
        assert_eq!(engine.snapshot(), Aggregates::default());
    }

    #[test]
    fn window_keeps_most_recent_in_arrival_order() {
        let mut engine = engine(2);
        engine.ingest(ev("/e1", 200, 10.0));
        engine.ingest(ev("/e2", 200, 20.0));
        engine.ingest(ev("/e3", 200, 30.0));

        assert_eq!(engine.len(), 2);
        assert_eq!(endpoints(&engine), ["/e2", "/e3"]);
        assert_eq!(engine.snapshot().avg_latency_ms, 25.0);
    }

    #[test]
    fn length_is_min_of_ingested_and_capacity() {
        for capacity in [1, 3, 10] {
            let mut engine = engine(capacity);
            for n in 1..=15 {
                engine.ingest(ev(&format!("/e{n}"), 200, 1.0));
                assert_eq!(engine.len(), n.min(capacity));
                assert_eq!(engine.events().last().unwrap().endpoint, format!("/e{n}"));
            }
        }
    }

    #[test]
    fn timestamps_do_not_reorder() {
        let mut engine = engine(10);
        engine.ingest(Event::new("/late", 200, 1.0, "2026-01-01T00:00:05"));
        engine.ingest(Event::new("/early", 200, 1.0, "2026-01-01T00:00:01"));
        assert_eq!(endpoints(&engine), ["/late", "/early"]);
    }

    #[test]
    fn snapshot_reflects_evictions() {
        let mut engine = engine(2);
        engine.ingest(ev("/a", 500, 400.0));
        engine.ingest(ev("/b", 200, 50.0));
        assert_eq!(engine.snapshot().threat_score, 50);

        engine.ingest(ev("/b", 200, 50.0));
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.error_rate, 0.0);
        assert_eq!(snapshot.threat_score, 0);
        assert!(!snapshot.endpoint_counts.contains_key("/a"));
        assert_eq!(snapshot.endpoint_counts.get("/b"), Some(&2));
    }
}
