//! Statistics derived from the current window.
//!
//! Everything here is a pure function of the window contents. Nothing is
//! patched incrementally, so a snapshot can never drift from its window.

use std::collections::BTreeMap;

use serde::Serialize;

use apiwatch_core::Event;
use apiwatch_core::config::AnalyticsConfig;

use super::severity::{Severity, SeverityCounts};

/// Per-endpoint latency and error summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EndpointStats {
    pub total_calls: usize,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub error_count: usize,
    /// Errors over calls, in `[0, 1]`.
    pub error_rate: f64,
}

/// One snapshot of the window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregates {
    pub event_count: usize,
    pub avg_latency_ms: f64,
    /// Share of events with `status_code >= 400`, in `[0, 1]`.
    pub error_rate: f64,
    /// Share of events slower than the high-latency threshold, in `[0, 1]`.
    pub high_latency_rate: f64,
    pub endpoint_counts: BTreeMap<String, usize>,
    /// Composite health metric in `[0, 100]`.
    pub threat_score: u8,
    pub endpoint_stats: BTreeMap<String, EndpointStats>,
    pub severity_counts: SeverityCounts,
}

impl Aggregates {
    /// Compute every aggregate over `events`, oldest first.
    #[allow(clippy::cast_precision_loss)]
    pub fn compute<'a, I>(events: I, config: &AnalyticsConfig) -> Self
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut event_count = 0usize;
        let mut latency_sum = 0.0;
        let mut errors = 0usize;
        let mut slow = 0usize;
        let mut endpoint_counts = BTreeMap::new();
        let mut latencies: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut endpoint_errors: BTreeMap<String, usize> = BTreeMap::new();
        let mut severity_counts = SeverityCounts::default();

        for event in events {
            event_count += 1;
            latency_sum += event.latency_ms;
            if event.is_error() {
                errors += 1;
                *endpoint_errors.entry(event.endpoint.clone()).or_default() += 1;
            }
            if event.latency_ms > config.high_latency_threshold_ms {
                slow += 1;
            }
            *endpoint_counts.entry(event.endpoint.clone()).or_default() += 1;
            latencies
                .entry(event.endpoint.clone())
                .or_default()
                .push(event.latency_ms);
            severity_counts.record(Severity::classify(event, config.anomaly_score_threshold));
        }

        if event_count == 0 {
            return Self::default();
        }

        let n = event_count as f64;
        let error_rate = errors as f64 / n;
        let high_latency_rate = slow as f64 / n;

        let endpoint_stats = latencies
            .into_iter()
            .map(|(endpoint, samples)| {
                let error_count = endpoint_errors.get(&endpoint).copied().unwrap_or(0);
                (endpoint, EndpointStats::from_samples(samples, error_count))
            })
            .collect();

        Self {
            event_count,
            avg_latency_ms: latency_sum / n,
            error_rate,
            high_latency_rate,
            endpoint_counts,
            threat_score: threat_score(error_rate, high_latency_rate, config),
            endpoint_stats,
            severity_counts,
        }
    }

    /// Error rate as a percentage rounded to one decimal.
    pub fn error_rate_percent(&self) -> f64 {
        round_to(self.error_rate * 100.0, 1)
    }

    /// Error rate as a ratio rounded to two decimals.
    pub fn error_rate_ratio(&self) -> f64 {
        round_to(self.error_rate, 2)
    }

    /// Endpoint with the most calls in the window. Ties go to the first name.
    pub fn busiest_endpoint(&self) -> Option<(&str, usize)> {
        self.endpoint_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(endpoint, &count)| (endpoint.as_str(), count))
    }
}

impl EndpointStats {
    #[allow(clippy::cast_precision_loss)]
    fn from_samples(mut samples: Vec<f64>, error_count: usize) -> Self {
        samples.sort_by(f64::total_cmp);
        let total_calls = samples.len();
        let n = total_calls as f64;
        Self {
            total_calls,
            avg_latency_ms: samples.iter().sum::<f64>() / n,
            min_latency_ms: samples.first().copied().unwrap_or_default(),
            max_latency_ms: samples.last().copied().unwrap_or_default(),
            p95_latency_ms: percentile(&samples, 0.95),
            error_count,
            error_rate: error_count as f64 / n,
        }
    }
}

/// `round(min(100, (error_rate * error_weight + high_latency_rate * latency_weight) * 100))`
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn threat_score(error_rate: f64, high_latency_rate: f64, config: &AnalyticsConfig) -> u8 {
    let raw = (error_rate * config.error_weight + high_latency_rate * config.latency_weight) * 100.0;
    raw.clamp(0.0, 100.0).round() as u8
}

/// Linear-interpolated percentile of an ascending slice, `q` in `[0, 1]`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted {
        [] => 0.0,
        [only] => *only,
        _ => {
            let rank = q * (sorted.len() - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
