//! Synthetic request telemetry.
//!
//! Mostly fast, successful traffic with occasional latency spikes, oversized
//! requests and error responses. Anomaly scores are uniform in `[-1, 1)`.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

use apiwatch_core::Event;
use apiwatch_core::event::{FIELD_ANOMALY_SCORE, FIELD_REQUEST_SIZE, FIELD_USER_ID};

pub const ENDPOINTS: &[&str] = &[
    "/api/users",
    "/api/products",
    "/api/orders",
    "/auth/login",
    "/auth/refresh",
    "/admin/export",
];

const STATUS_CODES: [u16; 8] = [200, 201, 304, 400, 401, 403, 404, 500];
const STATUS_CODE_WEIGHTS: [f64; 8] = [0.75, 0.1, 0.05, 0.02, 0.02, 0.02, 0.02, 0.02];

pub const HEALTH_STATUSES: [&str; 4] = ["normal", "warning", "error", "critical"];
const HEALTH_WEIGHTS: [f64; 4] = [0.7, 0.2, 0.07, 0.03];

/// Share of requests drawn from the spike distributions.
const SPIKE_PROBABILITY: f64 = 0.05;

const USER_IDS: std::ops::Range<u32> = 1000..1100;

#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("Invalid distribution: {0}")]
    Distribution(String),
}

/// Random event source.
pub struct Simulator {
    rng: StdRng,
    status_codes: WeightedIndex<f64>,
    health: WeightedIndex<f64>,
    latency: Normal<f64>,
    latency_spike: Normal<f64>,
    request_size: Normal<f64>,
    request_size_spike: Normal<f64>,
}

impl Simulator {
    pub fn new() -> Result<Self, SimulatorError> {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic simulator for tests.
    pub fn seeded(seed: u64) -> Result<Self, SimulatorError> {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Result<Self, SimulatorError> {
        let weighted = |w: &[f64]| {
            WeightedIndex::new(w).map_err(|e| SimulatorError::Distribution(e.to_string()))
        };
        let normal = |mean: f64, sd: f64| {
            Normal::new(mean, sd).map_err(|e| SimulatorError::Distribution(e.to_string()))
        };
        Ok(Self {
            rng,
            status_codes: weighted(&STATUS_CODE_WEIGHTS)?,
            health: weighted(&HEALTH_WEIGHTS)?,
            latency: normal(50.0, 10.0)?,
            latency_spike: normal(500.0, 100.0)?,
            request_size: normal(1024.0, 256.0)?,
            request_size_spike: normal(10240.0, 2048.0)?,
        })
    }

    /// Next event stamped with the current time.
    pub fn next_event(&mut self) -> Event {
        self.event_at(iso8601_now())
    }

    /// Next event with the given timestamp.
    #[allow(clippy::cast_possible_truncation)]
    pub fn event_at(&mut self, timestamp: String) -> Event {
        let endpoint = ENDPOINTS[self.rng.gen_range(0..ENDPOINTS.len())];

        let latency = if self.rng.gen_bool(SPIKE_PROBABILITY) {
            self.latency_spike.sample(&mut self.rng)
        } else {
            self.latency.sample(&mut self.rng)
        };
        let status_code = STATUS_CODES[self.status_codes.sample(&mut self.rng)];
        let request_size = if self.rng.gen_bool(SPIKE_PROBABILITY) {
            self.request_size_spike.sample(&mut self.rng)
        } else {
            self.request_size.sample(&mut self.rng)
        };
        let user = self.rng.gen_range(USER_IDS);
        let anomaly_score: f64 = self.rng.gen_range(-1.0..1.0);

        // Whole milliseconds and bytes, never negative.
        Event::new(endpoint, status_code, latency.trunc().max(0.0), timestamp)
            .with_extra(FIELD_REQUEST_SIZE, request_size.trunc().max(0.0) as i64)
            .with_extra(FIELD_USER_ID, format!("user_{user}"))
            .with_extra(FIELD_ANOMALY_SCORE, anomaly_score)
    }

    /// Overall service health label for `/api/status`.
    pub fn health_status(&mut self) -> &'static str {
        HEALTH_STATUSES[self.health.sample(&mut self.rng)]
    }
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SS.ffffff` (no external time crate).
pub fn iso8601_now() -> String {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    iso8601_from_unix(elapsed.as_secs(), elapsed.subsec_micros())
}

#[allow(clippy::cast_possible_wrap)]
fn iso8601_from_unix(secs: u64, micros: u32) -> String {
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{micros:06}",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian (year, month, day).
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}
