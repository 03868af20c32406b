//! Request-telemetry event, the unit that crosses every component boundary.
//!
//! Known fields are typed; anything else the producer attaches (request size,
//! user id, anomaly score, ...) is kept verbatim in [`Event::extra`] so that
//! consumers can pass it through without interpreting it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Extension field carrying the request payload size in bytes.
pub const FIELD_REQUEST_SIZE: &str = "request_size";
/// Extension field carrying the caller identity.
pub const FIELD_USER_ID: &str = "user_id";
/// Extension field carrying the upstream anomaly detector's score.
pub const FIELD_ANOMALY_SCORE: &str = "anomaly_score";

/// One observed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Request path.
    pub endpoint: String,
    /// HTTP-style status code.
    pub status_code: u16,
    /// Observed latency, never negative.
    pub latency_ms: f64,
    /// Producer-assigned ISO-8601 instant.
    pub timestamp: String,
    /// Producer-defined extension fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    /// Create an event without extension fields.
    pub fn new(
        endpoint: impl Into<String>,
        status_code: u16,
        latency_ms: f64,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            status_code,
            latency_ms,
            timestamp: timestamp.into(),
            extra: Map::new(),
        }
    }

    /// Attach an extension field.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Decode and validate an event from its JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let event: Self =
            serde_json::from_str(text).map_err(|e| Error::EventDecode(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    /// Encode the event as a single-line JSON object.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(Error::EventDecode("empty endpoint".into()));
        }
        if !self.latency_ms.is_finite() || self.latency_ms < 0.0 {
            return Err(Error::EventDecode(format!(
                "invalid latency_ms: {}",
                self.latency_ms
            )));
        }
        if !looks_like_iso8601(&self.timestamp) {
            return Err(Error::EventDecode(format!(
                "timestamp is not ISO-8601: {:?}",
                self.timestamp
            )));
        }
        Ok(())
    }

    /// Whether the request failed (`status_code >= 400`).
    pub const fn is_error(&self) -> bool {
        self.status_code >= 400
    }

    /// Request size in bytes, when the producer supplied one.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn request_size(&self) -> Option<u64> {
        let value = self.extra.get(FIELD_REQUEST_SIZE)?;
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
    }

    /// Caller identity; producers send either a string or a number.
    pub fn user_id(&self) -> Option<String> {
        match self.extra.get(FIELD_USER_ID)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Upstream anomaly score. Only parsed, never computed here.
    pub fn anomaly_score(&self) -> Option<f64> {
        self.extra.get(FIELD_ANOMALY_SCORE)?.as_f64()
    }
}

/// Shape check for `YYYY-MM-DD[T ]HH:MM...`.
fn looks_like_iso8601(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() < 16 {
        return false;
    }
    let digits = |range: std::ops::Range<usize>| b[range].iter().all(u8::is_ascii_digit);
    digits(0..4)
        && b[4] == b'-'
        && digits(5..7)
        && b[7] == b'-'
        && digits(8..10)
        && (b[10] == b'T' || b[10] == b' ')
        && digits(11..13)
        && b[13] == b':'
        && digits(14..16)
}
