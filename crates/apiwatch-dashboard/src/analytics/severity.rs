//! Per-event severity derived from the producer's anomaly score.

use serde::Serialize;

use apiwatch_core::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Classify an event. Events without an anomaly score are normal.
    ///
    /// An event is anomalous when its score is at or below `anomaly_threshold`;
    /// the status code then decides how bad it is.
    pub fn classify(event: &Event, anomaly_threshold: f64) -> Self {
        let anomalous = event
            .anomaly_score()
            .is_some_and(|score| score <= anomaly_threshold);
        if !anomalous {
            return Self::Normal;
        }
        match event.status_code {
            0..=399 => Self::Warning,
            400..=499 => Self::Error,
            _ => Self::Critical,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of window events at each severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub normal: usize,
    pub warning: usize,
    pub error: usize,
    pub critical: usize,
}

impl SeverityCounts {
    pub const fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Normal => self.normal += 1,
            Severity::Warning => self.warning += 1,
            Severity::Error => self.error += 1,
            Severity::Critical => self.critical += 1,
        }
    }

    pub const fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Normal => self.normal,
            Severity::Warning => self.warning,
            Severity::Error => self.error,
            Severity::Critical => self.critical,
        }
    }

    /// Events that are anything but normal.
    pub const fn anomalous(&self) -> usize {
        self.warning + self.error + self.critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(status: u16, score: f64) -> Event {
        Event::new("/api/users", status, 40.0, "2026-01-01T00:00:00").with_extra("anomaly_score", score)
    }

    #[test]
    fn missing_score_is_normal() {
        let event = Event::new("/api/users", 500, 40.0, "2026-01-01T00:00:00");
        assert_eq!(Severity::classify(&event, -0.5), Severity::Normal);
    }

    #[test]
    fn score_above_threshold_is_normal() {
        assert_eq!(Severity::classify(&scored(500, -0.2), -0.5), Severity::Normal);
    }

    #[test]
    fn anomalous_events_graded_by_status() {
        assert_eq!(Severity::classify(&scored(200, -0.9), -0.5), Severity::Warning);
        assert_eq!(Severity::classify(&scored(304, -0.5), -0.5), Severity::Warning);
        assert_eq!(Severity::classify(&scored(404, -0.7), -0.5), Severity::Error);
        assert_eq!(Severity::classify(&scored(503, -1.0), -0.5), Severity::Critical);
    }

    #[test]
    fn counts_track_each_level() {
        let mut counts = SeverityCounts::default();
        for severity in [Severity::Normal, Severity::Error, Severity::Error, Severity::Critical] {
            counts.record(severity);
        }
        assert_eq!(counts.get(Severity::Normal), 1);
        assert_eq!(counts.get(Severity::Error), 2);
        assert_eq!(counts.anomalous(), 3);
        assert_eq!(Severity::Critical.to_string(), "critical");
    }
}
