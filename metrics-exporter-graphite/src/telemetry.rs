use metrics::{counter, Counter};

use crate::client::WriteSummary;

/// Exporter telemetry.
///
/// `Telemetry` tracks how the exporter itself is behaving, and is reported through the same recorder as every other
/// metric, under the `graphite.client` namespace.
pub struct Telemetry {
    counter_points: Counter,
    gauge_points: Counter,
    histogram_points: Counter,
    points_sent: Counter,
    batches_sent: Counter,
    batches_dropped: Counter,
    bytes_sent: Counter,
    circuit_open: Counter,
}

impl Telemetry {
    /// Creates a `Telemetry` instance.
    pub fn new(transport: &'static str) -> Self {
        let base_labels = telemetry_tags!("client_transport" => transport);
        let counter_labels = telemetry_tags!("client_transport" => transport, "metrics_type" => "counter");
        let gauge_labels = telemetry_tags!("client_transport" => transport, "metrics_type" => "gauge");
        let histogram_labels = telemetry_tags!("client_transport" => transport, "metrics_type" => "histogram");

        Self {
            counter_points: counter!("graphite.client.points_built", counter_labels.iter()),
            gauge_points: counter!("graphite.client.points_built", gauge_labels.iter()),
            histogram_points: counter!("graphite.client.points_built", histogram_labels.iter()),
            points_sent: counter!("graphite.client.points_sent", base_labels.iter()),
            batches_sent: counter!("graphite.client.batches_sent", base_labels.iter()),
            batches_dropped: counter!("graphite.client.batches_dropped", base_labels.iter()),
            bytes_sent: counter!("graphite.client.bytes_sent", base_labels.iter()),
            circuit_open: counter!("graphite.client.circuit_open", base_labels.iter()),
        }
    }

    /// Applies the given telemetry update, updating the internal metrics.
    pub fn apply_update(&mut self, update: &TelemetryUpdate) {
        self.counter_points.increment(update.counter_points);
        self.gauge_points.increment(update.gauge_points);
        self.histogram_points.increment(update.histogram_points);
        self.points_sent.increment(update.points_sent);
        self.batches_sent.increment(update.batches_sent);
        self.batches_dropped.increment(update.batches_dropped);
        self.bytes_sent.increment(update.bytes_sent);
        self.circuit_open.increment(update.circuit_open);
    }
}

/// A buffer for collecting telemetry updates over one reporting cycle.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TelemetryUpdate {
    counter_points: u64,
    gauge_points: u64,
    histogram_points: u64,
    points_sent: u64,
    batches_sent: u64,
    batches_dropped: u64,
    bytes_sent: u64,
    circuit_open: u64,
}

impl TelemetryUpdate {
    /// Clears the update buffer, resetting it back to an empty state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Returns `true` if any points were built during the cycle.
    pub fn had_updates(&self) -> bool {
        self.counter_points > 0 || self.gauge_points > 0 || self.histogram_points > 0
    }

    /// Increments the number of counter points built.
    pub fn increment_counter_points(&mut self) {
        self.counter_points += 1;
    }

    /// Increments the number of gauge points built.
    pub fn increment_gauge_points(&mut self) {
        self.gauge_points += 1;
    }

    /// Increments the number of histogram points built.
    pub fn increment_histogram_points(&mut self) {
        self.histogram_points += 1;
    }

    /// Tracks a successful write.
    pub fn track_write_succeeded(&mut self, summary: &WriteSummary) {
        self.batches_sent += summary.batches as u64;
        self.points_sent += summary.points as u64;
        self.bytes_sent += summary.bytes as u64;
    }

    /// Tracks a failed write, where `batches_dropped` batches were not sent.
    pub fn track_write_failed(&mut self, batches_dropped: usize) {
        self.batches_dropped += batches_dropped as u64;
    }

    /// Tracks a write rejected by the circuit breaker.
    pub fn track_circuit_open(&mut self, batches_dropped: usize) {
        self.circuit_open += 1;
        self.batches_dropped += batches_dropped as u64;
    }
}

macro_rules! _telemetry_tags {
    ($($k:literal => $v:expr),*) => {
        [
            ::metrics::Label::from_static_parts("client", "rust"),
            ::metrics::Label::from_static_parts("client_version", env!("CARGO_PKG_VERSION")),
            $(::metrics::Label::from_static_parts($k, $v),)*
        ]
    };
}

pub(crate) use _telemetry_tags as telemetry_tags;

#[cfg(test)]
mod tests {
    use super::TelemetryUpdate;
    use crate::client::WriteSummary;

    #[test]
    fn tracks_cycle_outcomes() {
        let mut update = TelemetryUpdate::default();
        assert!(!update.had_updates());

        update.increment_gauge_points();
        update.track_write_succeeded(&WriteSummary { batches: 2, points: 3, bytes: 90 });
        update.track_circuit_open(4);
        update.track_write_failed(1);
        assert!(update.had_updates());
        assert_eq!(update.batches_sent, 2);
        assert_eq!(update.batches_dropped, 5);
        assert_eq!(update.circuit_open, 1);

        update.clear();
        assert_eq!(update, TelemetryUpdate::default());
    }
}
