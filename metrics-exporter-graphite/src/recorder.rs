use std::sync::Arc;

use chrono::Utc;
use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};

use crate::{payload::GraphitePayload, state::State, telemetry::TelemetryUpdate};

/// A recorder that forwards metrics to a Graphite server.
pub struct GraphiteRecorder {
    state: Arc<State>,
}

impl GraphiteRecorder {
    pub(crate) fn new(state: Arc<State>) -> Self {
        GraphiteRecorder { state }
    }

    /// Returns a handle that can build payloads from the metrics held by this recorder.
    pub fn handle(&self) -> GraphiteHandle {
        GraphiteHandle { state: Arc::clone(&self.state) }
    }
}

impl Recorder for GraphiteRecorder {
    // Graphite has no notion of metric metadata, so descriptions are dropped.
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        self.state.registry().get_or_create_counter(key, |existing| Counter::from_arc(Arc::clone(existing)))
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        self.state.registry().get_or_create_gauge(key, |existing| Gauge::from_arc(Arc::clone(existing)))
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        self.state.registry().get_or_create_histogram(key, |existing| Histogram::from_arc(Arc::clone(existing)))
    }
}

/// Handle for building payloads from a [`GraphiteRecorder`].
///
/// Building a payload is a flush: histogram samples are drained and update counts reset, exactly as when the exporter
/// reports on its own. This makes the handle suitable for driving exports manually, for example with
/// [`GraphiteClient`][crate::GraphiteClient] on a custom schedule.
#[derive(Clone)]
pub struct GraphiteHandle {
    state: Arc<State>,
}

impl GraphiteHandle {
    /// Builds a payload from the current state of every registered metric.
    ///
    /// Every point in the payload shares the current time as its timestamp.
    pub fn build_payload(&self) -> GraphitePayload {
        let mut telemetry = TelemetryUpdate::default();
        self.state.flush(Utc::now(), &mut telemetry)
    }
}
