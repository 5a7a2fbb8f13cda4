use std::collections::HashMap;

use chrono::{DateTime, Utc};
use metrics::Key;
use metrics_util::{registry::Registry, storage::Summary, Quantile};
use tracing::error;

use crate::{
    payload::{GraphitePayload, PayloadBuilder},
    point::{FieldValue, PointError},
    storage::GraphiteStorage,
    tags::{MetricTags, METRIC_TYPE_TAG},
    telemetry::TelemetryUpdate,
};

/// Exporter state configuration.
pub struct StateConfiguration {
    /// Whether or not to collect/emit internal telemetry.
    pub telemetry: bool,

    /// Whether or not to report counters and gauges that were not updated since the last flush.
    pub report_idle: bool,

    /// Quantiles reported for each histogram.
    pub quantiles: Vec<Quantile>,

    /// Tags added to every point.
    pub global_tags: MetricTags,

    /// Context applied to every point.
    pub default_context: Option<String>,

    /// Names of the generated fields.
    pub field_names: FieldNames,
}

/// Renames the fields generated for each metric.
///
/// Fields are looked up by their default name: `value` for counters and gauges, and `count`, `sum`, `min`, `max`,
/// `mean` or a quantile label such as `p99` for histograms. Fields without an override keep their default name.
#[derive(Clone, Debug, Default)]
pub struct FieldNames {
    overrides: HashMap<String, String>,
}

impl FieldNames {
    /// Renames the field with the given default name.
    pub fn rename<F, N>(&mut self, field: F, name: N)
    where
        F: Into<String>,
        N: Into<String>,
    {
        self.overrides.insert(field.into(), name.into());
    }

    /// Gets the name to use for the field with the given default name.
    pub fn get<'a>(&'a self, field: &'a str) -> &'a str {
        self.overrides.get(field).map_or(field, String::as_str)
    }
}

/// Exporter state.
pub(crate) struct State {
    config: StateConfiguration,
    registry: Registry<Key, GraphiteStorage>,
}

fn tags_for(key: &Key, metric_type: &str) -> MetricTags {
    MetricTags::from_key(key).with(METRIC_TYPE_TAG, metric_type)
}

fn log_pack_failure(key: &Key, metric_type: &str, error: &PointError) {
    error!(metric_name = key.name(), metric_type, %error, "Failed to build point.");
}

impl State {
    /// Creates a new `State` from the given configuration.
    pub fn new(config: StateConfiguration) -> Self {
        State { registry: Registry::new(GraphiteStorage), config }
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry<Key, GraphiteStorage> {
        &self.registry
    }

    /// Returns `true` if telemetry is enabled.
    pub fn telemetry_enabled(&self) -> bool {
        self.config.telemetry
    }

    /// Flushes all registered metrics into a payload, stamping every point with `timestamp`.
    pub fn flush(&self, timestamp: DateTime<Utc>, telemetry: &mut TelemetryUpdate) -> GraphitePayload {
        let mut builder = PayloadBuilder::new()
            .with_global_tags(self.config.global_tags.clone())
            .with_default_context(self.config.default_context.as_deref());
        builder.set_timestamp(Some(timestamp));
        let names = &self.config.field_names;
        let value_field = names.get("value");

        for (key, counter) in self.registry.get_counter_handles() {
            let (value, updates) = counter.flush();
            if updates == 0 && !self.config.report_idle {
                continue;
            }

            let result = builder.pack_fields(None, key.name(), [value_field], [value], tags_for(&key, "counter"));
            match result {
                Ok(()) => telemetry.increment_counter_points(),
                Err(e) => log_pack_failure(&key, "counter", &e),
            }
        }

        for (key, gauge) in self.registry.get_gauge_handles() {
            let (value, updates) = gauge.flush();
            if updates == 0 && !self.config.report_idle {
                continue;
            }

            let result = builder.pack_fields(None, key.name(), [value_field], [value], tags_for(&key, "gauge"));
            match result {
                Ok(()) => telemetry.increment_gauge_points(),
                Err(e) => log_pack_failure(&key, "gauge", &e),
            }
        }

        for (key, histogram) in self.registry.get_histogram_handles() {
            let mut summary = Summary::with_defaults();
            let mut sum = 0.0;
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            histogram.flush(|samples| {
                for sample in samples {
                    summary.add(*sample);
                    sum += *sample;
                    min = min.min(*sample);
                    max = max.max(*sample);
                }
            });

            // Histograms without samples in this cycle have nothing to report.
            let count = summary.count();
            if count == 0 {
                continue;
            }

            let mut columns: Vec<_> =
                ["count", "sum", "min", "max", "mean"].into_iter().map(|field| names.get(field)).collect();
            let mut values = vec![
                FieldValue::UInt(count as u64),
                FieldValue::Float(sum),
                FieldValue::Float(min),
                FieldValue::Float(max),
                FieldValue::Float(sum / count as f64),
            ];
            // `min` and `max` are already reported exactly, so the matching quantiles are skipped.
            for quantile in self.config.quantiles.iter().filter(|q| q.value() > 0.0 && q.value() < 1.0) {
                if let Some(value) = summary.quantile(quantile.value()) {
                    columns.push(names.get(quantile.label()));
                    values.push(FieldValue::Float(value));
                }
            }

            let result = builder.pack_fields(None, key.name(), columns, values, tags_for(&key, "histogram"));
            match result {
                Ok(()) => telemetry.increment_histogram_points(),
                Err(e) => log_pack_failure(&key, "histogram", &e),
            }
        }

        builder.take_payload()
    }
}
