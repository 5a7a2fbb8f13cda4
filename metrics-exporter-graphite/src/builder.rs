use std::{future::Future, pin::Pin, sync::Arc, thread, time::Duration};

use metrics::SetRecorderError;
use metrics_util::{parse_quantiles, Quantile};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    client::{ClientPolicy, Endpoint, EndpointError, GraphiteClient, Protocol},
    formatter::{NameFormatter, PathNameFormatter, TaggedNameFormatter, DEFAULT_TAG_EXCLUSIONS},
    forwarder::Forwarder,
    recorder::GraphiteRecorder,
    state::{FieldNames, State, StateConfiguration},
    tags::MetricTags,
};

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_QUANTILES: [f64; 6] = [0.5, 0.75, 0.95, 0.98, 0.99, 0.999];

/// Convenience type for the future that drives the exporter.
pub type ExporterFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Errors that could occur while building or installing a Graphite recorder/exporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse the remote address.
    #[error("invalid remote address: {0}")]
    InvalidRemoteAddress(#[from] EndpointError),

    /// The configured protocol is not implemented.
    #[error("pickled protocol not implemented, use UDP or TCP")]
    ProtocolNotImplemented,

    /// The batch size was zero.
    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    /// No quantiles were given.
    #[error("at least one quantile must be specified")]
    EmptyQuantiles,

    /// A generated field was renamed to a blank name.
    #[error("field '{field}' cannot be renamed to a blank name")]
    EmptyFieldName {
        /// Default name of the field.
        field: String,
    },

    /// Failed to create the runtime, or the background thread running it.
    #[error("failed to create runtime for exporter: {0}")]
    FailedToCreateRuntime(String),

    /// Failed to install the recorder due to an existing global recorder already being installed.
    #[error("failed to install exporter as global recorder: {0}")]
    FailedToInstall(#[from] SetRecorderError<GraphiteRecorder>),
}

/// Builder for a Graphite exporter.
pub struct GraphiteBuilder {
    endpoint: Endpoint,
    policy: ClientPolicy,
    flush_interval: Duration,
    formatter: Option<Arc<dyn NameFormatter>>,
    tagged_names: bool,
    tag_exclusions: Vec<String>,
    telemetry: bool,
    report_idle: bool,
    quantiles: Vec<Quantile>,
    global_tags: MetricTags,
    default_context: Option<String>,
    field_names: FieldNames,
    cancel: CancellationToken,
}

impl GraphiteBuilder {
    /// Creates a new `GraphiteBuilder` with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the remote address to send metrics to.
    ///
    /// The address must be in the format `<scheme>://<host>[:<port>]`, where the scheme is `net.tcp` or `net.udp`. The
    /// port defaults to 2003 when omitted.
    ///
    /// Defaults to `net.tcp://127.0.0.1:2003`.
    ///
    /// # Errors
    ///
    /// If the given address is not able to be parsed as a valid address, an error will be returned indicating the
    /// reason.
    pub fn with_remote_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        self.endpoint = addr.as_ref().parse()?;
        Ok(self)
    }

    /// Sets the maximum number of points sent per batch.
    ///
    /// Over TCP, a batch is a single write to the stream. Over UDP, a batch is a single datagram, so the batch size must
    /// be small enough for every batch to fit in one datagram.
    ///
    /// Defaults to 1000.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.policy.batch_size = batch_size;
        self
    }

    /// Sets the number of failed writes after which the circuit breaker opens.
    ///
    /// Setting this to zero disables the circuit breaker.
    ///
    /// Defaults to 3.
    #[must_use]
    pub fn with_failures_before_backoff(mut self, failures: u64) -> Self {
        self.policy.failures_before_backoff = failures;
        self
    }

    /// Sets how long the circuit breaker stays open once tripped.
    ///
    /// While open, every reporting cycle is dropped without attempting to reach the remote server.
    ///
    /// Defaults to 30 seconds.
    #[must_use]
    pub fn with_backoff_period(mut self, period: Duration) -> Self {
        self.policy.backoff_period = period;
        self
    }

    /// Sets the timeout for connecting to the remote server and for each send.
    ///
    /// A write that times out is treated like any other transport failure, and counts toward the circuit breaker.
    ///
    /// Defaults to 30 seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = timeout;
        self
    }

    /// Sets whether a TCP connection is kept open between reporting cycles.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_persistent_connection(mut self, persistent: bool) -> Self {
        self.policy.persistent_connection = persistent;
        self
    }

    /// Sets the interval between reporting cycles.
    ///
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Sets whether tags are sent as Graphite tags (`;key=value`) instead of path segments.
    ///
    /// Tag support requires Graphite 1.1 or later.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_tagged_names(mut self, tagged: bool) -> Self {
        self.tagged_names = tagged;
        self
    }

    /// Sets the tag keys that are never rendered as generic tags.
    ///
    /// The reserved tags (`app`, `env`, `server` and `mtype`) are always placed at the front of the metric path,
    /// regardless of this setting. Has no effect when a custom name formatter is set.
    ///
    /// Defaults to `app`, `env`, `server`, `mtype`, `unit`, `unit_rate` and `unit_dur`.
    #[must_use]
    pub fn with_tag_exclusions<I, S>(mut self, exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag_exclusions = exclusions.into_iter().map(Into::into).collect();
        self
    }

    /// Sets a custom name formatter.
    ///
    /// Overrides [`with_tagged_names`][Self::with_tagged_names] and [`with_tag_exclusions`][Self::with_tag_exclusions].
    #[must_use]
    pub fn with_name_formatter<F>(mut self, formatter: F) -> Self
    where
        F: NameFormatter + 'static,
    {
        self.formatter = Some(Arc::new(formatter));
        self
    }

    /// Sets whether or not to enable telemetry for the exporter.
    ///
    /// When enabled, the exporter reports metrics about itself, such as how many batches and bytes were sent or dropped,
    /// and how often the circuit breaker rejected a write.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: bool) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Sets whether counters and gauges that were not updated since the last reporting cycle are still reported.
    ///
    /// Histograms without any samples in a cycle are never reported.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_report_idle(mut self, report_idle: bool) -> Self {
        self.report_idle = report_idle;
        self
    }

    /// Sets the quantiles reported for each histogram.
    ///
    /// Each quantile is reported as its own field, named after the quantile: `p50`, `p99`, `p999`, and so on. `0.0` and
    /// `1.0` are ignored, since the exact `min` and `max` are always reported.
    ///
    /// Defaults to `0.5`, `0.75`, `0.95`, `0.98`, `0.99` and `0.999`.
    ///
    /// # Errors
    ///
    /// If `quantiles` is empty, an error variant will be thrown.
    pub fn with_quantiles(mut self, quantiles: &[f64]) -> Result<Self, BuildError> {
        if quantiles.is_empty() {
            return Err(BuildError::EmptyQuantiles);
        }

        self.quantiles = parse_quantiles(quantiles);
        Ok(self)
    }

    /// Renames a field generated by the exporter.
    ///
    /// `field` is the default name of the field: `value` for counters and gauges, and `count`, `sum`, `min`, `max`,
    /// `mean` or a quantile label such as `p99` for histograms. Renaming two fields of the same metric to the same name
    /// leaves only the last of them in the output.
    ///
    /// # Errors
    ///
    /// If `name` is blank, an error variant will be returned.
    pub fn with_field_name<F, N>(mut self, field: F, name: N) -> Result<Self, BuildError>
    where
        F: Into<String>,
        N: Into<String>,
    {
        let field = field.into();
        let name = name.into();
        if name.trim().is_empty() {
            return Err(BuildError::EmptyFieldName { field });
        }

        self.field_names.rename(field, name);
        Ok(self)
    }

    /// Renames several fields generated by the exporter.
    ///
    /// See [`with_field_name`][Self::with_field_name] for the names that can be mapped.
    ///
    /// # Errors
    ///
    /// If any of the new names is blank, an error variant will be returned.
    pub fn with_field_names<I, F, N>(self, names: I) -> Result<Self, BuildError>
    where
        I: IntoIterator<Item = (F, N)>,
        F: Into<String>,
        N: Into<String>,
    {
        names.into_iter().try_fold(self, |builder, (field, name)| builder.with_field_name(field, name))
    }

    /// Adds a global tag to every metric.
    ///
    /// Tags set on a metric take precedence over global tags with the same key.
    #[must_use]
    pub fn add_global_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.global_tags = self.global_tags.with(key, value);
        self
    }

    /// Sets the context that prefixes the name of every metric.
    ///
    /// Defaults to no context.
    #[must_use]
    pub fn with_default_context<C: Into<String>>(mut self, context: C) -> Self {
        self.default_context = Some(context.into());
        self
    }

    /// Sets the cancellation token used to stop the exporter.
    ///
    /// Cancelling the token stops the exporter after any in-flight write, and aborts the remaining batches of that write.
    #[must_use]
    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn name_formatter(&self) -> Arc<dyn NameFormatter> {
        if let Some(formatter) = &self.formatter {
            return Arc::clone(formatter);
        }

        let exclusions = self.tag_exclusions.iter().cloned();
        if self.tagged_names {
            Arc::new(TaggedNameFormatter::new().with_exclusions(exclusions))
        } else {
            Arc::new(PathNameFormatter::new().with_exclusions(exclusions))
        }
    }

    /// Builds the recorder and the exporter and returns them both.
    ///
    /// In most cases, users should prefer to use [`install`][GraphiteBuilder::install] to create and install the
    /// recorder and exporter automatically for them. If a caller is combining recorders, or needs to schedule the
    /// exporter to run in a particular way, this method provides the flexibility to do so.
    ///
    /// # Errors
    ///
    /// If the configured protocol is not implemented, or the batch size is zero, an error variant will be returned.
    pub fn build(self) -> Result<(GraphiteRecorder, ExporterFuture), BuildError> {
        if self.endpoint.protocol() == Protocol::Pickled {
            return Err(BuildError::ProtocolNotImplemented);
        }

        if self.policy.batch_size == 0 {
            return Err(BuildError::InvalidBatchSize);
        }

        let formatter = self.name_formatter();
        let state = Arc::new(State::new(StateConfiguration {
            telemetry: self.telemetry,
            report_idle: self.report_idle,
            quantiles: self.quantiles,
            global_tags: self.global_tags,
            default_context: self.default_context,
            field_names: self.field_names,
        }));

        let recorder = GraphiteRecorder::new(Arc::clone(&state));

        let client = GraphiteClient::new(self.endpoint, self.policy, formatter);
        let forwarder = Forwarder::new(client, state, self.flush_interval, self.cancel);

        Ok((recorder, Box::pin(forwarder.run())))
    }

    /// Builds the recorder and exporter and installs them globally.
    ///
    /// When called from within a Tokio runtime, the exporter future is spawned directly into the runtime. Otherwise, a
    /// new single-threaded Tokio runtime is created on a background thread, and the exporter is spawned there.
    ///
    /// # Errors
    ///
    /// If there is an error while either building the recorder and exporter, or installing the recorder and exporter,
    /// an error variant will be returned describing the error.
    pub fn install(self) -> Result<(), BuildError> {
        use tokio::runtime;

        let recorder = if let Ok(handle) = runtime::Handle::try_current() {
            let (recorder, exporter) = self.build()?;
            handle.spawn(exporter);

            recorder
        } else {
            let runtime = runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

            let (recorder, exporter) = self.build()?;

            thread::Builder::new()
                .name("metrics-exporter-graphite-forwarder".to_string())
                .spawn(move || runtime.block_on(exporter))
                .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

            recorder
        };

        metrics::set_global_recorder(recorder)?;

        Ok(())
    }
}

impl Default for GraphiteBuilder {
    fn default() -> Self {
        GraphiteBuilder {
            endpoint: Endpoint::default(),
            policy: ClientPolicy::default(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            formatter: None,
            tagged_names: false,
            tag_exclusions: DEFAULT_TAG_EXCLUSIONS.iter().map(|s| (*s).to_owned()).collect(),
            telemetry: true,
            report_idle: true,
            quantiles: parse_quantiles(&DEFAULT_QUANTILES),
            global_tags: MetricTags::new(),
            default_context: None,
            field_names: FieldNames::default(),
            cancel: CancellationToken::new(),
        }
    }
}
