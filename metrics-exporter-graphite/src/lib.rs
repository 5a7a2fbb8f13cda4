//! A [`metrics`]-compatible exporter for sending metrics to [Graphite][graphite] using its plaintext protocol.
//!
//! [graphite]: https://graphite.readthedocs.io/en/latest/feeding-carbon.html#the-plaintext-protocol
//!
//! # Usage
//!
//! Using the exporter is straightforward:
//!
//! ```no_run
//! # use metrics_exporter_graphite::GraphiteBuilder;
//! // First, create a builder.
//! //
//! // The builder can configure many aspects of the exporter, such as the remote address, how points are batched, how
//! // metric names are built from tags, and how the exporter backs off when Graphite is unreachable.
//! let builder = GraphiteBuilder::default()
//!     .with_remote_address("net.tcp://graphite.local:2003")
//!     .expect("invalid remote address")
//!     .add_global_tag("app", "shop")
//!     .add_global_tag("env", "prod");
//!
//! // Normally, most users will want to "install" the exporter which sets it as the global recorder for all `metrics`
//! // calls, and spawns the background task that periodically reports metrics to Graphite.
//! builder.install().expect("failed to install recorder/exporter");
//! ```
//!
//! # Wire format
//!
//! Every field of every metric becomes one line of the form `<path> <value> <timestamp>\n`, where the timestamp is in
//! Unix epoch seconds. Paths are built by a [`NameFormatter`]:
//!
//! - the reserved tags `app`, `env` and `server` are placed first, as `<key>.<value>` pairs
//! - the metric type (`counter`, `gauge` or `histogram`) follows
//! - then the context and name of the metric
//! - then the remaining tags, either as `<key>.<value>` path segments ([`PathNameFormatter`], the default) or as
//!   Graphite tags ([`TaggedNameFormatter`])
//! - and finally the field name
//!
//! Whitespace in any part of a line, line breaks included, is replaced with `_`, so every field yields exactly one
//! line.
//!
//! Counters report their cumulative value, gauges their latest value, and histograms are summarised on each reporting
//! cycle into `count`, `sum`, `min`, `max`, `mean` and a configurable set of quantiles. These field names can be
//! changed with [`GraphiteBuilder::with_field_name`].
//!
//! # Transports
//!
//! Metrics can be sent over TCP (`net.tcp://`) or UDP (`net.udp://`). Over TCP, each batch of points is written to a
//! persistent connection, which is replaced if the server has closed it; over UDP, each batch is sent as a single
//! datagram. The pickle protocol (`net.pickled://`) is recognized but not implemented.
//!
//! # Circuit breaker
//!
//! Writes are guarded by a [`CircuitBreaker`]. After a configurable number of failed writes, the exporter stops trying
//! to reach Graphite for a backoff period, dropping the payloads of the cycles in between. Failed payloads are never
//! retried.
//!
//! # Manual exports
//!
//! The building blocks of the exporter are public, so payloads can also be built and written by hand:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use metrics_exporter_graphite::{
//! #     ClientPolicy, Endpoint, GraphiteClient, MetricTags, PathNameFormatter, PayloadBuilder,
//! # };
//! # use tokio_util::sync::CancellationToken;
//! # async fn export() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = PayloadBuilder::new();
//! builder.pack(Some("web"), "requests", 42, MetricTags::new().with("mtype", "counter"))?;
//!
//! let endpoint: Endpoint = "net.udp://127.0.0.1:2003".parse()?;
//! let client = GraphiteClient::new(endpoint, ClientPolicy::default(), Arc::new(PathNameFormatter::new()));
//! client.write(builder.payload(), &CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{BuildError, ExporterFuture, GraphiteBuilder};

mod client;
pub use self::client::{
    CircuitBreaker, ClientPolicy, Endpoint, EndpointError, GraphiteClient, Protocol, WriteError, WriteSummary,
    DEFAULT_PORT,
};

mod formatter;
pub use self::formatter::{NameFormatter, PathNameFormatter, TaggedNameFormatter, DEFAULT_TAG_EXCLUSIONS};

mod forwarder;

mod payload;
pub use self::payload::{Batch, BatchError, Batches, GraphitePayload, PayloadBuilder};

mod point;
pub use self::point::{FieldValue, GraphitePoint, PointBuilder, PointError};

mod recorder;
pub use self::recorder::{GraphiteHandle, GraphiteRecorder};

mod state;
mod storage;

pub mod syntax;

mod tags;
pub use self::tags::{MetricTags, APP_TAG, ENV_TAG, METRIC_TYPE_TAG, RESERVED_TAGS, SERVER_TAG};

mod telemetry;
