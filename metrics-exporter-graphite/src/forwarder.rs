use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    client::{GraphiteClient, WriteError},
    state::State,
    telemetry::{Telemetry, TelemetryUpdate},
};

/// Periodically flushes the exporter state and writes the resulting payload to Graphite.
///
/// Reporting cycles never overlap: the next flush only starts once the previous write has finished, and ticks missed
/// while a write was in progress are delayed rather than bunched up.
pub(crate) struct Forwarder {
    client: GraphiteClient,
    state: Arc<State>,
    flush_interval: Duration,
    cancel: CancellationToken,
    telemetry: Option<Telemetry>,
}

impl Forwarder {
    /// Creates a new `Forwarder`.
    pub fn new(
        client: GraphiteClient,
        state: Arc<State>,
        flush_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Forwarder { client, state, flush_interval, cancel, telemetry: None }
    }

    fn update_telemetry(&mut self, update: &TelemetryUpdate) {
        // Telemetry is registered lazily so that it goes through the installed recorder, which only exists once metrics
        // have actually been recorded.
        if self.state.telemetry_enabled() && update.had_updates() {
            let transport = self.client.endpoint().protocol().transport_id();
            let telemetry = self.telemetry.get_or_insert_with(|| Telemetry::new(transport));
            telemetry.apply_update(update);
        }
    }

    /// Runs one reporting cycle.
    pub async fn flush(&mut self, update: &mut TelemetryUpdate) {
        update.clear();
        let payload = self.state.flush(Utc::now(), update);

        let batch_size = self.client.policy().batch_size.max(1);
        let num_batches = payload.len().div_ceil(batch_size);

        match self.client.write(&payload, &self.cancel).await {
            Ok(summary) => {
                debug!(
                    batches_sent = summary.batches,
                    points_sent = summary.points,
                    bytes_sent = summary.bytes,
                    "Finished sending payload."
                );
                update.track_write_succeeded(&summary);
            }
            Err(WriteError::CircuitOpen) => {
                warn!(points_dropped = payload.len(), "Circuit breaker open, dropping payload.");
                update.track_circuit_open(num_batches);
            }
            Err(WriteError::Cancelled { batches_sent }) => {
                debug!(batches_sent, "Payload write cancelled.");
                update.track_write_failed(num_batches.saturating_sub(batches_sent));
            }
            Err(e) => {
                let batches_dropped = num_batches.saturating_sub(e.batches_sent());
                error!(error = %e, batches_dropped, "Failed to send payload.");
                update.track_write_failed(batches_dropped);
            }
        }

        self.update_telemetry(update);
    }

    /// Runs the forwarder, sending out payloads to the configured endpoint at the configured interval, until it is
    /// cancelled.
    pub async fn run(mut self) {
        let mut update = TelemetryUpdate::default();

        let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(endpoint = %self.client.endpoint(), flush_interval = ?self.flush_interval, "Starting forwarder.");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.flush(&mut update).await;
        }

        self.client.close().await;
        debug!("Forwarder stopped.");
    }
}
