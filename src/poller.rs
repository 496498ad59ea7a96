use crate::bus::{ReadOutcome, SensorReader, StatusBus};
use crate::db::ReadingSink;
use crate::tracker::UsageTracker;
use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Drives the fixed-cadence cycle: begin read, settle, read, detect,
/// persist. Owns the tracker memory for the life of the process.
pub struct Poller<B: StatusBus> {
    reader: SensorReader<B>,
    tracker: UsageTracker,
    sink: ReadingSink,
    settle_delay: Duration,
}

impl<B: StatusBus> Poller<B> {
    pub fn new(
        reader: SensorReader<B>,
        tracker: UsageTracker,
        sink: ReadingSink,
        settle_delay: Duration,
    ) -> Self {
        Self {
            reader,
            tracker,
            sink,
            settle_delay,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        tracing::info!("poll loop started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            if let Err(err) = self.reader.begin_read() {
                tracing::debug!(error=%err, "begin-read command failed, retrying next cycle");
            }

            // The settle delay must exceed the device's conversion time.
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settle_delay) => {}
            }

            match self.reader.read_state() {
                ReadOutcome::Ready(states) => {
                    let now_ms = Utc::now().timestamp_millis();
                    for sample in self.tracker.observe(states, now_ms) {
                        tracing::debug!(
                            channel = %sample.channel,
                            watts = sample.watts,
                            "usage sample"
                        );
                        if let Err(err) = self.sink.persist(&sample).await {
                            // A lost sample beats a stalled sensor.
                            tracing::warn!(
                                error = %err,
                                channel = %sample.channel,
                                "failed to persist usage sample"
                            );
                        }
                    }
                }
                ReadOutcome::NotReady => tracing::trace!("sensor not ready"),
                ReadOutcome::Io(err) => {
                    tracing::debug!(error=%err, "bus read failed, treating as not ready");
                }
            }
        }
        tracing::info!("poll loop stopped");
        Ok(())
    }
}
