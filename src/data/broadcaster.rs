use std::sync::Arc;
use std::time::Duration;
use log::{debug, info, warn};

use crate::data::fetcher::PriceSource;
use crate::data::history::HistoryBuffer;
use crate::data::pubsub::{BroadcastReport, SubscriberRegistry};
use crate::data::sample::Sample;
use crate::errors::FetchError;

/// Decides how long to wait after a failed fetch before trying again.
pub trait RetryPolicy: Send {
    fn delay_after_failure(&mut self, consecutive_failures: u32) -> Duration;
}

/// Retry forever at the sampling interval, without backoff.
#[derive(Debug, Clone, Copy)]
pub struct FixedInterval(pub Duration);

impl RetryPolicy for FixedInterval {
    fn delay_after_failure(&mut self, _consecutive_failures: u32) -> Duration {
        self.0
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    Published { sample: Sample, report: BroadcastReport },
    Skipped(FetchError),
}

/// Periodic driver: fetch, record in history, fan out.
pub struct PriceBroadcaster<P: PriceSource, R: RetryPolicy = FixedInterval> {
    source: P,
    history: Arc<HistoryBuffer>,
    registry: Arc<SubscriberRegistry>,
    interval: Duration,
    retry: R,
    consecutive_failures: u32,
}

impl<P: PriceSource> PriceBroadcaster<P, FixedInterval> {
    pub fn new(
        source: P,
        history: Arc<HistoryBuffer>,
        registry: Arc<SubscriberRegistry>,
        interval: Duration,
    ) -> Self {
        Self::with_retry_policy(source, history, registry, interval, FixedInterval(interval))
    }
}

impl<P: PriceSource, R: RetryPolicy> PriceBroadcaster<P, R> {
    pub fn with_retry_policy(
        source: P,
        history: Arc<HistoryBuffer>,
        registry: Arc<SubscriberRegistry>,
        interval: Duration,
        retry: R,
    ) -> Self {
        Self {
            source,
            history,
            registry,
            interval,
            retry,
            consecutive_failures: 0,
        }
    }

    /// One fetch. A failed fetch publishes nothing.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        match self.source.fetch().await {
            Ok(price) => {
                self.consecutive_failures = 0;
                let sample = Sample::now(price);
                self.history.append(sample);
                let report = self.registry.broadcast(&sample);
                CycleOutcome::Published { sample, report }
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                CycleOutcome::Skipped(e)
            }
        }
    }

    /// Runs until the task is aborted.
    pub async fn run(mut self) {
        info!("Starting price broadcast every {:?}", self.interval);

        loop {
            let delay = match self.run_cycle().await {
                CycleOutcome::Published { sample, report } => {
                    if report.delivered == 0 && self.registry.is_empty() {
                        debug!("No subscribers, price {} kept in history only", sample.price);
                    } else {
                        debug!(
                            "Broadcasted price {} to {} subscribers ({} dropped)",
                            sample.price, report.delivered, report.dropped
                        );
                    }
                    if report.dropped > 0 {
                        info!("Dropped {} slow subscribers this cycle", report.dropped);
                    }
                    self.interval
                }
                CycleOutcome::Skipped(e) => {
                    warn!(
                        "Error fetching price (attempt {}): {}",
                        self.consecutive_failures(),
                        e
                    );
                    self.retry.delay_after_failure(self.consecutive_failures())
                }
            };
            tokio::time::sleep(delay).await;
        }
    }

    /// Failed fetches since the last successful one.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
