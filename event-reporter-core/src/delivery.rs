//! Delivery loop
//!
//! Periodically snapshots the queue and reports each event. Events that were
//! delivered or permanently rejected are discarded; transient failures stay
//! queued for the next pass. Nothing here is fatal: a failing event, a failed
//! snapshot or a failed discard only affects the current pass.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::watch;

use crate::error::Result;
use crate::store::{Discarded, EventStore};
use crate::types::{DeliveryOutcome, Event};

/// Something that can attempt delivery of one event.
#[async_trait]
pub trait Reporter: Send {
    async fn report(&mut self, event: &Event) -> DeliveryOutcome;
}

/// Jittered delay between passes.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    interval: Duration,
    jitter: Duration,
}

impl Schedule {
    pub fn new(interval: Duration, jitter: Duration) -> Self {
        Self { interval, jitter }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Delay before the next pass: `interval ± jitter`, drawn uniformly.
    ///
    /// Jitter is capped at the interval. Never shorter than one second, or
    /// than `interval` if that is shorter.
    pub fn next_delay(&self) -> Duration {
        let interval_ms = saturating_millis(self.interval);
        let jitter_ms = saturating_millis(self.jitter).min(interval_ms);
        if jitter_ms == 0 {
            return self.interval;
        }

        let floor = self.interval.min(Duration::from_secs(1));
        let low = interval_ms - jitter_ms;
        let high = interval_ms.saturating_add(jitter_ms);
        let delay_ms = rand::rng().random_range(low..=high);

        Duration::from_millis(delay_ms).max(floor)
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Counts for one delivery pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    /// Accepted by the server and discarded
    pub delivered: usize,
    /// Refused for good and discarded
    pub rejected: usize,
    /// Left queued after a transient failure
    pub deferred: usize,
    /// Final outcome reached but the discard failed; retried next pass
    pub discard_failures: usize,
}

impl TickStats {
    pub fn attempted(&self) -> usize {
        self.delivered + self.rejected + self.deferred
    }
}

/// Drains the queue against a `Reporter`.
pub struct DeliveryLoop<R> {
    store: Arc<EventStore>,
    reporter: R,
    schedule: Schedule,
}

impl<R: Reporter> DeliveryLoop<R> {
    pub fn new(store: Arc<EventStore>, reporter: R, schedule: Schedule) -> Self {
        Self {
            store,
            reporter,
            schedule,
        }
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut R {
        &mut self.reporter
    }

    /// Run one full pass over the current queue snapshot.
    pub async fn tick(&mut self) -> TickStats {
        self.pass(|| false).await
    }

    /// Run passes until `shutdown` flips to true (or its sender goes away).
    ///
    /// The wait between passes is interrupted immediately; during a pass the
    /// event in flight is finished before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.schedule.interval().as_secs_f64(),
            "Delivery loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = self.schedule.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let stop = shutdown.clone();
            self.pass(|| *stop.borrow()).await;
        }

        tracing::info!("Delivery loop stopped");
    }

    async fn pass<F>(&mut self, should_stop: F) -> TickStats
    where
        F: Fn() -> bool + Send + Sync,
    {
        let mut stats = TickStats::default();

        let events = match snapshot(self.store.clone()).await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read event queue");
                return stats;
            }
        };

        if events.is_empty() {
            return stats;
        }

        tracing::debug!(count = events.len(), "Reporting queued events");

        let mut first_transient: Option<String> = None;

        for event in events {
            if should_stop() {
                tracing::info!("Shutdown requested, ending delivery pass early");
                break;
            }

            let outcome = self.reporter.report(&event).await;

            match &outcome {
                DeliveryOutcome::Delivered => {
                    stats.delivered += 1;
                    tracing::info!(
                        key = %event.short_key(),
                        occurrences = event.occurrences(),
                        "Event delivered"
                    );
                }
                DeliveryOutcome::Rejected(reason) => {
                    stats.rejected += 1;
                    tracing::error!(
                        key = %event.short_key(),
                        occurrences = event.occurrences(),
                        details = %String::from_utf8_lossy(&event.details),
                        reason = %reason,
                        "Event permanently rejected, discarding"
                    );
                }
                DeliveryOutcome::TransientFailure(cause) => {
                    stats.deferred += 1;
                    tracing::debug!(
                        key = %event.short_key(),
                        cause = %cause,
                        "Event report failed, will retry"
                    );
                    first_transient.get_or_insert_with(|| cause.clone());
                }
            }

            if outcome.is_final() {
                if let Err(e) = discard(self.store.clone(), event.clone()).await {
                    stats.discard_failures += 1;
                    tracing::warn!(
                        key = %event.short_key(),
                        error = %e,
                        "Failed to discard event, will retry next pass"
                    );
                }
            }
        }

        if let Some(cause) = first_transient {
            tracing::warn!(
                deferred = stats.deferred,
                first_cause = %cause,
                "Some events could not be reported"
            );
        }

        tracing::info!(
            delivered = stats.delivered,
            rejected = stats.rejected,
            deferred = stats.deferred,
            discard_failures = stats.discard_failures,
            "Delivery pass complete"
        );

        stats
    }
}

async fn snapshot(store: Arc<EventStore>) -> Result<Vec<Event>> {
    tokio::task::spawn_blocking(move || store.all())
        .await
        .map_err(join_error)?
}

async fn discard(store: Arc<EventStore>, event: Event) -> Result<Discarded> {
    tokio::task::spawn_blocking(move || store.discard(&event))
        .await
        .map_err(join_error)?
}

fn join_error(e: tokio::task::JoinError) -> crate::error::Error {
    crate::error::Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_without_jitter() {
        let schedule = Schedule::new(Duration::from_millis(50), Duration::ZERO);
        assert_eq!(schedule.next_delay(), Duration::from_millis(50));
    }

    #[test]
    fn test_schedule_jitter_bounds() {
        let schedule = Schedule::new(Duration::from_secs(10), Duration::from_secs(3));
        for _ in 0..200 {
            let delay = schedule.next_delay();
            assert!(delay >= Duration::from_secs(7), "{:?}", delay);
            assert!(delay <= Duration::from_secs(13), "{:?}", delay);
        }
    }

    #[test]
    fn test_schedule_floor() {
        let schedule = Schedule::new(Duration::from_secs(2), Duration::from_secs(10));
        for _ in 0..200 {
            assert!(schedule.next_delay() >= Duration::from_secs(1));
        }
    }

    #[test]
    fn test_schedule_huge_jitter_is_capped() {
        let schedule = Schedule::new(
            Duration::from_secs(10),
            Duration::from_secs(10_000_000_000_000_000),
        );
        for _ in 0..200 {
            let delay = schedule.next_delay();
            assert!(delay >= Duration::from_secs(1), "{:?}", delay);
            assert!(delay <= Duration::from_secs(20), "{:?}", delay);
        }
    }

    #[test]
    fn test_schedule_huge_interval() {
        let schedule = Schedule::new(Duration::MAX, Duration::MAX);
        assert!(schedule.next_delay() >= Duration::from_secs(1));
    }

    #[test]
    fn test_tick_stats_attempted() {
        let stats = TickStats {
            delivered: 2,
            rejected: 1,
            deferred: 3,
            discard_failures: 1,
        };
        assert_eq!(stats.attempted(), 6);
    }
}
