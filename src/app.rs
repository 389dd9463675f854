use crate::config::Config;
use crate::data::Snapshot;
use crate::persistence::SnapshotStore;
use crate::scraper::{CoinScraper, ExtractionError};
use crate::web::run_web_server;
use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How one extraction cycle ended. Drives how long the scheduler sleeps
/// before the next one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A snapshot of this many records replaced the store.
    Updated(usize),
    /// Every attempt failed with a classified extraction error; the store
    /// is untouched and the next cycle runs on the regular interval.
    Exhausted,
    /// An unexpected error escaped the attempt; next cycle runs after a
    /// short cooldown instead of the regular interval.
    Faulted,
    Cancelled,
}

pub struct App<S: CoinScraper, P: SnapshotStore> {
    config: Config,
    scraper: S,
    store: Arc<P>,
}

impl<S: CoinScraper, P: SnapshotStore + 'static> App<S, P> {
    pub fn new(config: Config, scraper: S, store: Arc<P>) -> Self {
        Self {
            config,
            scraper,
            store,
        }
    }

    /// Owns the process-lifetime polling loop. This is the only writer of
    /// the store and the only task that ever runs an extraction, so cycles
    /// can never overlap.
    pub async fn run(&mut self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        let server_fut = run_web_server(
            cancellation_token.clone(),
            self.store.clone(),
            self.config.host.clone(),
            self.config.port,
        );

        // First cycle runs immediately; later ones wait out the schedule.
        let mut next_delay = Duration::ZERO;

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("Cancellation requested, exiting...");
                    break;
                }
                _ = tokio::time::sleep(next_delay) => {
                    let outcome = self.run_cycle(&cancellation_token).await;
                    next_delay = match outcome {
                        CycleOutcome::Updated(count) => {
                            info!("snapshot updated with {count} records");
                            self.config.refresh_interval()
                        }
                        CycleOutcome::Exhausted => {
                            warn!("no update this cycle, retries exhausted");
                            self.config.refresh_interval()
                        }
                        CycleOutcome::Faulted => {
                            warn!(
                                "cycle faulted, cooling down for {}s",
                                self.config.error_cooldown_sec
                            );
                            self.config.error_cooldown()
                        }
                        CycleOutcome::Cancelled => break,
                    };
                }
            }
        }

        server_fut.await?;

        Ok(())
    }

    /// One cycle: up to `max_retries` sequential retries after the initial
    /// attempt, with a fixed delay in between, on classified extraction
    /// errors only. Anything else aborts the cycle as a fault.
    async fn run_cycle(&self, cancellation_token: &CancellationToken) -> CycleOutcome {
        let attempts = self.config.max_retries + 1;

        for attempt in 1..=attempts {
            match self.scraper.scrape().await {
                Ok(records) => {
                    let snapshot = Snapshot::new(records, Utc::now());
                    let count = snapshot.count;

                    // The in-memory view still updates when the durable
                    // mirror fails, so the API stays fresh.
                    if let Err(e) = self.store.put(snapshot).await {
                        error!("Error saving snapshot: {e}");
                    }

                    return CycleOutcome::Updated(count);
                }
                Err(err) => match err.downcast_ref::<ExtractionError>() {
                    Some(classified) => {
                        warn!("extraction attempt {attempt}/{attempts} failed: {classified}");
                        if attempt < attempts {
                            tokio::select! {
                                _ = cancellation_token.cancelled() => return CycleOutcome::Cancelled,
                                _ = tokio::time::sleep(self.config.retry_delay()) => {}
                            }
                        }
                    }
                    None => {
                        error!("unexpected error in extraction cycle: {err:#}");
                        return CycleOutcome::Faulted;
                    }
                },
            }
        }

        CycleOutcome::Exhausted
    }
}
