//! Liveliness sweep over the known peers.

use crate::clock::Clock;
use crate::connection::Connector;
use crate::probe::{Prober, Reachability};
use crate::schedule::Shutdown;
use crate::store::{Backend, PeerRecord, RecordStore, StoreError, Transition};
use chrono::{DateTime, Utc};
use log::{error, info, log, Level};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Tally of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Records probed and still present when their outcome was applied.
    pub checked: usize,
    /// Records re-timestamped.
    pub refreshed: usize,
    /// Records deleted as departed.
    pub departed: usize,
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} peers checked, {} refreshed, {} departed",
            self.checked, self.refreshed, self.departed
        )
    }
}

/// Decide the fate of a stored peer after a sweep probe.
fn sweep_transition(
    current: Option<&PeerRecord>,
    reachability: Reachability,
    now: DateTime<Utc>,
) -> Transition {
    let reachable = reachability.is_reachable();
    match current {
        // Removed by the walk since the pass started.
        None => Transition::Untouched,
        Some(record) if !record.nat_suspected && !reachable => Transition::Departed,
        Some(_) => Transition::Refreshed(PeerRecord::new(!reachable, now)),
    }
}

/// Periodically re-probes every stored peer and evicts the ones that left.
pub struct LivelinessSweeper<B, C> {
    store: Arc<RecordStore<B>>,
    prober: Prober<C>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    verbose: bool,
}

impl<B: Backend, C: Connector> LivelinessSweeper<B, C> {
    /// Create a sweeper.
    ///
    /// # Arguments
    ///
    /// * `store` - Store shared with the random walk.
    /// * `prober` - Reachability probe.
    /// * `clock` - Source of observation timestamps.
    /// * `interval` - Minimum time between the starts of two passes.
    /// * `verbose` - Log per-peer events at info instead of debug level.
    pub fn new(
        store: Arc<RecordStore<B>>,
        prober: Prober<C>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        verbose: bool,
    ) -> Self {
        Self {
            store,
            prober,
            clock,
            interval,
            verbose,
        }
    }

    /// Probe every stored peer once.
    ///
    /// The outcome for each peer is applied under the store lock against the
    /// record as it is at that moment, not as it was when the pass started.
    ///
    /// # Returns
    ///
    /// * `Ok(SweepSummary)` - The pass completed.
    /// * `Err(StoreError)` - The pass was abandoned, the peer being processed is not counted.
    pub async fn sweep_pass(&self) -> Result<SweepSummary, StoreError> {
        let level = if self.verbose {
            Level::Info
        } else {
            Level::Debug
        };
        let mut summary = SweepSummary::default();

        for entry in self.store.scan_peers()? {
            let (peer, _) = entry?;
            let reachability = self.prober.probe(&peer).await;
            let now = self.clock.now();

            let transition = self.store.update(&peer, now, |current| {
                sweep_transition(current, reachability, now)
            })?;

            if transition == Transition::Untouched {
                continue;
            }
            summary.checked += 1;
            match transition {
                Transition::Departed => {
                    log!(level, "Peer left: {peer}");
                    summary.departed += 1;
                }
                Transition::Refreshed(record) => {
                    log!(
                        level,
                        "Peer {peer} is {reachability} (nat suspected: {})",
                        record.nat_suspected
                    );
                    summary.refreshed += 1;
                }
                Transition::Discovered(_) | Transition::Untouched => {}
            }
        }

        Ok(summary)
    }

    /// Sweep continuously until shutdown is requested.
    ///
    /// Pass starts are at least the configured interval apart. Shutdown is
    /// checked before every pass and interrupts the wait between passes, an
    /// in-flight probe runs to its own timeout.
    pub async fn run(self, mut shutdown: Shutdown) {
        info!("Liveliness sweep started");

        loop {
            if shutdown.is_requested() {
                break;
            }

            let started = Instant::now();
            match self.sweep_pass().await {
                Ok(summary) => info!("Sweep pass complete: {summary}"),
                Err(e) => error!("Sweep pass abandoned: {e}"),
            }

            if !shutdown.pause_until(started + self.interval).await {
                break;
            }
        }

        info!("Liveliness sweep stopped");
    }
}
