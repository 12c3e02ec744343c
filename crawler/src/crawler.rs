use crate::clock::Clock;
use crate::connection::Connector;
use crate::probe::Prober;
use crate::routing::{Router, RoutingError};
use crate::schedule::shutdown_channel;
use crate::store::{Backend, RecordStore, StoreError};
use crate::sweeper::LivelinessSweeper;
use crate::walker::RandomWalker;
use log::{info, warn};
use overlay_peers_connection::SeedAddress;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Errors that can occur while running a crawler.
#[derive(Debug)]
pub enum CrawlerError {
    /// The record store failed.
    Store(StoreError),
    /// The routing collaborator could not be bootstrapped.
    Bootstrap(RoutingError),
    /// A crawler task panicked or was cancelled.
    TaskFailed(String),
}

impl fmt::Display for CrawlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlerError::Store(e) => write!(f, "Store error: {e}"),
            CrawlerError::Bootstrap(e) => write!(f, "Bootstrap failed: {e}"),
            CrawlerError::TaskFailed(reason) => write!(f, "Crawler task failed: {reason}"),
        }
    }
}

impl std::error::Error for CrawlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CrawlerError::Store(e) => Some(e),
            CrawlerError::Bootstrap(e) => Some(e),
            CrawlerError::TaskFailed(_) => None,
        }
    }
}

impl From<StoreError> for CrawlerError {
    fn from(err: StoreError) -> Self {
        CrawlerError::Store(err)
    }
}

impl From<RoutingError> for CrawlerError {
    fn from(err: RoutingError) -> Self {
        CrawlerError::Bootstrap(err)
    }
}

/// A discovery and liveliness crawler for an overlay network.
///
/// The crawler joins the overlay through seed peers and then runs two loops
/// side by side. A random walk asks the router for peers close to random
/// targets and records every new one, while a liveliness sweep re-probes
/// every recorded peer and evicts those that left. Both loops share one
/// [`RecordStore`] and are stopped through the [`CrawlerHandle`] returned by
/// [`Crawler::start`].
///
/// Use [`crate::CrawlerBuilder`] to create one.
pub struct Crawler<R, B, C> {
    /// Routing collaborator.
    router: R,
    /// Connector shared by both loops' probes.
    connector: C,
    /// Peer records and counters.
    store: Arc<RecordStore<B>>,
    /// Source of record timestamps.
    clock: Arc<dyn Clock>,
    /// Deadline of a probe's first attempt.
    probe_timeout: Duration,
    /// Bound on a closest peers query.
    closest_peers_timeout: Duration,
    /// Minimum period of the random walk.
    walk_interval: Duration,
    /// Minimum period of the liveliness sweep.
    sweep_interval: Duration,
}

impl<R: Router, B: Backend, C: Connector> Crawler<R, B, C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        router: R,
        connector: C,
        store: Arc<RecordStore<B>>,
        clock: Arc<dyn Clock>,
        probe_timeout: Duration,
        closest_peers_timeout: Duration,
        walk_interval: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Crawler {
            router,
            connector,
            store,
            clock,
            probe_timeout,
            closest_peers_timeout,
            walk_interval,
            sweep_interval,
        }
    }

    /// The store the crawler records peers in.
    pub fn store(&self) -> &Arc<RecordStore<B>> {
        &self.store
    }

    /// Bootstrap the routing collaborator and start crawling.
    ///
    /// Seeds that can not be added are skipped, the crawl only fails to start
    /// if the router can not be bootstrapped with whatever seeds it got.
    ///
    /// # Arguments
    ///
    /// * `seeds` - Peers to join the overlay through.
    /// * `verbose` - Log new and departed peers at info instead of debug level.
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlerHandle)` - Both loops are running.
    /// * `Err(CrawlerError::Bootstrap)` - Nothing was started.
    pub async fn start(
        &self,
        seeds: &[SeedAddress],
        verbose: bool,
    ) -> Result<CrawlerHandle<B>, CrawlerError> {
        for seed in seeds {
            match self.router.connect_seed(seed).await {
                Ok(()) => info!("Connected to seed {seed}"),
                Err(e) => warn!("Skipping seed {seed}: {e}"),
            }
        }

        self.router.bootstrap().await?;
        info!("Crawler has been bootstrapped");

        let prober = Prober::new(self.connector.clone(), self.probe_timeout);
        let walker = RandomWalker::new(
            self.router.clone(),
            self.store.clone(),
            prober.clone(),
            self.clock.clone(),
            self.closest_peers_timeout,
            self.walk_interval,
            verbose,
        );
        let sweeper = LivelinessSweeper::new(
            self.store.clone(),
            prober,
            self.clock.clone(),
            self.sweep_interval,
            verbose,
        );

        let (shutdown_tx, shutdown) = shutdown_channel();
        let walker = tokio::spawn(walker.run(shutdown.clone()));
        let sweeper = tokio::spawn(sweeper.run(shutdown));

        Ok(CrawlerHandle {
            shutdown: shutdown_tx,
            walker,
            sweeper,
            store: self.store.clone(),
        })
    }
}

/// Handle to a running crawler.
///
/// Dropping the handle without calling [`CrawlerHandle::stop`] also stops
/// both loops, but the store is not flushed.
pub struct CrawlerHandle<B> {
    shutdown: watch::Sender<bool>,
    walker: JoinHandle<()>,
    sweeper: JoinHandle<()>,
    store: Arc<RecordStore<B>>,
}

impl<B: Backend> CrawlerHandle<B> {
    /// Stop both loops, wait for them to finish, and flush the store.
    ///
    /// A probe in flight is allowed to run to its own deadline.
    pub async fn stop(self) -> Result<(), CrawlerError> {
        info!("Stopping crawler");
        // Fails only if both loops are already gone.
        let _ = self.shutdown.send(true);

        let walker = self.walker.await;
        let sweeper = self.sweeper.await;
        for result in [walker, sweeper] {
            if let Err(e) = result {
                return Err(CrawlerError::TaskFailed(e.to_string()));
            }
        }

        self.store.flush()?;
        info!("Crawler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CrawlerBuilder;
    use crate::clock::test_utils::ManualClock;
    use crate::connection::test_utils::{MockBehavior, MockConnector};
    use crate::routing::test_utils::{MockResponse, MockRouter};
    use crate::store::{Counter, CounterKind, MemoryBackend};
    use overlay_peers_connection::PeerId;

    fn crawler(
        router: &MockRouter,
        connector: &MockConnector,
    ) -> Crawler<MockRouter, MemoryBackend, MockConnector> {
        CrawlerBuilder::new(
            router.clone(),
            connector.clone(),
            Arc::new(RecordStore::new(MemoryBackend::new())),
        )
        .with_clock(Arc::new(ManualClock::at(2024, 3, 9, 12)))
        .build()
    }

    fn seeds() -> Vec<SeedAddress> {
        vec![
            "QmSeedA@127.0.0.1:4001".parse().unwrap(),
            "QmSeedB@[::1]:4001".parse().unwrap(),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop() {
        let router = MockRouter::new();
        let connector = MockConnector::new();
        let peer = PeerId::new("QmFound").unwrap();
        connector.set(&peer, MockBehavior::Reachable);
        router.set_fallback(vec![peer.clone()]);
        let crawler = crawler(&router, &connector);

        let handle = crawler.start(&seeds(), false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.stop().await.unwrap();

        assert_eq!(router.seeds(), seeds());
        assert!(!router.queries().is_empty());
        assert!(crawler.store().get(&peer).unwrap().is_some());
        assert_eq!(
            crawler
                .store()
                .counter(&Counter::total(CounterKind::Count))
                .unwrap(),
            1
        );

        // Nothing runs after stop.
        let queries = router.queries().len();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(router.queries().len(), queries);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_is_fatal() {
        let router = MockRouter::new();
        let connector = MockConnector::new();
        router.fail_bootstrap();
        let crawler = crawler(&router, &connector);

        let result = crawler.start(&seeds(), true).await;

        assert!(matches!(result, Err(CrawlerError::Bootstrap(_))));
        assert_eq!(router.seeds().len(), 2);
        assert!(router.queries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_departed_peer() {
        let router = MockRouter::new();
        let connector = MockConnector::new();
        let peer = PeerId::new("QmFlaky").unwrap();
        // Reachable when the walk finds it, refused on the next probe.
        connector.set(&peer, MockBehavior::Flapping);
        router.push_response(MockResponse::Peers(vec![peer.clone()]));
        let crawler = CrawlerBuilder::new(
            router.clone(),
            connector.clone(),
            Arc::new(RecordStore::new(MemoryBackend::new())),
        )
        .with_walk_interval(Duration::from_secs(3600))
        .unwrap()
        .with_sweep_interval(Duration::from_secs(1))
        .unwrap()
        .build();

        let handle = crawler.start(&[], false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.stop().await.unwrap();

        let store = crawler.store();
        assert_eq!(store.get(&peer).unwrap(), None);
        assert_eq!(store.counter(&Counter::total(CounterKind::Count)).unwrap(), 0);
        assert_eq!(store.counter(&Counter::total(CounterKind::Left)).unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loops_keep_counters_consistent() {
        let router = MockRouter::new();
        let connector = MockConnector::new();
        let peers: Vec<PeerId> = (0..16)
            .map(|i| PeerId::new(format!("QmPeer{i}")).unwrap())
            .collect();
        for (i, peer) in peers.iter().enumerate() {
            let behavior = if i % 3 == 0 {
                MockBehavior::Refused
            } else {
                MockBehavior::Flapping
            };
            connector.set(peer, behavior);
        }
        router.set_fallback(peers.clone());
        let clock = Arc::new(ManualClock::at(2024, 3, 9, 12));
        let crawler = CrawlerBuilder::new(
            router.clone(),
            connector.clone(),
            Arc::new(RecordStore::new(MemoryBackend::new())),
        )
        .with_clock(clock.clone())
        .with_walk_interval(Duration::from_millis(1))
        .unwrap()
        .with_sweep_interval(Duration::from_millis(1))
        .unwrap()
        .build();

        let handle = crawler.start(&[], false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.stop().await.unwrap();

        let store = crawler.store();
        let stored = store.scan_peers().unwrap().count() as i64;
        let total = store.counter(&Counter::total(CounterKind::Count)).unwrap();
        let left = store.counter(&Counter::total(CounterKind::Left)).unwrap();
        let today = clock.now().date_naive();
        let discovered = store
            .counter(&Counter::daily(today, CounterKind::Count))
            .unwrap();

        assert_eq!(total, stored);
        assert_eq!(discovered - left, total);
        assert!(total >= 0);
        assert!(discovered > 0);
    }
}
