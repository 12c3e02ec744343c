//! Random walks through the overlay's routing structure.

use crate::clock::Clock;
use crate::connection::Connector;
use crate::probe::{Prober, Reachability};
use crate::routing::Router;
use crate::schedule::Shutdown;
use crate::store::{Backend, PeerRecord, RecordStore, StoreError, Transition};
use chrono::{DateTime, Utc};
use log::{debug, error, info, log, Level};
use overlay_peers_connection::PeerId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

/// Tally of one walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSummary {
    /// Candidates returned by the router, duplicates included.
    pub candidates: usize,
    /// Candidates seen for the first time.
    pub discovered: usize,
    /// Known candidates re-timestamped.
    pub refreshed: usize,
    /// Known candidates deleted as departed.
    pub departed: usize,
}

impl fmt::Display for WalkSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} candidates, {} new, {} refreshed, {} departed",
            self.candidates, self.discovered, self.refreshed, self.departed
        )
    }
}

/// Decide the fate of a walk candidate after its probe.
fn walk_transition(
    current: Option<&PeerRecord>,
    reachability: Reachability,
    now: DateTime<Utc>,
) -> Transition {
    let reachable = reachability.is_reachable();
    match current {
        None => Transition::Discovered(PeerRecord::new(!reachable, now)),
        Some(record) if !record.nat_suspected && !reachable => Transition::Departed,
        // The NAT verdict is left to the sweep.
        Some(record) => Transition::Refreshed(record.observed_at(now)),
    }
}

/// Repeatedly asks the router for peers close to random targets and records them.
pub struct RandomWalker<R, B, C> {
    router: R,
    store: Arc<RecordStore<B>>,
    prober: Prober<C>,
    clock: Arc<dyn Clock>,
    closest_peers_timeout: Duration,
    interval: Duration,
    verbose: bool,
}

impl<R: Router, B: Backend, C: Connector> RandomWalker<R, B, C> {
    /// Create a walker.
    ///
    /// # Arguments
    ///
    /// * `router` - Routing collaborator answering closest peer queries.
    /// * `store` - Store shared with the liveliness sweep.
    /// * `prober` - Reachability probe.
    /// * `clock` - Source of observation timestamps.
    /// * `closest_peers_timeout` - Bound on a single closest peers query.
    /// * `interval` - Minimum time between the starts of two walks.
    /// * `verbose` - Log per-peer events at info instead of debug level.
    pub fn new(
        router: R,
        store: Arc<RecordStore<B>>,
        prober: Prober<C>,
        clock: Arc<dyn Clock>,
        closest_peers_timeout: Duration,
        interval: Duration,
        verbose: bool,
    ) -> Self {
        Self {
            router,
            store,
            prober,
            clock,
            closest_peers_timeout,
            interval,
            verbose,
        }
    }

    /// Walk towards a freshly generated random target.
    pub async fn walk_once(&self) -> Result<WalkSummary, StoreError> {
        self.walk_from(&PeerId::random()).await
    }

    /// Walk towards `target`: probe every peer the router returns and record the outcome.
    ///
    /// A failed or timed out routing query is not an error, the walk just has
    /// no candidates.
    ///
    /// # Returns
    ///
    /// * `Ok(WalkSummary)` - The walk completed.
    /// * `Err(StoreError)` - The walk was abandoned, the candidate being processed is not counted.
    pub async fn walk_from(&self, target: &PeerId) -> Result<WalkSummary, StoreError> {
        let level = if self.verbose {
            Level::Info
        } else {
            Level::Debug
        };
        let candidates = self.closest_peers(target).await;
        let mut summary = WalkSummary {
            candidates: candidates.len(),
            ..WalkSummary::default()
        };

        for peer in candidates {
            let reachability = self.prober.probe(&peer).await;
            let now = self.clock.now();

            let transition = self.store.update(&peer, now, |current| {
                walk_transition(current, reachability, now)
            })?;

            match transition {
                Transition::Discovered(record) => {
                    log!(
                        level,
                        "New peer: {peer} (nat suspected: {})",
                        record.nat_suspected
                    );
                    summary.discovered += 1;
                }
                Transition::Departed => {
                    log!(level, "Peer left: {peer}");
                    summary.departed += 1;
                }
                Transition::Refreshed(_) => summary.refreshed += 1,
                Transition::Untouched => {}
            }
        }

        Ok(summary)
    }

    async fn closest_peers(&self, target: &PeerId) -> Vec<PeerId> {
        let query = self
            .router
            .closest_peers(target, self.closest_peers_timeout);
        match timeout(self.closest_peers_timeout, query).await {
            Ok(Ok(peers)) => {
                debug!("Found {} peers close to {target}", peers.len());
                peers
            }
            Ok(Err(e)) => {
                debug!("Closest peers query for {target} failed: {e}");
                Vec::new()
            }
            Err(_) => {
                debug!("Closest peers query for {target} timed out");
                Vec::new()
            }
        }
    }

    /// Walk continuously until shutdown is requested.
    ///
    /// Walk starts are at least the configured interval apart. Shutdown is
    /// checked before every walk and interrupts the wait between walks.
    pub async fn run(self, mut shutdown: Shutdown) {
        info!("Random walk started");

        loop {
            if shutdown.is_requested() {
                break;
            }

            let started = Instant::now();
            match self.walk_once().await {
                Ok(summary) => debug!("Walk complete: {summary}"),
                Err(e) => error!("Walk abandoned: {e}"),
            }

            if !shutdown.pause_until(started + self.interval).await {
                break;
            }
        }

        info!("Random walk stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_utils::ManualClock;
    use crate::connection::test_utils::{MockBehavior, MockConnector};
    use crate::routing::test_utils::{MockResponse, MockRouter};
    use crate::schedule::shutdown_channel;
    use crate::store::test_utils::FailingBackend;
    use crate::store::{Counter, CounterKind, MemoryBackend};

    const CLOSEST_PEERS_TIMEOUT: Duration = Duration::from_secs(60);

    struct Harness {
        store: Arc<RecordStore<MemoryBackend>>,
        connector: MockConnector,
        router: MockRouter,
        clock: Arc<ManualClock>,
        walker: RandomWalker<MockRouter, MemoryBackend, MockConnector>,
    }

    fn harness() -> Harness {
        let store = Arc::new(RecordStore::new(MemoryBackend::new()));
        let connector = MockConnector::new();
        let router = MockRouter::new();
        let clock = Arc::new(ManualClock::at(2024, 3, 9, 12));
        let walker = RandomWalker::new(
            router.clone(),
            store.clone(),
            Prober::new(connector.clone(), Duration::from_secs(1)),
            clock.clone(),
            CLOSEST_PEERS_TIMEOUT,
            Duration::from_secs(1),
            true,
        );
        Harness {
            store,
            connector,
            router,
            clock,
            walker,
        }
    }

    fn peer(id: &str) -> PeerId {
        PeerId::new(id).unwrap()
    }

    impl Harness {
        fn today(&self, kind: CounterKind) -> i64 {
            let date = self.clock.now().date_naive();
            self.store.counter(&Counter::daily(date, kind)).unwrap()
        }

        fn total(&self, kind: CounterKind) -> i64 {
            self.store.counter(&Counter::total(kind)).unwrap()
        }
    }

    #[tokio::test]
    async fn test_walk_discovers_new_peers() {
        let h = harness();
        let (a, b) = (peer("QmA"), peer("QmB"));
        h.connector.set(&a, MockBehavior::Reachable);
        h.connector.set(&b, MockBehavior::Refused);
        h.router
            .push_response(MockResponse::Peers(vec![a.clone(), b.clone()]));

        let summary = h.walker.walk_once().await.unwrap();

        assert_eq!(
            summary,
            WalkSummary {
                candidates: 2,
                discovered: 2,
                refreshed: 0,
                departed: 0
            }
        );
        let now = h.clock.now();
        assert_eq!(h.store.get(&a).unwrap(), Some(PeerRecord::new(false, now)));
        assert_eq!(h.store.get(&b).unwrap(), Some(PeerRecord::new(true, now)));
        assert_eq!(h.total(CounterKind::Count), 2);
        assert_eq!(h.today(CounterKind::Count), 2);
        assert_eq!(h.router.queries().len(), 1);
    }

    #[tokio::test]
    async fn test_walk_targets_are_random() {
        let h = harness();

        h.walker.walk_once().await.unwrap();
        h.walker.walk_once().await.unwrap();

        let queries = h.router.queries();
        assert_eq!(queries.len(), 2);
        assert_ne!(queries[0], queries[1]);
    }

    #[tokio::test]
    async fn test_walk_refresh_keeps_nat_verdict() {
        let h = harness();
        let (a, b) = (peer("QmA"), peer("QmB"));
        h.connector.set(&a, MockBehavior::Flapping);
        h.connector.set(&b, MockBehavior::Reachable);
        h.router
            .push_response(MockResponse::Peers(vec![b.clone()]));
        h.walker.walk_once().await.unwrap();

        // A NAT suspected peer that now answers is refreshed, not re-judged.
        h.store
            .update(&a, h.clock.now(), |_| {
                Transition::Discovered(PeerRecord::new(true, h.clock.now()))
            })
            .unwrap();
        h.clock.advance(chrono::Duration::seconds(10));
        h.router
            .push_response(MockResponse::Peers(vec![a.clone(), b.clone()]));

        let summary = h.walker.walk_once().await.unwrap();

        assert_eq!(summary.refreshed, 2);
        let now = h.clock.now();
        assert_eq!(h.store.get(&a).unwrap(), Some(PeerRecord::new(true, now)));
        assert_eq!(h.store.get(&b).unwrap(), Some(PeerRecord::new(false, now)));
        assert_eq!(h.total(CounterKind::Count), 2);
    }

    #[tokio::test]
    async fn test_walk_departure_matches_sweep() {
        let h = harness();
        let x = peer("QmX");
        h.connector.set(&x, MockBehavior::Flapping);
        h.router.push_response(MockResponse::Peers(vec![x.clone()]));
        h.router.push_response(MockResponse::Peers(vec![x.clone()]));

        // Reachable on the first probe, refused on the second.
        h.walker.walk_once().await.unwrap();
        let summary = h.walker.walk_once().await.unwrap();

        assert_eq!(summary.departed, 1);
        assert_eq!(h.store.get(&x).unwrap(), None);
        assert_eq!(h.total(CounterKind::Count), 0);
        assert_eq!(h.total(CounterKind::Left), 1);
        assert_eq!(h.today(CounterKind::Left), 1);
        assert_eq!(h.today(CounterKind::Count), 1);
    }

    #[tokio::test]
    async fn test_walk_unreachable_nat_peer_is_kept() {
        let h = harness();
        let n = peer("QmNat");
        h.router.push_response(MockResponse::Peers(vec![n.clone()]));
        h.router.push_response(MockResponse::Peers(vec![n.clone()]));

        h.walker.walk_once().await.unwrap();
        let summary = h.walker.walk_once().await.unwrap();

        assert_eq!(summary.refreshed, 1);
        assert_eq!(h.store.get(&n).unwrap().map(|r| r.nat_suspected), Some(true));
        assert_eq!(h.total(CounterKind::Left), 0);
    }

    #[tokio::test]
    async fn test_walk_tolerates_duplicates() {
        let h = harness();
        let a = peer("QmA");
        h.connector.set(&a, MockBehavior::Reachable);
        h.router
            .push_response(MockResponse::Peers(vec![a.clone(), a.clone()]));

        let summary = h.walker.walk_once().await.unwrap();

        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.discovered, 1);
        assert_eq!(summary.refreshed, 1);
        assert_eq!(h.total(CounterKind::Count), 1);
    }

    #[tokio::test]
    async fn test_routing_failure_yields_no_candidates() {
        let h = harness();
        h.router.push_response(MockResponse::Fail);

        let summary = h.walker.walk_once().await.unwrap();

        assert_eq!(summary, WalkSummary::default());
        assert!(h.connector.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_routing_timeout_yields_no_candidates() {
        let h = harness();
        h.router.push_response(MockResponse::Hang);
        let started = Instant::now();

        let summary = h.walker.walk_once().await.unwrap();

        assert_eq!(summary, WalkSummary::default());
        assert!(started.elapsed() >= CLOSEST_PEERS_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_continues_after_store_failure() {
        let backend = FailingBackend::new();
        let store = Arc::new(RecordStore::new(backend.clone()));
        let connector = MockConnector::new();
        let router = MockRouter::new();
        let clock = Arc::new(ManualClock::at(2024, 3, 9, 12));
        let (a, b) = (peer("QmA"), peer("QmB"));
        connector.set(&a, MockBehavior::Reachable);
        connector.set(&b, MockBehavior::Reachable);
        router.set_fallback(vec![a.clone(), b.clone()]);
        backend.fail_next_commits(1);

        let walker = RandomWalker::new(
            router.clone(),
            store.clone(),
            Prober::new(connector.clone(), Duration::from_secs(1)),
            clock.clone(),
            CLOSEST_PEERS_TIMEOUT,
            Duration::from_secs(1),
            false,
        );
        let (tx, shutdown) = shutdown_channel();
        let task = tokio::spawn(walker.run(shutdown));

        // The first walk was abandoned at its first candidate.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(router.queries().len(), 1);
        assert_eq!(connector.attempts_for(&b), 0);
        assert_eq!(store.get(&a).unwrap(), None);
        assert_eq!(store.counter(&Counter::total(CounterKind::Count)).unwrap(), 0);

        // The next walk runs on schedule and counts each peer once.
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(router.queries().len(), 2);
        assert!(store.get(&a).unwrap().is_some());
        assert!(store.get(&b).unwrap().is_some());
        let today = clock.now().date_naive();
        assert_eq!(store.counter(&Counter::total(CounterKind::Count)).unwrap(), 2);
        assert_eq!(
            store
                .counter(&Counter::daily(today, CounterKind::Count))
                .unwrap(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_walks_until_shutdown() {
        let h = harness();
        let a = peer("QmA");
        h.connector.set(&a, MockBehavior::Reachable);
        h.router.set_fallback(vec![a.clone()]);

        let (tx, shutdown) = shutdown_channel();
        let router = h.router.clone();
        let store = h.store.clone();
        let task = tokio::spawn(h.walker.run(shutdown));

        // Walks at 0s, 1s, 2s, 3s and 4s.
        tokio::time::sleep(Duration::from_millis(4500)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(router.queries().len(), 5);
        assert!(store.get(&a).unwrap().is_some());
        assert_eq!(
            store.counter(&Counter::total(CounterKind::Count)).unwrap(),
            1
        );
    }
}
