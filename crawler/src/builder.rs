//! Builder pattern for configuring and creating crawler instances.

use crate::clock::{Clock, SystemClock};
use crate::connection::Connector;
use crate::crawler::Crawler;
use crate::routing::Router;
use crate::store::{Backend, RecordStore};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default deadline of a probe's first connection attempt.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on a single closest peers query.
pub const DEFAULT_CLOSEST_PEERS_TIMEOUT: Duration = Duration::from_secs(60);
/// Default minimum time between the starts of two random walks.
pub const DEFAULT_WALK_INTERVAL: Duration = Duration::from_secs(1);
/// Default minimum time between the starts of two liveliness sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Errors that can occur during crawler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlerBuilderError {
    /// A probe must be given some time to connect.
    InvalidProbeTimeout,
    /// A zero walk or sweep interval would spin the loop.
    InvalidInterval,
}

impl fmt::Display for CrawlerBuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlerBuilderError::InvalidProbeTimeout => {
                write!(f, "Probe timeout must be greater than zero")
            }
            CrawlerBuilderError::InvalidInterval => {
                write!(f, "Walk and sweep intervals must be greater than zero")
            }
        }
    }
}

impl std::error::Error for CrawlerBuilderError {}

/// Builder for creating a customized [`Crawler`] instance.
///
/// # Example
///
/// ```
/// # fn main() -> Result<(), overlay_peers_crawler::CrawlerBuilderError> {
/// use overlay_peers_crawler::{
///     AddressBook, CrawlerBuilder, MemoryBackend, RecordStore, TcpConnector,
/// };
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let book = AddressBook::new();
/// let store = Arc::new(RecordStore::new(MemoryBackend::new()));
///
/// // Crawl the peers of a static address book, probing them over TCP.
/// let crawler = CrawlerBuilder::new(book.clone(), TcpConnector::new(book), store)
///     .with_probe_timeout(Duration::from_secs(5))?
///     .with_sweep_interval(Duration::from_secs(60))?
///     .build();
/// # Ok(())
/// # }
/// ```
pub struct CrawlerBuilder<R, B, C> {
    /// Routing collaborator used for bootstrap and random walks.
    router: R,
    /// Connector used to probe peers.
    connector: C,
    /// Store shared by both loops.
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

impl<R: Router, B: Backend, C: Connector> CrawlerBuilder<R, B, C> {
    /// Create a new crawler builder.
    ///
    /// # Arguments
    ///
    /// * `router` - The overlay's routing collaborator.
    /// * `connector` - Opens the ephemeral connections used to probe peers.
    /// * `store` - Where peer records and counters are kept.
    ///
    /// # Returns
    ///
    /// A new `CrawlerBuilder` instance with default timings.
    pub fn new(router: R, connector: C, store: Arc<RecordStore<B>>) -> Self {
        CrawlerBuilder {
            router,
            connector,
            store,
            clock: Arc::new(SystemClock),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            closest_peers_timeout: DEFAULT_CLOSEST_PEERS_TIMEOUT,
            walk_interval: DEFAULT_WALK_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Set the deadline of a probe's first connection attempt.
    ///
    /// A probe that misses this deadline is retried once with a deadline
    /// four times as long, so a single probe can take up to five times this
    /// value.
    ///
    /// # Arguments
    ///
    /// * `timeout` - First attempt deadline (defaults to 10 seconds).
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - The builder for method chaining.
    /// * `Err(CrawlerBuilderError)` - If the timeout is zero.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Result<Self, CrawlerBuilderError> {
        if timeout.is_zero() {
            return Err(CrawlerBuilderError::InvalidProbeTimeout);
        }
        self.probe_timeout = timeout;
        Ok(self)
    }

    /// Set the bound on a single closest peers query.
    ///
    /// A query that takes longer yields no candidates for that walk.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Query deadline (defaults to 60 seconds).
    ///
    /// # Returns
    ///
    /// Self for method chaining.
    pub fn with_closest_peers_timeout(mut self, timeout: Duration) -> Self {
        self.closest_peers_timeout = timeout;
        self
    }

    /// Set the minimum time between the starts of two random walks.
    ///
    /// A walk that runs longer than the interval is followed immediately by
    /// the next one.
    ///
    /// # Arguments
    ///
    /// * `interval` - Walk period (defaults to 1 second).
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - The builder for method chaining.
    /// * `Err(CrawlerBuilderError)` - If the interval is zero.
    pub fn with_walk_interval(mut self, interval: Duration) -> Result<Self, CrawlerBuilderError> {
        if interval.is_zero() {
            return Err(CrawlerBuilderError::InvalidInterval);
        }
        self.walk_interval = interval;
        Ok(self)
    }

    /// Set the minimum time between the starts of two liveliness sweeps.
    ///
    /// # Arguments
    ///
    /// * `interval` - Sweep period (defaults to 30 seconds).
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - The builder for method chaining.
    /// * `Err(CrawlerBuilderError)` - If the interval is zero.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Result<Self, CrawlerBuilderError> {
        if interval.is_zero() {
            return Err(CrawlerBuilderError::InvalidInterval);
        }
        self.sweep_interval = interval;
        Ok(self)
    }

    /// Set the clock used to timestamp records and date counters.
    ///
    /// # Arguments
    ///
    /// * `clock` - Time source (defaults to [`SystemClock`]).
    ///
    /// # Returns
    ///
    /// Self for method chaining.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the crawler with the configured options.
    ///
    /// # Returns
    ///
    /// A configured `Crawler` instance.
    pub fn build(self) -> Crawler<R, B, C> {
        Crawler::new(
            self.router,
            self.connector,
            self.store,
            self.clock,
            self.probe_timeout,
            self.closest_peers_timeout,
            self.walk_interval,
            self.sweep_interval,
        )
    }
}
