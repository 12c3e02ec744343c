//! Peer discovery and liveliness tracking for overlay networks.
//!
//! A [`Crawler`] random-walks the overlay's routing structure to discover
//! peers, probes each one for reachability, and keeps a persistent record of
//! every peer along with daily and lifetime "joined" and "left" counters.

mod builder;
mod clock;
mod connection;
mod crawler;
mod probe;
mod routing;
mod schedule;
mod store;
mod sweeper;
mod walker;

pub use builder::{
    CrawlerBuilder, CrawlerBuilderError, DEFAULT_CLOSEST_PEERS_TIMEOUT, DEFAULT_PROBE_TIMEOUT,
    DEFAULT_SWEEP_INTERVAL, DEFAULT_WALK_INTERVAL,
};
pub use clock::{Clock, SystemClock};
pub use connection::Connector;
pub use crawler::{Crawler, CrawlerError, CrawlerHandle};
pub use probe::{Prober, Reachability, RETRY_TIMEOUT_MULTIPLIER};
pub use routing::{Router, RoutingError, STATIC_ROUTER_QUERY_SIZE};
pub use schedule::Shutdown;
pub use store::{
    Backend, Counter, CounterKind, CounterScope, MemoryBackend, PeerRecord, PeerScan,
    PeerWrite, RecordStore, SledBackend, StoreError, Transition, WriteBatch,
};
pub use sweeper::{LivelinessSweeper, SweepSummary};
pub use walker::{RandomWalker, WalkSummary};

// Re-exports.
pub use overlay_peers_connection::{
    AddressBook, ConnectionError, PeerId, SeedAddress, TcpConnector,
};
