//! Routing collaborator abstraction.
//!
//! The overlay's distributed lookup is consumed, not implemented, by the
//! crawler. A [`Router`] joins the overlay through seed peers and answers
//! "which peers are closest to this key" queries.

use log::debug;
use overlay_peers_connection::{AddressBook, PeerId, SeedAddress};
use std::fmt;
use std::time::Duration;

/// Number of peers returned by the static router per query.
pub const STATIC_ROUTER_QUERY_SIZE: usize = 20;

/// Errors reported by a routing collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// The router knows no peer to route through.
    NoKnownPeers,
    /// A query or bootstrap step failed.
    QueryFailed(String),
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::NoKnownPeers => write!(f, "No known peers to route through"),
            RoutingError::QueryFailed(reason) => write!(f, "Routing query failed: {reason}"),
        }
    }
}

impl std::error::Error for RoutingError {}

/// The overlay's peer routing.
pub trait Router: Clone + Send + Sync + 'static {
    /// Make a seed peer known to the router.
    fn connect_seed(
        &self,
        seed: &SeedAddress,
    ) -> impl std::future::Future<Output = Result<(), RoutingError>> + Send;

    /// Bring the router into a state where it can answer queries.
    fn bootstrap(&self) -> impl std::future::Future<Output = Result<(), RoutingError>> + Send;

    /// Find the peers closest to `target`, bounded by `timeout`.
    ///
    /// Order is whatever the router produces and duplicates are allowed.
    fn closest_peers(
        &self,
        target: &PeerId,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<Vec<PeerId>, RoutingError>> + Send;
}

/// Static routing over the peers of an [`AddressBook`].
///
/// No lookups go over the network, the closest known peers by XOR distance
/// are returned directly. Enough to crawl a fixed set of seeds.
impl Router for AddressBook {
    fn connect_seed(
        &self,
        seed: &SeedAddress,
    ) -> impl std::future::Future<Output = Result<(), RoutingError>> + Send {
        let book = self.clone();
        let seed = seed.clone();
        async move {
            if !book.insert_seed(&seed).await {
                debug!("Seed {seed} already known");
            }
            Ok(())
        }
    }

    fn bootstrap(&self) -> impl std::future::Future<Output = Result<(), RoutingError>> + Send {
        let book = self.clone();
        async move {
            if book.is_empty().await {
                return Err(RoutingError::NoKnownPeers);
            }
            Ok(())
        }
    }

    fn closest_peers(
        &self,
        target: &PeerId,
        _timeout: Duration,
    ) -> impl std::future::Future<Output = Result<Vec<PeerId>, RoutingError>> + Send {
        let book = self.clone();
        let target = target.clone();
        async move { Ok(book.closest(&target, STATIC_ROUTER_QUERY_SIZE).await) }
    }
}
