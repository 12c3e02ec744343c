//! Two-tier reachability probe.

use crate::connection::Connector;
use log::debug;
use overlay_peers_connection::PeerId;
use std::fmt;
use std::time::Duration;

/// The retry deadline is this multiple of the first attempt's deadline.
pub const RETRY_TIMEOUT_MULTIPLIER: u32 = 4;

/// Outcome of probing a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    /// The peer accepted a connection.
    Reachable,
    /// The peer refused, errored, or timed out twice.
    Unreachable,
}

impl Reachability {
    /// Whether the peer accepted a connection.
    pub fn is_reachable(self) -> bool {
        matches!(self, Reachability::Reachable)
    }
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reachability::Reachable => write!(f, "reachable"),
            Reachability::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Probes peers for reachability.
///
/// A first attempt is bounded by a short timeout. Overlay routes are often
/// slow to resolve, so only if that attempt missed its deadline is it retried
/// once with a timeout [`RETRY_TIMEOUT_MULTIPLIER`] times longer. Explicit
/// failures are never retried.
#[derive(Debug, Clone)]
pub struct Prober<C> {
    connector: C,
    timeout: Duration,
}

impl<C: Connector> Prober<C> {
    /// Create a prober whose first attempt is bounded by `timeout`.
    pub fn new(connector: C, timeout: Duration) -> Self {
        Self { connector, timeout }
    }

    /// Deadline of the first attempt.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Deadline of the retry.
    pub fn retry_timeout(&self) -> Duration {
        self.timeout.saturating_mul(RETRY_TIMEOUT_MULTIPLIER)
    }

    /// Check whether a peer accepts connections.
    pub async fn probe(&self, peer: &PeerId) -> Reachability {
        let result = match self.connector.connect(peer, self.timeout).await {
            Err(e) if e.is_timeout() => {
                debug!("Probe of {peer} timed out, retrying with {:?}", self.retry_timeout());
                self.connector.connect(peer, self.retry_timeout()).await
            }
            result => result,
        };

        match result {
            Ok(()) => Reachability::Reachable,
            Err(e) => {
                debug!("Probe of {peer} failed: {e}");
                Reachability::Unreachable
            }
        }
    }
}
