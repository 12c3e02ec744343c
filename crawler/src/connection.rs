//! Connection abstraction used by the reachability probe.
//!
//! The [`Connector`] trait is the single "attempt a connection within a
//! deadline" capability the crawler needs from the transport layer, enabling
//! dependency injection for testing without a live overlay.

use overlay_peers_connection::{ConnectionError, PeerId, TcpConnector};
use std::time::Duration;

/// Factory trait for ephemeral peer connections.
pub trait Connector: Clone + Send + Sync + 'static {
    /// Attempt to connect to the peer, giving up after `timeout`.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The peer accepted the connection, which is then closed.
    /// * `Err(ConnectionError::TimedOut)` - The deadline passed.
    /// * `Err(ConnectionError)` - Any other failure.
    fn connect(
        &self,
        peer: &PeerId,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<(), ConnectionError>> + Send;
}

/// Standard connector that opens and immediately drops a TCP stream.
impl Connector for TcpConnector {
    fn connect(
        &self,
        peer: &PeerId,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<(), ConnectionError>> + Send {
        let connector = self.clone();
        let peer = peer.clone();
        async move {
            let stream = TcpConnector::connect(&connector, &peer, timeout).await?;
            drop(stream);
            Ok(())
        }
    }
}
