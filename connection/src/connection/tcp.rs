//! TCP-specific connections.

use super::ConnectionError;
use crate::address_book::AddressBook;
use crate::peer::PeerId;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Dial each address in order, returning the first stream established.
async fn establish_tcp_connection(addresses: &[SocketAddr]) -> Result<TcpStream, ConnectionError> {
    let mut last_error = None;
    for address in addresses {
        match TcpStream::connect(address).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                log::debug!("Failed to dial {address}: {e}");
                last_error = Some(e);
            }
        }
    }

    Err(ConnectionError::Io(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "No address to dial")
    })))
}

/// Opens TCP connections to overlay peers, resolving identifiers through an [`AddressBook`].
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address_book: AddressBook,
}

impl TcpConnector {
    /// Create a connector resolving peers through the given address book.
    pub fn new(address_book: AddressBook) -> Self {
        Self { address_book }
    }

    /// The address book used to resolve peers.
    pub fn address_book(&self) -> &AddressBook {
        &self.address_book
    }

    /// Establish a TCP connection to a peer.
    ///
    /// All known addresses of the peer are tried in order, the deadline covers
    /// the whole attempt.
    ///
    /// # Arguments
    ///
    /// * `peer` - The peer to connect to.
    /// * `timeout` - Deadline for the entire connection attempt.
    ///
    /// # Returns
    ///
    /// * `Ok(TcpStream)` - An established stream.
    /// * `Err(ConnectionError::UnknownPeer)` - No address is known for the peer.
    /// * `Err(ConnectionError::TimedOut)` - The deadline passed first.
    /// * `Err(ConnectionError::Io)` - Every address failed explicitly.
    pub async fn connect(
        &self,
        peer: &PeerId,
        timeout: Duration,
    ) -> Result<TcpStream, ConnectionError> {
        let addresses = self.address_book.addresses(peer).await;
        if addresses.is_empty() {
            return Err(ConnectionError::UnknownPeer(peer.clone()));
        }

        match tokio::time::timeout(timeout, establish_tcp_connection(&addresses)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::TimedOut),
        }
    }
}
