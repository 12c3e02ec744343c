//! Error types for connection handling.

use crate::peer::PeerId;
use std::error::Error;
use std::fmt;
use std::io;

/// Errors that can occur while establishing a connection to a peer.
#[derive(Debug)]
pub enum ConnectionError {
    /// An I/O error occurred during network operations, e.g. the connection
    /// was refused or the route is unreachable.
    Io(io::Error),
    /// The connection attempt did not complete before its deadline.
    ///
    /// Distinguished from [`ConnectionError::Io`] since a deadline miss on an
    /// overlay network is often transient and worth a longer retry.
    TimedOut,
    /// No address is known for the peer.
    UnknownPeer(PeerId),
}

impl ConnectionError {
    /// Returns `true` if the attempt failed because its deadline was exceeded.
    pub fn is_timeout(&self) -> bool {
        match self {
            ConnectionError::TimedOut => true,
            ConnectionError::Io(err) => err.kind() == io::ErrorKind::TimedOut,
            ConnectionError::UnknownPeer(_) => false,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Io(err) => write!(f, "Connection error: {err}"),
            ConnectionError::TimedOut => write!(f, "Connection attempt timed out"),
            ConnectionError::UnknownPeer(peer) => write!(f, "No known address for peer {peer}"),
        }
    }
}

impl Error for ConnectionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConnectionError::Io(err) => Some(err),
            ConnectionError::TimedOut => None,
            ConnectionError::UnknownPeer(_) => None,
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Io(err)
    }
}
