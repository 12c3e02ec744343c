//! Ephemeral connections to overlay peers.
//!
//! A connection here is only a reachability check: the stream is opened
//! within a deadline and handed back to the caller, who usually drops it.
//!
//! # Examples
//!
//! ```no_run
//! use overlay_peers_connection::{AddressBook, PeerId, TcpConnector};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let book = AddressBook::new();
//! let peer = PeerId::new("QmPeer")?;
//! book.insert(peer.clone(), "127.0.0.1:4001".parse()?).await;
//!
//! let connector = TcpConnector::new(book);
//! match connector.connect(&peer, Duration::from_secs(10)).await {
//!     Ok(_stream) => println!("{peer} is reachable"),
//!     Err(e) if e.is_timeout() => println!("{peer} timed out"),
//!     Err(e) => println!("{peer} is unreachable: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod tcp;

pub use error::ConnectionError;
pub use tcp::TcpConnector;
