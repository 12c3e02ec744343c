mod address_book;
mod connection;
mod peer;

pub use address_book::AddressBook;
pub use connection::{ConnectionError, TcpConnector};
pub use peer::{PeerId, PeerIdError, SeedAddress, SeedAddressError, RANDOM_ID_LENGTH};
