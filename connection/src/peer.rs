//! Overlay peer identity and seed address structures.

use std::fmt;
use std::net::{AddrParseError, SocketAddr};
use std::str::FromStr;

/// Number of random bytes in a generated identifier.
pub const RANDOM_ID_LENGTH: usize = 32;

/// Separator between the peer identifier and socket address of a seed.
const SEED_SEPARATOR: char = '@';

/// Errors that can occur while validating a peer identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerIdError {
    /// The identifier is empty.
    Empty,
    /// The identifier contains a whitespace, control, or reserved character.
    InvalidCharacter(char),
}

impl fmt::Display for PeerIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerIdError::Empty => write!(f, "Peer identifier cannot be empty"),
            PeerIdError::InvalidCharacter(c) => {
                write!(f, "Peer identifier contains invalid character {c:?}")
            }
        }
    }
}

impl std::error::Error for PeerIdError {}

/// Opaque identifier of a peer on the overlay network.
///
/// Identifiers are assigned by the overlay and treated as plain text. The only
/// constraints are that they are non-empty and free of whitespace, control
/// characters, and the `@` seed separator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer identifier, validating its format.
    ///
    /// # Arguments
    ///
    /// * `id` - The textual identifier assigned by the overlay.
    ///
    /// # Returns
    ///
    /// * `Ok(PeerId)` - If the identifier is valid.
    /// * `Err(PeerIdError)` - If the identifier is empty or has invalid characters.
    pub fn new<S: Into<String>>(id: S) -> Result<Self, PeerIdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(PeerIdError::Empty);
        }
        if let Some(c) = id
            .chars()
            .find(|c| c.is_whitespace() || c.is_control() || *c == SEED_SEPARATOR)
        {
            return Err(PeerIdError::InvalidCharacter(c));
        }
        Ok(PeerId(id))
    }

    /// Generate a uniformly random identifier in the overlay's key space.
    ///
    /// Used as a walk target, the result need not belong to any live peer.
    pub fn random() -> Self {
        let bytes: [u8; RANDOM_ID_LENGTH] = rand::random();
        let id = bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();
        PeerId(id)
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// XOR distance between the bytes of two identifiers.
    ///
    /// The shorter identifier is zero padded, so distances between any two
    /// identifiers compare lexicographically as big-endian numbers.
    pub fn distance(&self, other: &PeerId) -> Vec<u8> {
        let a = self.0.as_bytes();
        let b = other.0.as_bytes();
        (0..a.len().max(b.len()))
            .map(|i| a.get(i).copied().unwrap_or(0) ^ b.get(i).copied().unwrap_or(0))
            .collect()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PeerId::new(s)
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur while parsing a seed address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedAddressError {
    /// The `<peer-id>@<ip>:<port>` separator is missing.
    MissingSeparator,
    /// The peer identifier part is invalid.
    InvalidPeerId(PeerIdError),
    /// The socket address part is invalid.
    InvalidSocketAddress(AddrParseError),
}

impl fmt::Display for SeedAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedAddressError::MissingSeparator => {
                write!(f, "Seed address must follow format '<peer-id>@<ip>:<port>'")
            }
            SeedAddressError::InvalidPeerId(err) => write!(f, "Invalid seed peer id: {err}"),
            SeedAddressError::InvalidSocketAddress(err) => {
                write!(f, "Invalid seed socket address: {err}")
            }
        }
    }
}

impl std::error::Error for SeedAddressError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SeedAddressError::MissingSeparator => None,
            SeedAddressError::InvalidPeerId(err) => Some(err),
            SeedAddressError::InvalidSocketAddress(err) => Some(err),
        }
    }
}

/// A well known peer used to join the overlay.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeedAddress {
    /// The seed's peer identifier.
    pub id: PeerId,
    /// The socket address the seed listens on.
    pub address: SocketAddr,
}

impl SeedAddress {
    /// Create a new seed address.
    pub fn new(id: PeerId, address: SocketAddr) -> Self {
        SeedAddress { id, address }
    }
}

impl fmt::Display for SeedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.id, SEED_SEPARATOR, self.address)
    }
}

impl FromStr for SeedAddress {
    type Err = SeedAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, address) = s
            .split_once(SEED_SEPARATOR)
            .ok_or(SeedAddressError::MissingSeparator)?;
        let id = PeerId::new(id).map_err(SeedAddressError::InvalidPeerId)?;
        let address = address
            .parse::<SocketAddr>()
            .map_err(SeedAddressError::InvalidSocketAddress)?;
        Ok(SeedAddress { id, address })
    }
}
