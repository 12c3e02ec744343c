//! Shared mapping from peer identifiers to the socket addresses they listen on.

use crate::peer::{PeerId, SeedAddress};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A cloneable, thread-safe book of known peer addresses.
///
/// All clones share the same underlying map, so a routing component can fill
/// it while a connector resolves identifiers out of it.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    addresses: Arc<RwLock<HashMap<PeerId, Vec<SocketAddr>>>>,
}

impl AddressBook {
    /// Create an empty address book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an address for a peer.
    ///
    /// # Returns
    ///
    /// `true` if the address was not already known for the peer.
    pub async fn insert(&self, peer: PeerId, address: SocketAddr) -> bool {
        let mut addresses = self.addresses.write().await;
        let known = addresses.entry(peer).or_default();
        if known.contains(&address) {
            return false;
        }
        known.push(address);
        true
    }

    /// Record the address of a seed peer.
    pub async fn insert_seed(&self, seed: &SeedAddress) -> bool {
        self.insert(seed.id.clone(), seed.address).await
    }

    /// Forget every address of a peer.
    pub async fn remove(&self, peer: &PeerId) {
        self.addresses.write().await.remove(peer);
    }

    /// The addresses known for a peer, in insertion order.
    pub async fn addresses(&self, peer: &PeerId) -> Vec<SocketAddr> {
        self.addresses
            .read()
            .await
            .get(peer)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of peers with at least one known address.
    pub async fn len(&self) -> usize {
        self.addresses.read().await.len()
    }

    /// Whether the book has no peers.
    pub async fn is_empty(&self) -> bool {
        self.addresses.read().await.is_empty()
    }

    /// The `limit` known peers closest to `target` by XOR distance.
    pub async fn closest(&self, target: &PeerId, limit: usize) -> Vec<PeerId> {
        let mut peers = self
            .addresses
            .read()
            .await
            .keys()
            .map(|peer| (peer.distance(target), peer.clone()))
            .collect::<Vec<_>>();
        peers.sort();
        peers.into_iter().take(limit).map(|(_, peer)| peer).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str) -> PeerId {
        PeerId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let book = AddressBook::new();
        let addr: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        let other: SocketAddr = "127.0.0.1:4002".parse().unwrap();

        assert!(book.is_empty().await);
        assert!(book.insert(peer("QmA"), addr).await);
        assert!(!book.insert(peer("QmA"), addr).await);
        assert!(book.insert(peer("QmA"), other).await);

        assert_eq!(book.len().await, 1);
        assert_eq!(book.addresses(&peer("QmA")).await, vec![addr, other]);
        assert!(book.addresses(&peer("QmB")).await.is_empty());

        book.remove(&peer("QmA")).await;
        assert!(book.is_empty().await);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let book = AddressBook::new();
        let clone = book.clone();
        let seed: SeedAddress = "QmSeed@10.0.0.1:4001".parse().unwrap();

        clone.insert_seed(&seed).await;

        assert_eq!(book.addresses(&seed.id).await, vec![seed.address]);
    }

    #[tokio::test]
    async fn test_closest_orders_by_distance() {
        let book = AddressBook::new();
        let addr: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        for id in ["aa", "ab", "za", "zz"] {
            book.insert(peer(id), addr).await;
        }

        let closest = book.closest(&peer("aa"), 3).await;
        assert_eq!(closest, vec![peer("aa"), peer("ab"), peer("za")]);

        assert_eq!(book.closest(&peer("zz"), 1).await, vec![peer("zz")]);
        assert!(AddressBook::new().closest(&peer("aa"), 3).await.is_empty());
    }
}
