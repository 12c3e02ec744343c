//! In-memory backend, handy for tests and short-lived crawls.

use super::{Backend, PeerWrite, StoreError, WriteBatch};
use overlay_peers_connection::PeerId;
use std::collections::BTreeMap;

/// Ordered in-memory maps standing in for a database.
///
/// Scans iterate over a snapshot taken when the pass starts.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    peers: BTreeMap<PeerId, Vec<u8>>,
    counters: BTreeMap<String, Vec<u8>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    type PeerIter = std::vec::IntoIter<Result<(Vec<u8>, Vec<u8>), StoreError>>;

    fn get_peer(&self, id: &PeerId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.peers.get(id).cloned())
    }

    fn peers(&self) -> Self::PeerIter {
        self.peers
            .iter()
            .map(|(id, value)| Ok((id.as_str().as_bytes().to_vec(), value.clone())))
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn get_counter(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.counters.get(name).cloned())
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
        // Map inserts can not fail, so applying in place is all or nothing.
        for write in batch.peers {
            match write {
                PeerWrite::Put(id, value) => {
                    self.peers.insert(id, value);
                }
                PeerWrite::Delete(id) => {
                    self.peers.remove(&id);
                }
            }
        }
        self.counters.extend(batch.counters);
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
pub mod test_utils {
    //! Test utilities for exercising storage failures.

    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Memory backend whose commits can be made to fail on demand.
    ///
    /// A failed commit writes nothing, like a database rejecting a transaction.
    #[derive(Debug, Clone, Default)]
    pub struct FailingBackend {
        inner: MemoryBackend,
        failures: Arc<AtomicUsize>,
    }

    impl FailingBackend {
        /// Create a backend that succeeds until told otherwise.
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next `count` commits. Shared by all clones.
        pub fn fail_next_commits(&self, count: usize) {
            self.failures.store(count, Ordering::SeqCst);
        }

        /// Commits still set to fail.
        pub fn pending_failures(&self) -> usize {
            self.failures.load(Ordering::SeqCst)
        }
    }

    impl Backend for FailingBackend {
        type PeerIter = <MemoryBackend as Backend>::PeerIter;

        fn get_peer(&self, id: &PeerId) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get_peer(id)
        }

        fn peers(&self) -> Self::PeerIter {
            self.inner.peers()
        }

        fn get_counter(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get_counter(name)
        }

        fn commit(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StoreError::Database(sled::Error::Io(io::Error::other(
                    "injected write failure",
                ))));
            }
            self.inner.commit(batch)
        }

        fn flush(&self) -> Result<(), StoreError> {
            self.inner.flush()
        }
    }
}
