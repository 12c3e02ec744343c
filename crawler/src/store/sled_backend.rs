//! Sled backed persistence.

use super::{Backend, PeerWrite, StoreError, WriteBatch};
use overlay_peers_connection::PeerId;
use sled::transaction::TransactionError;
use sled::Transactional;
use std::convert::Infallible;
use std::path::Path;

/// Tree holding peer records keyed by peer id.
pub const PEERS_TREE: &str = "peers";
/// Tree holding counters keyed by counter name.
pub const COUNTERS_TREE: &str = "counters";

type RawEntry = Result<(Vec<u8>, Vec<u8>), StoreError>;

fn raw_entry(entry: sled::Result<(sled::IVec, sled::IVec)>) -> RawEntry {
    let (key, value) = entry?;
    Ok((key.to_vec(), value.to_vec()))
}

/// Peer records and counters in two trees of one sled database.
#[derive(Debug, Clone)]
pub struct SledBackend {
    db: sled::Db,
    peers: sled::Tree,
    counters: sled::Tree,
}

impl SledBackend {
    /// Open, or create, the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// A database that is removed when dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let peers = db.open_tree(PEERS_TREE)?;
        let counters = db.open_tree(COUNTERS_TREE)?;
        Ok(Self {
            db,
            peers,
            counters,
        })
    }
}

impl Backend for SledBackend {
    type PeerIter = std::iter::Map<sled::Iter, fn(sled::Result<(sled::IVec, sled::IVec)>) -> RawEntry>;

    fn get_peer(&self, id: &PeerId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.peers.get(id.as_str())?.map(|value| value.to_vec()))
    }

    fn peers(&self) -> Self::PeerIter {
        self.peers.iter().map(raw_entry as fn(_) -> _)
    }

    fn get_counter(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.counters.get(name)?.map(|value| value.to_vec()))
    }

    /// Runs as one sled transaction over both trees.
    fn commit(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
        let result = (&self.peers, &self.counters).transaction(|(peers, counters)| {
            for write in &batch.peers {
                match write {
                    PeerWrite::Put(id, value) => {
                        peers.insert(id.as_str(), value.as_slice())?;
                    }
                    PeerWrite::Delete(id) => {
                        peers.remove(id.as_str())?;
                    }
                }
            }
            for (name, value) in &batch.counters {
                counters.insert(name.as_str(), value.as_slice())?;
            }
            Ok::<(), sled::transaction::ConflictableTransactionError<Infallible>>(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Storage(e)) => Err(e.into()),
            Err(TransactionError::Abort(never)) => match never {},
        }
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
