//! Persistent peer records and discovery counters.
//!
//! The [`RecordStore`] is shared by the random walk and the liveliness sweep.
//! It keeps two namespaces, peer records keyed by [`PeerId`] and counters
//! keyed by [`Counter`] name, in a pluggable [`Backend`].
//!
//! # Exclusion
//!
//! Every operation takes the store's single mutex for its whole duration, so
//! a read-modify-write through [`RecordStore::update`] or
//! [`RecordStore::increment_counter`] can never interleave with another
//! mutation. The lock is never held across an `.await`, callers probe the
//! network first and then hand the outcome to the store.
//!
//! # Atomicity
//!
//! The writes of one operation, a peer record and the counters it moves, are
//! handed to the backend as a single [`WriteBatch`]. A failed commit leaves
//! both namespaces untouched, so a departure is never half recorded.

mod memory;
mod sled_backend;

pub use memory::MemoryBackend;
pub use sled_backend::SledBackend;

#[cfg(test)]
pub(crate) use memory::test_utils;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use log::{debug, warn};
use overlay_peers_connection::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Date format of day scoped counter names.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors raised by the record store.
#[derive(Debug)]
pub enum StoreError {
    /// The underlying database failed.
    Database(sled::Error),
    /// A record could not be encoded for storage.
    Encode(serde_json::Error),
    /// A thread panicked while holding the store lock.
    LockPoisoned,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(err) => write!(f, "Record store database error: {err}"),
            StoreError::Encode(err) => write!(f, "Failed to encode peer record: {err}"),
            StoreError::LockPoisoned => write!(f, "Record store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(err) => Some(err),
            StoreError::Encode(err) => Some(err),
            StoreError::LockPoisoned => None,
        }
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Database(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Encode(err)
    }
}

/// Serialize nanosecond timestamps as decimal strings.
mod nanos_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(nanos: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&nanos.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// What the crawler knows about one overlay peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    /// The last probe failed while the peer was not confirmed reachable,
    /// hinting that it sits behind a NAT. A heuristic, not a verified fact.
    pub nat_suspected: bool,
    /// Nanoseconds since the Unix epoch of the last observation.
    #[serde(with = "nanos_string")]
    pub last_seen: i64,
}

impl PeerRecord {
    /// Create a record observed at `at`.
    pub fn new(nat_suspected: bool, at: DateTime<Utc>) -> Self {
        PeerRecord {
            nat_suspected,
            last_seen: timestamp_nanos(at),
        }
    }

    /// The same record, last seen at `at`.
    pub fn observed_at(self, at: DateTime<Utc>) -> Self {
        PeerRecord {
            last_seen: timestamp_nanos(at),
            ..self
        }
    }

    /// The last observation as a UTC date and time.
    pub fn last_seen_at(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.last_seen)
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Nanoseconds since the Unix epoch, saturating outside the representable range.
fn timestamp_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Period a counter aggregates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterScope {
    /// A single UTC calendar day.
    Day(NaiveDate),
    /// The whole lifetime of the store.
    Total,
}

impl fmt::Display for CounterScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterScope::Day(date) => write!(f, "{}", date.format(DATE_FORMAT)),
            CounterScope::Total => write!(f, "total"),
        }
    }
}

/// Event a counter tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    /// Peers discovered, minus departures for the total scope.
    Count,
    /// Peers that left the network.
    Left,
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterKind::Count => write!(f, "count"),
            CounterKind::Left => write!(f, "left"),
        }
    }
}

/// A named running integer, stored as `<scope>.<kind>`.
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use overlay_peers_crawler::{Counter, CounterKind};
///
/// let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
/// assert_eq!(Counter::daily(date, CounterKind::Left).to_string(), "2024-03-09.left");
/// assert_eq!(Counter::total(CounterKind::Count).to_string(), "total.count");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Counter {
    pub scope: CounterScope,
    pub kind: CounterKind,
}

impl Counter {
    /// Counter scoped to one UTC day.
    pub fn daily(date: NaiveDate, kind: CounterKind) -> Self {
        Counter {
            scope: CounterScope::Day(date),
            kind,
        }
    }

    /// Counter over the lifetime of the store.
    pub fn total(kind: CounterKind) -> Self {
        Counter {
            scope: CounterScope::Total,
            kind,
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.scope, self.kind)
    }
}

/// Outcome decided for a peer inside [`RecordStore::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First sighting, the record is stored and discovery counters are bumped.
    Discovered(PeerRecord),
    /// Known peer, the record is overwritten.
    Refreshed(PeerRecord),
    /// Previously reachable peer failed a probe and is presumed gone.
    Departed,
    /// Nothing to do, e.g. the record vanished before the lock was taken.
    Untouched,
}

/// A write to the peer namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerWrite {
    /// Insert or overwrite the encoded record.
    Put(PeerId, Vec<u8>),
    /// Remove the record, a no-op if absent.
    Delete(PeerId),
}

/// Writes to both namespaces that a [`Backend`] applies as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    /// Peer record writes, in order.
    pub peers: Vec<PeerWrite>,
    /// Counter names and their new encoded values, in order.
    pub counters: Vec<(String, Vec<u8>)>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a peer record.
    pub fn put_peer(&mut self, id: &PeerId, value: Vec<u8>) {
        self.peers.push(PeerWrite::Put(id.clone(), value));
    }

    /// Stage a peer removal.
    pub fn delete_peer(&mut self, id: &PeerId) {
        self.peers.push(PeerWrite::Delete(id.clone()));
    }

    /// Stage a counter value.
    pub fn put_counter(&mut self, name: impl Into<String>, value: Vec<u8>) {
        self.counters.push((name.into(), value));
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty() && self.counters.is_empty()
    }
}

/// Raw storage underneath a [`RecordStore`].
///
/// Implementations need no synchronization of their own, the store serializes
/// all access. Values are opaque bytes, encoding is the store's concern.
pub trait Backend: Send + 'static {
    /// Iterator over raw `(key, value)` pairs of the peer namespace.
    type PeerIter: Iterator<Item = Result<(Vec<u8>, Vec<u8>), StoreError>> + Send + 'static;

    fn get_peer(&self, id: &PeerId) -> Result<Option<Vec<u8>>, StoreError>;
    /// A single pass over the peer namespace, usable after the lock is released.
    fn peers(&self) -> Self::PeerIter;
    fn get_counter(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Apply every write of the batch, or none of them.
    ///
    /// On error the backend must be left exactly as it was before the call.
    fn commit(&mut self, batch: WriteBatch) -> Result<(), StoreError>;
    fn flush(&self) -> Result<(), StoreError>;
}

/// Lazy pass over the stored peer records.
///
/// Entries whose key or value cannot be decoded are logged and skipped, a
/// corrupt record must not stop a sweep.
pub struct PeerScan<I> {
    inner: I,
}

impl<I> Iterator for PeerScan<I>
where
    I: Iterator<Item = Result<(Vec<u8>, Vec<u8>), StoreError>>,
{
    type Item = Result<(PeerId, PeerRecord), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (key, value) = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };

            let id = match String::from_utf8(key).map(PeerId::new) {
                Ok(Ok(id)) => id,
                Ok(Err(e)) => {
                    warn!("Skipping record with invalid peer id: {e}");
                    continue;
                }
                Err(e) => {
                    warn!("Skipping record with non UTF-8 key: {e}");
                    continue;
                }
            };

            match PeerRecord::decode(&value) {
                Ok(record) => return Some(Ok((id, record))),
                Err(e) => warn!("Skipping malformed record for {id}: {e}"),
            }
        }
    }
}

/// Concurrency-safe store of peer records and counters.
#[derive(Debug)]
pub struct RecordStore<B> {
    backend: Mutex<B>,
}

impl RecordStore<SledBackend> {
    /// Open, or create, a sled backed store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self::new(SledBackend::open(path)?))
    }
}

impl<B: Backend> RecordStore<B> {
    /// Wrap a backend.
    pub fn new(backend: B) -> Self {
        RecordStore {
            backend: Mutex::new(backend),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, B>, StoreError> {
        self.backend.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Look up a peer record.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(PeerRecord))` - The stored record.
    /// * `Ok(None)` - No record, or a record that could not be decoded.
    /// * `Err(StoreError)` - The backend failed.
    pub fn get(&self, id: &PeerId) -> Result<Option<PeerRecord>, StoreError> {
        let backend = self.lock()?;
        read_peer(&*backend, id)
    }

    /// Insert or overwrite a peer record.
    pub fn put(&self, id: &PeerId, record: &PeerRecord) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.put_peer(id, record.encode()?);
        self.lock()?.commit(batch)
    }

    /// Remove a peer record, a no-op if absent.
    pub fn delete(&self, id: &PeerId) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.delete_peer(id);
        self.lock()?.commit(batch)
    }

    /// Start a pass over all peer records.
    ///
    /// Only creating the iterator takes the lock. Records written while the
    /// pass runs may or may not be observed, depending on the backend.
    pub fn scan_peers(&self) -> Result<PeerScan<B::PeerIter>, StoreError> {
        let backend = self.lock()?;
        Ok(PeerScan {
            inner: backend.peers(),
        })
    }

    /// Current value of a counter, zero if it was never adjusted.
    pub fn counter(&self, counter: &Counter) -> Result<i64, StoreError> {
        let backend = self.lock()?;
        read_counter(&*backend, counter)
    }

    /// Atomically add one to, or subtract one from, a counter.
    ///
    /// # Arguments
    ///
    /// * `counter` - The counter to adjust, created on first use.
    /// * `positive` - Increment if `true`, decrement otherwise.
    ///
    /// # Returns
    ///
    /// The counter's new value.
    pub fn increment_counter(&self, counter: &Counter, positive: bool) -> Result<i64, StoreError> {
        let mut backend = self.lock()?;
        let mut batch = WriteBatch::new();
        let value = stage_adjustment(&*backend, &mut batch, counter, positive)?;
        backend.commit(batch)?;
        debug!("Counter {counter} is now {value}");
        Ok(value)
    }

    /// Atomically read, decide, and write back a peer's state.
    ///
    /// `decide` sees the current record (or `None`) while the lock is held, and
    /// the returned [`Transition`] is committed as one [`WriteBatch`] before the
    /// lock is released:
    ///
    /// * `Discovered` - store the record, increment `<today>.count` and `total.count`.
    /// * `Refreshed` - store the record.
    /// * `Departed` - delete the record, increment `<today>.left` and
    ///   `total.left`, decrement `total.count`.
    /// * `Untouched` - nothing.
    ///
    /// # Arguments
    ///
    /// * `id` - The peer to update.
    /// * `now` - Time of the observation, selects the day of dated counters.
    /// * `decide` - Computes the transition from the current record.
    ///
    /// # Returns
    ///
    /// The applied transition. On error nothing was written, the record and
    /// counters are as they were before the call.
    pub fn update<F>(
        &self,
        id: &PeerId,
        now: DateTime<Utc>,
        decide: F,
    ) -> Result<Transition, StoreError>
    where
        F: FnOnce(Option<&PeerRecord>) -> Transition,
    {
        let mut backend = self.lock()?;
        let current = read_peer(&*backend, id)?;
        let transition = decide(current.as_ref());
        let today = now.date_naive();
        let mut batch = WriteBatch::new();

        match &transition {
            Transition::Discovered(record) => {
                batch.put_peer(id, record.encode()?);
                for counter in [
                    Counter::daily(today, CounterKind::Count),
                    Counter::total(CounterKind::Count),
                ] {
                    stage_adjustment(&*backend, &mut batch, &counter, true)?;
                }
            }
            Transition::Refreshed(record) => {
                batch.put_peer(id, record.encode()?);
            }
            Transition::Departed => {
                batch.delete_peer(id);
                for (counter, positive) in [
                    (Counter::daily(today, CounterKind::Left), true),
                    (Counter::total(CounterKind::Left), true),
                    (Counter::total(CounterKind::Count), false),
                ] {
                    stage_adjustment(&*backend, &mut batch, &counter, positive)?;
                }
            }
            Transition::Untouched => {}
        }

        if !batch.is_empty() {
            backend.commit(batch)?;
        }
        Ok(transition)
    }

    /// Flush buffered writes to durable storage.
    pub fn flush(&self) -> Result<(), StoreError> {
        let backend = self.lock()?;
        backend.flush()
    }
}

fn read_peer<B: Backend>(backend: &B, id: &PeerId) -> Result<Option<PeerRecord>, StoreError> {
    let bytes = match backend.get_peer(id)? {
        Some(bytes) => bytes,
        None => return Ok(None),
    };
    match PeerRecord::decode(&bytes) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            warn!("Treating malformed record for {id} as absent: {e}");
            Ok(None)
        }
    }
}

fn read_counter<B: Backend>(backend: &B, counter: &Counter) -> Result<i64, StoreError> {
    let name = counter.to_string();
    let bytes = match backend.get_counter(&name)? {
        Some(bytes) => bytes,
        None => return Ok(0),
    };
    match std::str::from_utf8(&bytes).ok().and_then(|s| s.parse().ok()) {
        Some(value) => Ok(value),
        None => {
            warn!("Resetting malformed counter {name}");
            Ok(0)
        }
    }
}

/// Stage `counter` plus or minus one, returning the staged value.
///
/// Each counter may be staged at most once per batch.
fn stage_adjustment<B: Backend>(
    backend: &B,
    batch: &mut WriteBatch,
    counter: &Counter,
    positive: bool,
) -> Result<i64, StoreError> {
    let value = read_counter(backend, counter)?;
    let value = if positive { value + 1 } else { value - 1 };
    batch.put_counter(counter.to_string(), value.to_string().into_bytes());
    Ok(value)
}
