use std::collections::hash_map::Entry as HashMapEntry;
use std::collections::HashMap;
use std::fs;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::destination::{AnnounceInfo, DestinationAnnounce, RATCHET_LENGTH};
use crate::error::RnsError;
use crate::hash::AddressHash;
use crate::identity::Identity;
use crate::packet::Packet;
use crate::time::now_secs;

/// Everything learned about a remote destination from its announces.
#[derive(Clone)]
pub struct AnnounceRecord {
    pub identity: Identity,
    pub app_data: Option<Vec<u8>>,
    pub ratchet: Option<[u8; RATCHET_LENGTH]>,
    pub first_seen: f64,
    pub last_seen: f64,
}

struct Entry {
    record: AnnounceRecord,
    stamp: u64,
}

struct Inner {
    entries: HashMap<AddressHash, Entry>,
    tick: u64,
}

impl Inner {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_one(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.stamp)
            .map(|(address, _)| *address);
        if let Some(address) = oldest {
            self.entries.remove(&address);
        }
    }
}

/// Process-wide announce cache: destination hash → identity, app data,
/// learned ratchet. Bounded, least-recently-used out first, refreshed on
/// both reads and writes. Constructed explicitly and passed where needed
/// so tests get clean instances.
pub struct KnownDestinations {
    capacity: usize,
    inner: RwLock<Inner>,
    log: Option<Mutex<AnnounceLog>>,
}

impl KnownDestinations {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(Inner { entries: HashMap::new(), tick: 0 }),
            log: None,
        }
    }

    /// Cache with an append-only log at `path`, replayed on open.
    /// Persistence is best effort: a missing or damaged log is re-learned
    /// from the network, never an error.
    pub fn new_persistent(capacity: usize, path: impl Into<PathBuf>) -> Self {
        let mut cache = Self::new(capacity);
        let mut log = AnnounceLog { path: path.into(), appended: 0 };

        for (address, record) in log.replay() {
            let mut inner = cache.inner.write().expect("announce cache lock");
            let stamp = inner.touch();
            if !inner.entries.contains_key(&address) && inner.entries.len() >= cache.capacity {
                inner.evict_one();
            }
            inner.entries.insert(address, Entry { record, stamp });
        }

        cache.log = Some(Mutex::new(log));
        cache
    }

    /// Validates `packet` per the announce rules and, unless
    /// `only_validate_signature` is set, records the result. Returns the
    /// proven identity; any malformed or unauthentic announce yields
    /// `None` and the caller drops the packet.
    pub fn validate_announce(
        &self,
        packet: &Packet,
        only_validate_signature: bool,
    ) -> Option<Identity> {
        let info = match DestinationAnnounce::validate(packet) {
            Ok(info) => info,
            Err(err) => {
                log::trace!("announce: rejected for {}: {}", packet.destination, err);
                return None;
            }
        };

        let identity = info.identity();

        if only_validate_signature {
            return Some(identity);
        }

        match self.record_announce(&packet.destination, &info) {
            Ok(()) => Some(identity),
            Err(_) => None,
        }
    }

    /// Inserts or refreshes the record for a validated announce. A hash
    /// that validated under one identity can never flip to another.
    pub fn record_announce(
        &self,
        destination: &AddressHash,
        info: &AnnounceInfo<'_>,
    ) -> Result<(), RnsError> {
        let now = now_secs();
        let identity = info.identity();
        let app_data = (!info.app_data.is_empty()).then(|| info.app_data.to_vec());

        let logged = {
            let mut inner = self.inner.write().map_err(|_| RnsError::ConnectionError)?;
            let stamp = inner.touch();

            if !inner.entries.contains_key(destination) && inner.entries.len() >= self.capacity {
                inner.evict_one();
            }

            match inner.entries.entry(*destination) {
                HashMapEntry::Occupied(mut occupied) => {
                    let entry = occupied.get_mut();
                    if entry.record.identity != identity {
                        log::error!("announce: identity conflict for {}, record kept", destination);
                        return Err(RnsError::IncorrectHash);
                    }

                    // App data only moves forward in time.
                    if now > entry.record.last_seen {
                        entry.record.app_data = app_data;
                        if info.ratchet.is_some() {
                            entry.record.ratchet = info.ratchet;
                        }
                        entry.record.last_seen = now;
                    }
                    entry.stamp = stamp;
                    entry.record.clone()
                }
                HashMapEntry::Vacant(vacant) => {
                    let record = AnnounceRecord {
                        identity,
                        app_data,
                        ratchet: info.ratchet,
                        first_seen: now,
                        last_seen: now,
                    };
                    vacant.insert(Entry { record: record.clone(), stamp });
                    record
                }
            }
        };

        self.append_to_log(destination, &logged);
        Ok(())
    }

    pub fn recall(&self, destination: &AddressHash) -> Option<Identity> {
        self.refresh(destination).map(|record| record.identity)
    }

    pub fn recall_app_data(&self, destination: &AddressHash) -> Option<Vec<u8>> {
        self.refresh(destination).and_then(|record| record.app_data)
    }

    pub fn recall_ratchet(&self, destination: &AddressHash) -> Option<[u8; RATCHET_LENGTH]> {
        self.refresh(destination).and_then(|record| record.ratchet)
    }

    pub fn is_known(&self, destination: &AddressHash) -> bool {
        self.inner
            .read()
            .map(|inner| inner.entries.contains_key(destination))
            .unwrap_or(false)
    }

    pub fn forget(&self, destination: &AddressHash) {
        let removed = self
            .inner
            .write()
            .ok()
            .map(|mut inner| inner.entries.remove(destination).is_some())
            .unwrap_or(false);

        // The log has no tombstones; rewrite it from the live set instead.
        if removed {
            self.compact_log();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn refresh(&self, destination: &AddressHash) -> Option<AnnounceRecord> {
        let mut inner = self.inner.write().ok()?;
        let stamp = inner.touch();
        let entry = inner.entries.get_mut(destination)?;
        entry.stamp = stamp;
        Some(entry.record.clone())
    }

    fn append_to_log(&self, destination: &AddressHash, record: &AnnounceRecord) {
        let Some(log) = &self.log else {
            return;
        };

        let needs_compaction = {
            let mut log = match log.lock() {
                Ok(log) => log,
                Err(_) => return,
            };
            if let Err(err) = log.append(destination, record) {
                log::warn!("announce: log append failed: {}", err);
            }
            log.needs_compaction(self.len())
        };

        if needs_compaction {
            self.compact_log();
        }
    }

    fn compact_log(&self) {
        let Some(log) = &self.log else {
            return;
        };

        let snapshot: Vec<(AddressHash, AnnounceRecord)> = match self.inner.read() {
            Ok(inner) => inner
                .entries
                .iter()
                .map(|(address, entry)| (*address, entry.record.clone()))
                .collect(),
            Err(_) => return,
        };

        if let Ok(mut log) = log.lock() {
            if let Err(err) = log.compact(&snapshot) {
                log::warn!("announce: log compaction failed: {}", err);
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LogRecord {
    timestamp: f64,
    hash: ByteBuf,
    identity: ByteBuf,
    app_data: Option<ByteBuf>,
    ratchet: Option<ByteBuf>,
}

struct AnnounceLog {
    path: PathBuf,
    appended: usize,
}

impl AnnounceLog {
    fn replay(&mut self) -> Vec<(AddressHash, AnnounceRecord)> {
        let Ok(file) = fs::File::open(&self.path) else {
            return Vec::new();
        };

        let mut reader = std::io::BufReader::new(file);
        let mut records = Vec::new();

        loop {
            match reader.fill_buf() {
                Ok(buf) if buf.is_empty() => break,
                Ok(_) => {}
                Err(_) => break,
            }

            let record: LogRecord = match rmp_serde::decode::from_read(&mut reader) {
                Ok(record) => record,
                Err(_) => {
                    log::warn!(
                        "announce: discarding damaged log tail at {}",
                        self.path.display()
                    );
                    break;
                }
            };

            let Ok(address) = AddressHash::try_from_slice(&record.hash) else {
                continue;
            };
            let Ok(identity) = Identity::from_public_key_bytes(&record.identity) else {
                continue;
            };
            let ratchet = record
                .ratchet
                .as_ref()
                .and_then(|bytes| <[u8; RATCHET_LENGTH]>::try_from(bytes.as_slice()).ok());

            records.push((
                address,
                AnnounceRecord {
                    identity,
                    app_data: record.app_data.map(ByteBuf::into_vec),
                    ratchet,
                    first_seen: record.timestamp,
                    last_seen: record.timestamp,
                },
            ));
            self.appended += 1;
        }

        records
    }

    fn append(&mut self, address: &AddressHash, record: &AnnounceRecord) -> Result<(), RnsError> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|_| RnsError::StorageError)?;

        rmp_serde::encode::write_named(&mut file, &Self::log_record(address, record))
            .map_err(|_| RnsError::StorageError)?;

        self.appended += 1;
        Ok(())
    }

    fn needs_compaction(&self, live: usize) -> bool {
        self.appended > 64 && self.appended > live.saturating_mul(4)
    }

    fn compact(&mut self, snapshot: &[(AddressHash, AnnounceRecord)]) -> Result<(), RnsError> {
        let tmp_path = self.path.with_extension("out");

        {
            let mut file = fs::File::create(&tmp_path).map_err(|_| RnsError::StorageError)?;
            for (address, record) in snapshot {
                rmp_serde::encode::write_named(&mut file, &Self::log_record(address, record))
                    .map_err(|_| RnsError::StorageError)?;
            }
        }

        fs::rename(&tmp_path, &self.path).map_err(|_| RnsError::StorageError)?;
        self.appended = snapshot.len();
        Ok(())
    }

    fn log_record(address: &AddressHash, record: &AnnounceRecord) -> LogRecord {
        LogRecord {
            timestamp: record.last_seen,
            hash: ByteBuf::from(address.as_slice().to_vec()),
            identity: ByteBuf::from(record.identity.to_public_key_bytes().to_vec()),
            app_data: record.app_data.as_ref().map(|data| ByteBuf::from(data.clone())),
            ratchet: record.ratchet.map(|ratchet| ByteBuf::from(ratchet.to_vec())),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand_core::OsRng;
    use tempfile::TempDir;

    use crate::destination::{DestinationName, SingleInputDestination};
    use crate::identity::PrivateIdentity;
    use crate::packet::Packet;

    use super::KnownDestinations;

    fn sample_announce(aspect: &str) -> Packet {
        let identity = PrivateIdentity::new_from_rand(OsRng);
        let mut destination =
            SingleInputDestination::new(identity, DestinationName::new("cachetest", aspect));
        destination.announce(OsRng, Some(b"app-data".as_slice())).expect("valid announce")
    }

    #[test]
    fn learns_and_recalls() {
        let known = KnownDestinations::new(8);
        let announce = sample_announce("one");

        let identity = known.validate_announce(&announce, false).expect("valid announce");
        assert!(known.is_known(&announce.destination));
        assert_eq!(known.recall(&announce.destination), Some(identity));
        assert_eq!(known.recall_app_data(&announce.destination).as_deref(), Some(&b"app-data"[..]));
    }

    #[test]
    fn signature_only_validation_skips_cache() {
        let known = KnownDestinations::new(8);
        let announce = sample_announce("two");

        assert!(known.validate_announce(&announce, true).is_some());
        assert!(!known.is_known(&announce.destination));
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let known = KnownDestinations::new(2);

        let first = sample_announce("a");
        let second = sample_announce("b");
        let third = sample_announce("c");

        known.validate_announce(&first, false).expect("valid announce");
        known.validate_announce(&second, false).expect("valid announce");

        // Reading refreshes recency, so `first` survives the eviction.
        known.recall(&first.destination).expect("known record");
        known.validate_announce(&third, false).expect("valid announce");

        assert!(known.is_known(&first.destination));
        assert!(!known.is_known(&second.destination));
        assert!(known.is_known(&third.destination));
    }

    #[test]
    fn forget_removes_record() {
        let known = KnownDestinations::new(8);
        let announce = sample_announce("gone");

        known.validate_announce(&announce, false).expect("valid announce");
        known.forget(&announce.destination);
        assert!(!known.is_known(&announce.destination));
    }

    #[test]
    fn persistence_replays_records() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("announces.log");

        let announce = sample_announce("persisted");
        {
            let known = KnownDestinations::new_persistent(8, &path);
            known.validate_announce(&announce, false).expect("valid announce");
        }

        let restored = KnownDestinations::new_persistent(8, &path);
        assert!(restored.is_known(&announce.destination));
        assert_eq!(
            restored.recall_app_data(&announce.destination).as_deref(),
            Some(&b"app-data"[..])
        );
    }

    #[test]
    fn damaged_log_tail_is_tolerated() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("announces.log");

        let announce = sample_announce("survivor");
        {
            let known = KnownDestinations::new_persistent(8, &path);
            known.validate_announce(&announce, false).expect("valid announce");
        }

        let mut bytes = std::fs::read(&path).expect("log contents");
        bytes.extend_from_slice(&[0xc1, 0x00, 0x13]);
        std::fs::write(&path, bytes).expect("damaged log");

        let restored = KnownDestinations::new_persistent(8, &path);
        assert!(restored.is_known(&announce.destination));
    }
}
