//! Replay caches used by the timestamp based replay protection.
//!
//! Caches may be shared between contexts and threads, so implementations do their own locking.

mod file;
mod memory;

use std::collections::HashMap;
use std::fmt::{self, Write};

pub use file::FileReplayCache;
pub use memory::MemoryReplayCache;

use crate::{Error, ErrorKind, Result};

/// Client name used in replay records when the message does not name a client.
pub const DEFAULT_CLIENT: &str = "default";

/// A message fingerprint and its timestamp.
#[derive(Clone, PartialEq, Eq)]
pub struct ReplayRecord {
    pub client: String,
    pub server: String,
    /// Trailing checksum bytes of the ciphertext, or the checksum of a KRB-SAFE message.
    pub tag: Vec<u8>,
    pub timestamp: i64,
    pub usec: u32,
}

impl ReplayRecord {
    pub fn new(client: impl Into<String>, server: impl Into<String>, tag: Vec<u8>, timestamp: i64, usec: u32) -> Self {
        Self {
            client: client.into(),
            server: server.into(),
            tag,
            timestamp,
            usec,
        }
    }

    /// Key the record is stored under: client, server and the hex encoded tag.
    pub fn key(&self) -> String {
        let mut key = format!("{}/{}/", self.client, self.server);
        for byte in &self.tag {
            let _ = write!(key, "{:02x}", byte);
        }

        key
    }
}

impl fmt::Debug for ReplayRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayRecord")
            .field("key", &self.key())
            .field("timestamp", &self.timestamp)
            .field("usec", &self.usec)
            .finish()
    }
}

/// Replay cache collaborator.
pub trait ReplayCache: Send + Sync + fmt::Debug {
    /// Stores the record. Fails with [ReplayDetected](crate::ErrorKind::ReplayDetected) when the
    /// same record is already in the cache and has not expired yet.
    fn store(&self, record: &ReplayRecord) -> Result<()>;

    /// Drops every record older than the cache lifespan relative to `now`.
    fn expunge(&self, now: i64) -> Result<()>;
}

fn is_expired(timestamp: i64, lifespan: time::Duration, now: i64) -> bool {
    timestamp.saturating_add(lifespan.whole_seconds()) < now
}

/// Record keys and timestamps shared by the cache implementations.
///
/// Expired records are swept while storing, at most once per lifespan.
#[derive(Debug, Default)]
struct RecordTable {
    records: HashMap<String, i64>,
    last_sweep: Option<i64>,
}

impl RecordTable {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn check(&self, key: &str, record: &ReplayRecord, lifespan: time::Duration) -> Result<()> {
        match self.records.get(key) {
            Some(timestamp) if !is_expired(*timestamp, lifespan, record.timestamp) => {
                warn!(?record, "Replay detected");

                Err(Error::new(ErrorKind::ReplayDetected, "message was already received"))
            }
            _ => Ok(()),
        }
    }

    fn sweep_due(&self, now: i64, lifespan: time::Duration) -> bool {
        match self.last_sweep {
            Some(last_sweep) => is_expired(last_sweep, lifespan, now),
            None => true,
        }
    }

    /// Drops the expired records and returns how many were dropped.
    fn sweep(&mut self, now: i64, lifespan: time::Duration) -> usize {
        let before = self.records.len();

        self.records.retain(|_, timestamp| !is_expired(*timestamp, lifespan, now));
        self.last_sweep = Some(now);

        before - self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{RecordTable, ReplayRecord};

    #[test]
    fn record_key_contains_hex_tag() {
        let record = ReplayRecord::new("alice@EXAMPLE.COM", "host/server@EXAMPLE.COM", vec![0x0a, 0xff], 0, 0);

        assert_eq!(record.key(), "alice@EXAMPLE.COM/host/server@EXAMPLE.COM/0aff");
    }

    #[test]
    fn sweep_runs_once_per_lifespan() {
        let lifespan = time::Duration::seconds(300);
        let mut table = RecordTable::default();

        assert!(table.sweep_due(1_000, lifespan));
        table.sweep(1_000, lifespan);
        assert!(!table.sweep_due(1_300, lifespan));
        assert!(table.sweep_due(1_301, lifespan));
    }
}
