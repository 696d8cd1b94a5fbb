use std::sync::Mutex;

use super::{RecordTable, ReplayCache, ReplayRecord};
use crate::Result;

/// In-memory replay cache.
#[derive(Debug)]
pub struct MemoryReplayCache {
    lifespan: time::Duration,
    table: Mutex<RecordTable>,
}

impl MemoryReplayCache {
    pub fn new(lifespan: time::Duration) -> Self {
        Self {
            lifespan,
            table: Mutex::new(RecordTable::default()),
        }
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.table.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl ReplayCache for MemoryReplayCache {
    fn store(&self, record: &ReplayRecord) -> Result<()> {
        let key = record.key();
        let mut table = self.table.lock()?;

        table.check(&key, record, self.lifespan)?;

        if table.sweep_due(record.timestamp, self.lifespan) {
            let expunged = table.sweep(record.timestamp, self.lifespan);
            trace!(expunged, "Replay cache swept");
        }
        table.records.insert(key, record.timestamp);

        Ok(())
    }

    fn expunge(&self, now: i64) -> Result<()> {
        let expunged = self.table.lock()?.sweep(now, self.lifespan);
        debug!(expunged, "Replay cache expunged");

        Ok(())
    }
}
