use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::{is_expired, RecordTable, ReplayCache, ReplayRecord};
use crate::utils::now_secs;
use crate::{Error, ErrorKind, Result};

const MAX_KEY_LEN: u32 = 4096;

/// Persistent replay cache.
///
/// Records are appended to the file as:
/// ```not_rust
/// key length: u32 BE | key: UTF-8 | timestamp: i64 BE
/// ```
/// The file is rewritten without the expired records whenever the cache is swept.
#[derive(Debug)]
pub struct FileReplayCache {
    path: PathBuf,
    lifespan: time::Duration,
    table: Mutex<RecordTable>,
}

impl FileReplayCache {
    /// Opens (or creates) the cache file and loads the records that are still alive.
    #[instrument(level = "debug", skip_all)]
    pub fn open(path: impl AsRef<Path>, lifespan: time::Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let now = now_secs();

        let mut table = RecordTable::default();
        match File::open(&path) {
            Ok(file) => {
                let mut reader = BufReader::new(file);
                while let Some((key, timestamp)) = read_record(&mut reader)? {
                    if !is_expired(timestamp, lifespan, now) {
                        table.records.insert(key, timestamp);
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Replay cache file does not exist yet");
            }
            Err(err) => return Err(err.into()),
        }

        Ok(Self {
            path,
            lifespan,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.table.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn rewrite(&self, table: &RecordTable) -> Result<()> {
        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for (key, timestamp) in table.records.iter() {
                write_record(&mut writer, key, *timestamp)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        debug!(records = table.len(), path = %self.path.display(), "Replay cache file rewritten");

        Ok(())
    }
}

fn read_record(mut reader: impl Read) -> Result<Option<(String, i64)>> {
    let key_len = match reader.read_u32::<BigEndian>() {
        Ok(key_len) => key_len,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    if key_len > MAX_KEY_LEN {
        return Err(Error::new(
            ErrorKind::InternalError,
            format!("replay cache record is too long: {}", key_len),
        ));
    }

    let mut key = vec![0; key_len as usize];
    match reader.read_exact(&mut key) {
        Ok(()) => {}
        // A torn write at the end of the file.
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let timestamp = match reader.read_i64::<BigEndian>() {
        Ok(timestamp) => timestamp,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let key = String::from_utf8(key)
        .map_err(|err| Error::new(ErrorKind::InternalError, format!("invalid replay cache record: {:?}", err)))?;

    Ok(Some((key, timestamp)))
}

fn write_record(mut writer: impl Write, key: &str, timestamp: i64) -> Result<()> {
    let key_len =
        u32::try_from(key.len()).map_err(|_| Error::new(ErrorKind::InternalError, "replay cache key is too long"))?;

    writer.write_u32::<BigEndian>(key_len)?;
    writer.write_all(key.as_bytes())?;
    writer.write_i64::<BigEndian>(timestamp)?;

    Ok(())
}

impl ReplayCache for FileReplayCache {
    fn store(&self, record: &ReplayRecord) -> Result<()> {
        let key = record.key();
        let mut table = self.table.lock()?;

        table.check(&key, record, self.lifespan)?;

        if table.sweep_due(record.timestamp, self.lifespan) && table.sweep(record.timestamp, self.lifespan) > 0 {
            table.records.insert(key, record.timestamp);

            return self.rewrite(&table);
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = BufWriter::new(file);
        write_record(&mut writer, &key, record.timestamp)?;
        writer.flush()?;

        table.records.insert(key, record.timestamp);

        Ok(())
    }

    fn expunge(&self, now: i64) -> Result<()> {
        let mut table = self.table.lock()?;
        table.sweep(now, self.lifespan);

        self.rewrite(&table)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;
    use rand::RngCore;

    use super::*;

    fn temp_cache_path() -> PathBuf {
        std::env::temp_dir().join(format!("krb5-messaging-rcache-{:016x}", OsRng.next_u64()))
    }

    #[test]
    fn records_survive_reopening() {
        let path = temp_cache_path();
        let now = now_secs();
        let record = ReplayRecord::new("default", "", vec![0xde, 0xad], now, 0);

        {
            let cache = FileReplayCache::open(&path, time::Duration::minutes(5)).unwrap();
            cache.store(&record).unwrap();
        }

        let cache = FileReplayCache::open(&path, time::Duration::minutes(5)).unwrap();
        let err = cache.store(&record).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReplayDetected);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn expunge_rewrites_file() {
        let path = temp_cache_path();
        let now = now_secs();

        let cache = FileReplayCache::open(&path, time::Duration::seconds(60)).unwrap();
        cache.store(&ReplayRecord::new("default", "", vec![1], now - 600, 0)).unwrap();
        cache.store(&ReplayRecord::new("default", "", vec![2], now, 0)).unwrap();
        cache.expunge(now).unwrap();

        let reopened = FileReplayCache::open(&path, time::Duration::seconds(60)).unwrap();
        assert_eq!(reopened.len().unwrap(), 1);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn storing_sweeps_expired_records_from_the_file() {
        let path = temp_cache_path();
        let now = now_secs();
        let lifespan = time::Duration::seconds(60);

        let cache = FileReplayCache::open(&path, lifespan).unwrap();
        cache.store(&ReplayRecord::new("default", "", vec![1], now - 600, 0)).unwrap();
        cache.store(&ReplayRecord::new("default", "", vec![2], now - 590, 0)).unwrap();
        let before = fs::metadata(&path).unwrap().len();

        cache.store(&ReplayRecord::new("default", "", vec![3], now, 0)).unwrap();

        assert_eq!(cache.len().unwrap(), 1);
        assert!(fs::metadata(&path).unwrap().len() < before);

        fs::remove_file(&path).unwrap();
    }
}
