use crate::credentials::Principal;
use crate::crypto::KeyBlock;
use crate::{Error, ErrorKind, Result};

/// Source of service keys for [rd_req](crate::ap::rd_req).
pub trait KeyTable: Send + Sync {
    /// Returns the key of `server` with the given enctype.
    ///
    /// `kvno == None` selects the highest key version.
    fn get_key(&self, server: &Principal, kvno: Option<u32>, enctype: i32) -> Result<KeyBlock>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTableEntry {
    pub principal: Principal,
    pub kvno: u32,
    pub key: KeyBlock,
}

/// Key table kept in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyTable {
    entries: Vec<KeyTableEntry>,
}

impl MemoryKeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, principal: Principal, kvno: u32, key: KeyBlock) {
        self.entries.push(KeyTableEntry { principal, kvno, key });
    }

    pub fn entries(&self) -> &[KeyTableEntry] {
        &self.entries
    }
}

impl KeyTable for MemoryKeyTable {
    fn get_key(&self, server: &Principal, kvno: Option<u32>, enctype: i32) -> Result<KeyBlock> {
        self.entries
            .iter()
            .filter(|entry| {
                entry.principal.realm.eq_ignore_ascii_case(&server.realm)
                    && entry.principal.components == server.components
                    && entry.key.enctype == enctype
                    && kvno.map_or(true, |kvno| entry.kvno == kvno)
            })
            .max_by_key(|entry| entry.kvno)
            .map(|entry| entry.key.clone())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::KeyNotFound,
                    format!("no key for {} (kvno {:?}, enctype {})", server, kvno, enctype),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> Principal {
        Principal::new("EXAMPLE.COM", 2, vec!["host".to_owned(), "server.example.com".to_owned()])
    }

    #[test]
    fn highest_kvno_wins() {
        let mut keytab = MemoryKeyTable::new();
        keytab.add_entry(service(), 1, KeyBlock::new(18, vec![1; 32]));
        keytab.add_entry(service(), 3, KeyBlock::new(18, vec![3; 32]));
        keytab.add_entry(service(), 2, KeyBlock::new(18, vec![2; 32]));

        assert_eq!(keytab.get_key(&service(), None, 18).unwrap().contents(), &[3; 32]);
        assert_eq!(keytab.get_key(&service(), Some(2), 18).unwrap().contents(), &[2; 32]);
    }

    #[test]
    fn missing_enctype_is_reported() {
        let mut keytab = MemoryKeyTable::new();
        keytab.add_entry(service(), 1, KeyBlock::new(18, vec![1; 32]));

        let err = keytab.get_key(&service(), None, 17).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::KeyNotFound);
    }
}
