// 内存指纹库

use std::collections::{HashMap, HashSet};
use crate::error::AppResult;
use crate::fingerprint::{HashCode, HashRecord};
use crate::store::FingerprintStore;

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<HashCode, Vec<(u32, String, String)>>,
    len: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录总数（含重复）
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 不同哈希的数量
    pub fn distinct_hashes(&self) -> usize {
        self.entries.len()
    }
}

impl FingerprintStore for MemoryStore {
    fn insert(&mut self, record: &HashRecord) -> AppResult<()> {
        self.entries
            .entry(record.hash)
            .or_default()
            .push((record.offset, record.song_id.clone(), record.label.clone()));
        self.len += 1;
        Ok(())
    }

    fn query_batch(&self, hashes: &HashSet<HashCode>) -> AppResult<Vec<HashRecord>> {
        let mut records = Vec::new();
        for hash in hashes {
            if let Some(entries) = self.entries.get(hash) {
                records.extend(entries.iter().map(|(offset, song_id, label)| HashRecord {
                    hash: *hash,
                    offset: *offset,
                    song_id: song_id.clone(),
                    label: label.clone(),
                }));
            }
        }
        Ok(records)
    }
}
