// 指纹库模块
//
// 子模块：
// - sqlite: 基于 rusqlite 的持久化指纹库
// - memory: 进程内指纹库，用于测试或一次性比对

pub mod memory;
pub mod sqlite;

use std::collections::HashSet;
use crate::error::AppResult;
use crate::fingerprint::{HashCode, HashRecord};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// 哈希 -> [(offset, song_id, label)] 的只增多重映射
///
/// 重复记录合法；识别期间只读。存储失败统一以 `StoreUnavailable` 返回，
/// 不在此层重试。
pub trait FingerprintStore {
    fn insert(&mut self, record: &HashRecord) -> AppResult<()>;

    /// 批量写入，返回写入条数
    fn insert_batch(&mut self, records: &[HashRecord]) -> AppResult<usize> {
        for record in records {
            self.insert(record)?;
        }
        Ok(records.len())
    }

    /// 返回哈希落在查询集合内的全部记录，不保证顺序
    fn query_batch(&self, hashes: &HashSet<HashCode>) -> AppResult<Vec<HashRecord>>;
}
