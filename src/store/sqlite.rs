// SQLite 指纹库
//
// 单表结构：fingerprints(id, hash, offset, song_id, label)，hash 以 16 位十六进制文本存储。

use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use rusqlite::types::Type;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};
use crate::error::{AppError, AppResult};
use crate::fingerprint::{HashCode, HashRecord};
use crate::store::FingerprintStore;

/// 单首歌曲的统计
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SongSummary {
    pub song_id: String,
    pub label: String,
    pub hashes: u64,
}

/// 带自增 id 的原始行
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoredRow {
    pub id: i64,
    pub record: HashRecord,
}

pub struct SqliteStore {
    conn: Connection,
    chunk_size: usize,
}

impl SqliteStore {
    /// 打开（必要时创建）指纹库文件
    pub fn open(db_path: &Path, chunk_size: usize) -> AppResult<Self> {
        let conn = Connection::open(db_path)?;
        init_schema(&conn)?;
        info!("[STORE] 指纹库已打开: {:?}", db_path);
        Ok(Self { conn, chunk_size: chunk_size.max(1) })
    }

    /// 以只读方式打开已有指纹库，文件不存在时报错而不是新建
    pub fn open_existing(db_path: &Path, chunk_size: usize) -> AppResult<Self> {
        if !db_path.is_file() {
            return Err(AppError::NotFound(format!("指纹库不存在: {}", db_path.display())));
        }
        let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'fingerprints'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(AppError::InvalidInput(format!(
                "{} 不是指纹库（缺少 fingerprints 表）",
                db_path.display()
            )));
        }

        debug!("[STORE] 只读打开指纹库: {:?}", db_path);
        Ok(Self { conn, chunk_size: chunk_size.max(1) })
    }

    /// 内存数据库
    pub fn in_memory(chunk_size: usize) -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn, chunk_size: chunk_size.max(1) })
    }

    /// 记录总数
    pub fn record_count(&self) -> AppResult<u64> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM fingerprints", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// 按歌曲汇总哈希数量
    pub fn song_summaries(&self) -> AppResult<Vec<SongSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT song_id, label, COUNT(*) FROM fingerprints
             GROUP BY song_id, label
             ORDER BY song_id, label"
        )?;

        let iter = stmt.query_map([], |row| {
            Ok(SongSummary {
                song_id: row.get(0)?,
                label: row.get(1)?,
                hashes: row.get::<_, i64>(2)? as u64,
            })
        })?;

        let mut result = Vec::new();
        for item in iter {
            result.push(item?);
        }
        Ok(result)
    }

    /// 按 id 顺序读取前 limit 行
    pub fn sample_rows(&self, limit: usize) -> AppResult<Vec<StoredRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, hash, \"offset\", song_id, label FROM fingerprints ORDER BY id LIMIT ?1"
        )?;

        let iter = stmt.query_map([limit as i64], |row| {
            Ok(StoredRow {
                id: row.get(0)?,
                record: HashRecord {
                    hash: hash_from_row(row, 1)?,
                    offset: row.get(2)?,
                    song_id: row.get(3)?,
                    label: row.get(4)?,
                },
            })
        })?;

        let mut result = Vec::new();
        for item in iter {
            result.push(item?);
        }
        Ok(result)
    }
}

/// 创建表与索引
fn init_schema(conn: &Connection) -> AppResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fingerprints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hash TEXT NOT NULL,
            \"offset\" INTEGER NOT NULL CHECK (\"offset\" >= 0),
            song_id TEXT NOT NULL,
            label TEXT NOT NULL
        )",
        [],
    )?;

    // 查询全部走 hash 索引
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fingerprints_hash ON fingerprints(hash)",
        [],
    )?;

    Ok(())
}

fn hash_from_row(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<HashCode> {
    let text: String = row.get(index)?;
    text.parse::<HashCode>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

impl FingerprintStore for SqliteStore {
    fn insert(&mut self, record: &HashRecord) -> AppResult<()> {
        self.conn.execute(
            "INSERT INTO fingerprints (hash, \"offset\", song_id, label) VALUES (?1, ?2, ?3, ?4)",
            params![record.hash.to_string(), record.offset, record.song_id, record.label],
        )?;
        Ok(())
    }

    /// 单事务批量写入
    fn insert_batch(&mut self, records: &[HashRecord]) -> AppResult<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO fingerprints (hash, \"offset\", song_id, label) VALUES (?1, ?2, ?3, ?4)"
            )?;
            for record in records {
                stmt.execute(params![record.hash.to_string(), record.offset, record.song_id, record.label])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn query_batch(&self, hashes: &HashSet<HashCode>) -> AppResult<Vec<HashRecord>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }

        let mut keys: Vec<String> = hashes.iter().map(|h| h.to_string()).collect();
        keys.sort_unstable();

        let mut result = Vec::new();
        for chunk in keys.chunks(self.chunk_size) {
            // 构建 IN 子句的占位符
            let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT hash, \"offset\", song_id, label FROM fingerprints WHERE hash IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = self.conn.prepare(&sql)?;
            let iter = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok(HashRecord {
                    hash: hash_from_row(row, 0)?,
                    offset: row.get(1)?,
                    song_id: row.get(2)?,
                    label: row.get(3)?,
                })
            })?;

            for item in iter {
                result.push(item?);
            }
        }

        debug!("[STORE] {} 个哈希命中 {} 条记录", hashes.len(), result.len());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: u64, offset: u32, song: &str) -> HashRecord {
        HashRecord {
            hash: HashCode(hash),
            offset,
            song_id: song.to_string(),
            label: format!("{}.mp3", song),
        }
    }

    #[test]
    fn test_insert_and_query_chunked() {
        // 分块大小 2，强制多次查询
        let mut store = SqliteStore::in_memory(2).unwrap();
        let records: Vec<HashRecord> = (0..10).map(|i| record(i, i as u32 * 3, "a")).collect();
        assert_eq!(store.insert_batch(&records).unwrap(), 10);

        let wanted: HashSet<HashCode> = [1, 3, 4, 8, 9, 42].into_iter().map(HashCode).collect();
        let mut found = store.query_batch(&wanted).unwrap();
        found.sort_by_key(|r| r.hash);
        let expected: Vec<HashRecord> = [1u64, 3, 4, 8, 9].iter().map(|&i| record(i, i as u32 * 3, "a")).collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_duplicates_and_shared_hashes() {
        let mut store = SqliteStore::in_memory(500).unwrap();
        store.insert(&record(5, 1, "a")).unwrap();
        store.insert(&record(5, 1, "a")).unwrap();
        store.insert(&record(5, 7, "b")).unwrap();

        let found = store.query_batch(&HashSet::from([HashCode(5)])).unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(store.record_count().unwrap(), 3);
    }

    #[test]
    fn test_empty_query_set() {
        let store = SqliteStore::in_memory(500).unwrap();
        assert!(store.query_batch(&HashSet::new()).unwrap().is_empty());
    }

    #[test]
    fn test_hash_persisted_as_fixed_width_text() {
        let mut store = SqliteStore::in_memory(500).unwrap();
        store.insert(&record(0xabc, 2, "a")).unwrap();
        let text: String = store.conn
            .query_row("SELECT hash FROM fingerprints", [], |row| row.get(0))
            .unwrap();
        assert_eq!(text, "0000000000000abc");
    }

    #[test]
    fn test_summaries_and_rows() {
        let mut store = SqliteStore::in_memory(500).unwrap();
        store.insert_batch(&[record(1, 0, "b"), record(2, 1, "a"), record(3, 2, "b")]).unwrap();

        let summaries = store.song_summaries().unwrap();
        assert_eq!(summaries, vec![
            SongSummary { song_id: "a".into(), label: "a.mp3".into(), hashes: 1 },
            SongSummary { song_id: "b".into(), label: "b.mp3".into(), hashes: 2 },
        ]);

        let rows = store.sample_rows(2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[0].record, record(1, 0, "b"));
        assert!(rows[1].id > rows[0].id);
    }

    #[test]
    fn test_reopen_file_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.sqlite");
        {
            let mut store = SqliteStore::open(&path, 500).unwrap();
            store.insert(&record(9, 4, "a")).unwrap();
        }
        let store = SqliteStore::open_existing(&path, 500).unwrap();
        assert_eq!(store.record_count().unwrap(), 1);
        assert_eq!(store.query_batch(&HashSet::from([HashCode(9)])).unwrap(), vec![record(9, 4, "a")]);
    }

    #[test]
    fn test_open_existing_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = SqliteStore::open_existing(&dir.path().join("missing.db"), 500);
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_open_unwritable_path_is_store_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_such_dir").join("db.sqlite");
        assert!(matches!(SqliteStore::open(&path, 500), Err(AppError::StoreUnavailable(_))));
    }

    #[test]
    fn test_read_only_store_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.sqlite");
        SqliteStore::open(&path, 500).unwrap();

        let mut store = SqliteStore::open_existing(&path, 500).unwrap();
        assert!(matches!(store.insert(&record(1, 1, "a")), Err(AppError::StoreUnavailable(_))));
    }
}
