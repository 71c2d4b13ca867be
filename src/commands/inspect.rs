// 指纹库检查命令

use std::path::Path;
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::store::SqliteStore;

/// 打印记录总数、每首歌的哈希数量以及前 limit 行
pub fn run(database: &Path, limit: usize, config: &AppConfig) -> AppResult<u64> {
    let store = SqliteStore::open_existing(database, config.matching.query_chunk_size)?;

    let total = store.record_count()?;
    if total == 0 {
        println!("fingerprints 表中没有数据");
        return Ok(0);
    }

    let songs = store.song_summaries()?;
    println!("记录总数: {}", total);
    println!("歌曲数: {}", songs.len());
    for song in &songs {
        println!("  {:<32} {:<40} {}", song.song_id, song.label, song.hashes);
    }

    let rows = store.sample_rows(limit)?;
    if !rows.is_empty() {
        println!("前 {} 行:", rows.len());
        for row in &rows {
            let (freq1, freq2, delta) = row.record.hash.unpack(&config.hashing);
            println!(
                "  {:>8} {} ({},{},{}) offset={} {} {}",
                row.id, row.record.hash, freq1, freq2, delta,
                row.record.offset, row.record.song_id, row.record.label
            );
        }
    }

    Ok(total)
}
