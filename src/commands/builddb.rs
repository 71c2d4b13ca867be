// 建库命令

use std::path::Path;
use tracing::info;
use crate::audio::SymphoniaDecoder;
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::library::{self, BuildReport};
use crate::store::SqliteStore;

/// 扫描歌曲文件夹并写入指纹库
pub fn run(input: &Path, output: &Path, config: &AppConfig) -> AppResult<BuildReport> {
    info!("[BUILD] 歌曲目录: {:?}, 指纹库: {:?}", input, output);

    // 先打开库，输出路径不可写时直接失败，不做任何解码
    let mut store = SqliteStore::open(output, config.matching.query_chunk_size)?;
    let decoder = SymphoniaDecoder::new(config.target_sample_rate);

    let report = library::build_database(input, &mut store, &decoder, config)?;
    print_report(&report);
    Ok(report)
}

fn print_report(report: &BuildReport) {
    println!("开始时间: {}", report.started_at);
    println!("音频文件: {}", report.scanned);
    println!("写入歌曲: {}", report.ingested);
    println!("写入哈希: {}", report.hashes);
    println!("耗时: {:.2}s", report.elapsed_secs);
    if !report.failures.is_empty() {
        println!("失败 {} 个:", report.failures.len());
        for failure in &report.failures {
            println!("  {}: {}", failure.path, failure.error);
        }
    }
}
