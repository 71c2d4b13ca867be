// 识别命令

use std::path::Path;
use serde::Serialize;
use crate::audio::SymphoniaDecoder;
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::library;
use crate::matcher::MatchResult;
use crate::store::SqliteStore;

/// JSON 输出
#[derive(Debug, Serialize)]
struct IdentifyOutput<'a> {
    #[serde(flatten)]
    result: &'a MatchResult,
    /// 片段在参考录音中的起始时间（秒）
    offset_seconds: Option<f64>,
}

/// 识别样本文件，返回识别结果
pub fn run(database: &Path, input: &Path, config: &AppConfig, json: bool) -> AppResult<MatchResult> {
    let store = SqliteStore::open_existing(database, config.matching.query_chunk_size)?;
    let decoder = SymphoniaDecoder::new(config.target_sample_rate);

    let result = library::identify_file(input, &store, &decoder, config)?;
    let offset_seconds = offset_seconds(&result, config);

    if json {
        let output = IdentifyOutput { result: &result, offset_seconds };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_result(&result, offset_seconds);
    }
    Ok(result)
}

fn offset_seconds(result: &MatchResult, config: &AppConfig) -> Option<f64> {
    result.matched.then(|| {
        config.spectrogram.frames_to_seconds(result.best_delta, config.target_sample_rate)
    })
}

fn print_result(result: &MatchResult, offset_seconds: Option<f64>) {
    match (&result.song_id, &result.label) {
        (Some(song_id), Some(label)) if result.matched => {
            println!("歌曲: {}", song_id);
            println!("文件: {}", label);
            println!("置信度: {:.3} ({} / {} 个哈希)", result.confidence, result.score, result.query_hashes);
            if let Some(seconds) = offset_seconds {
                println!("起始位置: {:.2}s", seconds);
            }
        }
        _ => {
            println!("no match");
            if let Some(best) = result.candidates.first() {
                println!("最佳候选: {} ({} 票)", best.song_id, best.score);
            }
        }
    }

    if result.candidates.len() > 1 {
        println!("候选:");
        for candidate in &result.candidates {
            println!(
                "  {:<32} score={:<6} delta={:<8} hits={}",
                candidate.song_id, candidate.score, candidate.best_delta, candidate.total_hits
            );
        }
    }
}
