// 音频指纹模块
//
// 频谱 -> 峰值 -> 配对哈希。三个步骤都是纯函数，可在不同歌曲之间并行执行。

pub mod hashing;
pub mod peaks;
pub mod spectrogram;

use tracing::debug;
use crate::config::AppConfig;
use crate::error::AppResult;

pub use hashing::{Fingerprint, HashCode, HashRecord};
pub use peaks::Peak;
pub use spectrogram::Spectrogram;

/// 对采样序列运行完整指纹流程，返回未标记的哈希
pub fn fingerprint_samples(samples: &[f32], sample_rate: u32, config: &AppConfig) -> AppResult<Vec<Fingerprint>> {
    let spectrogram = spectrogram::build_spectrogram(samples, sample_rate, &config.spectrogram)?;
    let peaks = peaks::detect_peaks(&spectrogram, &config.peaks);
    let fingerprints = hashing::generate_hashes(&peaks, &config.hashing);

    debug!(
        "[FINGERPRINT] {} 帧, {} 个峰值, {} 个哈希",
        spectrogram.frames(), peaks.len(), fingerprints.len()
    );
    Ok(fingerprints)
}

/// 对一首歌运行指纹流程，返回带歌曲标识的哈希记录
pub fn fingerprint_song(
    samples: &[f32],
    sample_rate: u32,
    config: &AppConfig,
    song_id: &str,
    label: &str,
) -> AppResult<Vec<HashRecord>> {
    let spectrogram = spectrogram::build_spectrogram(samples, sample_rate, &config.spectrogram)?;
    let peaks = peaks::detect_peaks(&spectrogram, &config.peaks);
    Ok(hashing::generate_records(&peaks, &config.hashing, song_id, label))
}
