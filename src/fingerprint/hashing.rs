//! 峰值配对哈希
//!
//! 每个峰值与其后 `fan_value` 个峰值配对，把两个频率桶和量化后的时间差
//! 打包成定宽哈希码。哈希只取决于 (freq1, freq2, Δtime) 和量化参数。

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::config::HashConfig;
use crate::error::{AppError, AppResult};
use crate::fingerprint::peaks::Peak;

/// 定宽哈希码，持久化为 16 位十六进制文本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HashCode(pub u64);

impl HashCode {
    /// 拆回 (freq1, freq2, 时间差桶)
    pub fn unpack(&self, config: &HashConfig) -> (u64, u64, u64) {
        let freq_mask = (1u64 << config.freq_bits) - 1;
        let delta_mask = (1u64 << config.delta_bits) - 1;
        let delta = self.0 & delta_mask;
        let freq2 = (self.0 >> config.delta_bits) & freq_mask;
        let freq1 = (self.0 >> (config.delta_bits + config.freq_bits)) & freq_mask;
        (freq1, freq2, delta)
    }
}

impl fmt::Display for HashCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for HashCode {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        u64::from_str_radix(s, 16)
            .map(HashCode)
            .map_err(|e| AppError::InvalidInput(format!("无效的哈希码 {:?}: {}", s, e)))
    }
}

/// 未标记歌曲的哈希（查询时使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hash: HashCode,
    /// 配对中较早峰值的帧索引
    pub offset: u32,
}

/// 带歌曲标识的哈希记录（建库时写入）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashRecord {
    pub hash: HashCode,
    pub offset: u32,
    pub song_id: String,
    pub label: String,
}

impl HashRecord {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint { hash: self.hash, offset: self.offset }
    }
}

/// 打包两个频率桶与时间差
///
/// 频率桶超出 `freq_bits` 时截断到最大值；时间差先截断到 `max_delta`，
/// 再按 `delta_step` 分桶。
pub fn quantize(freq1: usize, freq2: usize, delta: usize, config: &HashConfig) -> HashCode {
    let freq_max = (1u64 << config.freq_bits) - 1;
    let q1 = (freq1 as u64).min(freq_max);
    let q2 = (freq2 as u64).min(freq_max);
    let clamped = (delta as u64).min(u64::from(config.max_delta));
    let qd = clamped / u64::from(config.delta_step);

    HashCode((q1 << (config.freq_bits + config.delta_bits)) | (q2 << config.delta_bits) | qd)
}

/// 生成查询用哈希
///
/// `peaks` 需按时间升序；峰值少于 2 个时返回空序列。
pub fn generate_hashes(peaks: &[Peak], config: &HashConfig) -> Vec<Fingerprint> {
    if peaks.len() < 2 {
        return Vec::new();
    }

    let mut fingerprints = Vec::with_capacity(peaks.len() * config.fan_value);
    for (i, anchor) in peaks.iter().enumerate() {
        for target in peaks.iter().skip(i + 1).take(config.fan_value) {
            if target.time < anchor.time {
                continue;
            }
            let hash = quantize(anchor.freq, target.freq, target.time - anchor.time, config);
            fingerprints.push(Fingerprint { hash, offset: anchor.time as u32 });
        }
    }

    debug!("[HASH] {} 个峰值生成 {} 个哈希", peaks.len(), fingerprints.len());
    fingerprints
}

/// 生成建库用哈希，附带歌曲标识
pub fn generate_records(peaks: &[Peak], config: &HashConfig, song_id: &str, label: &str) -> Vec<HashRecord> {
    generate_hashes(peaks, config)
        .into_iter()
        .map(|fp| HashRecord {
            hash: fp.hash,
            offset: fp.offset,
            song_id: song_id.to_string(),
            label: label.to_string(),
        })
        .collect()
}
