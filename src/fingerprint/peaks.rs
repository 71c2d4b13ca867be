//! 局部极大值峰值检测

use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::config::PeakConfig;
use crate::fingerprint::spectrogram::Spectrogram;

/// 时频峰值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// 帧索引
    pub time: usize,
    /// 频率桶索引
    pub freq: usize,
    /// 幅度（dB）
    pub magnitude: f32,
}

/// 提取局部极大值，按 (time, freq) 升序输出
///
/// 一个点成为峰值当且仅当：幅度不低于阈值，且在以它为中心的邻域（越界部分裁掉）内
/// 是严格最大值。邻域内幅度相等时，(time, freq) 字典序最小的点胜出，
/// 因此结果与扫描顺序无关。
pub fn detect_peaks(spectrogram: &Spectrogram, config: &PeakConfig) -> Vec<Peak> {
    let frames = spectrogram.frames();
    let bins = spectrogram.bins();
    let mut peaks = Vec::new();

    for t in 0..frames {
        for f in 0..bins {
            let value = spectrogram.get(t, f);
            if value < config.threshold {
                continue;
            }
            if is_local_max(spectrogram, t, f, value, config) {
                peaks.push(Peak { time: t, freq: f, magnitude: value });
            }
        }
    }

    debug!(
        "[PEAKS] {}x{} 频谱中检测到 {} 个峰值 (阈值 {} dB, 邻域 {}x{})",
        frames, bins, peaks.len(), config.threshold, config.time_radius, config.freq_radius
    );
    peaks
}

fn is_local_max(spectrogram: &Spectrogram, t: usize, f: usize, value: f32, config: &PeakConfig) -> bool {
    let t_lo = t.saturating_sub(config.time_radius);
    let t_hi = (t + config.time_radius).min(spectrogram.frames() - 1);
    let f_lo = f.saturating_sub(config.freq_radius);
    let f_hi = (f + config.freq_radius).min(spectrogram.bins() - 1);

    for nt in t_lo..=t_hi {
        let row = spectrogram.frame(nt);
        for nf in f_lo..=f_hi {
            if nt == t && nf == f {
                continue;
            }
            let other = row[nf];
            if other > value {
                return false;
            }
            if other == value && (nt, nf) < (t, f) {
                return false;
            }
        }
    }
    true
}
