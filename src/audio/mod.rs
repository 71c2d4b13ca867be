// 音频处理模块
//
// 子模块：
// - decoder: 音频文件解码、下混为单声道并重采样到统一采样率（基于 symphonia + rubato）

pub mod decoder;

use std::path::Path;
use crate::error::AppResult;

pub use decoder::SymphoniaDecoder;

/// 支持的音频格式
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "m4a", "aac", "ogg"];

/// 单声道采样序列，加载后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSample {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioSample {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// 时长（秒）
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// 音频解码能力
///
/// 核心流程只依赖该 trait，具体解码库可替换。
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> AppResult<AudioSample>;
}

/// 按扩展名判断是否为支持的音频文件
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            AUDIO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}
