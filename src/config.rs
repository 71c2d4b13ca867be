// 配置管理模块
//
// 所有可调参数集中在 AppConfig 中，以 JSON 持久化，显式传入各组件。

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::fs;
use crate::error::{AppError, AppResult};
use tracing::{info, warn};

/// 日志级别
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    /// 转换为 tracing 过滤器字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// 时频分析配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpectrogramConfig {
    /// 窗长（采样点），决定频率分辨率
    pub window_size: usize,
    /// 帧移（采样点），不得大于窗长
    pub hop_length: usize,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            window_size: 2048,
            hop_length: 512,
        }
    }
}

impl SpectrogramConfig {
    /// 每帧对应的频率桶数量
    pub fn bins(&self) -> usize {
        self.window_size / 2 + 1
    }

    /// 帧索引换算为秒
    pub fn frames_to_seconds(&self, frames: i64, sample_rate: u32) -> f64 {
        frames as f64 * self.hop_length as f64 / sample_rate as f64
    }
}

/// 峰值检测配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PeakConfig {
    /// dB 下限，低于此值的点不可能成为峰值
    pub threshold: f32,
    /// 时间方向邻域半径（帧）
    pub time_radius: usize,
    /// 频率方向邻域半径（频率桶）
    pub freq_radius: usize,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            threshold: 20.0,
            time_radius: 3,
            freq_radius: 3,
        }
    }
}

/// 哈希生成与量化配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HashConfig {
    /// 每个峰值向后配对的峰值数量
    pub fan_value: usize,
    /// 单个频率桶占用的位数，超出范围的频率桶被截断到最大值
    pub freq_bits: u32,
    /// 时间差占用的位数
    pub delta_bits: u32,
    /// 时间差上限（帧），更大的时间差被截断到该值
    pub max_delta: u32,
    /// 时间差量化步长（帧），相近的时间差落入同一个桶
    pub delta_step: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            fan_value: 15,
            freq_bits: 12,
            delta_bits: 8,
            max_delta: 200,
            delta_step: 1,
        }
    }
}

/// SQLite 单条语句绑定参数上限（SQLITE_MAX_VARIABLE_NUMBER）
pub const MAX_QUERY_CHUNK: usize = 32766;

/// 匹配配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatchConfig {
    /// 判定为命中所需的最少同偏移投票数
    pub min_votes: u32,
    /// 结果中保留的候选歌曲数量
    pub top_candidates: usize,
    /// 单条 SQL 查询中 IN 子句的最大哈希数量
    pub query_chunk_size: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_votes: 5,
            top_candidates: 5,
            query_chunk_size: 500,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// 解码后统一重采样到的采样率
    pub target_sample_rate: u32,
    /// 建库并行线程数，0 表示使用全部 CPU
    pub workers: usize,
    pub spectrogram: SpectrogramConfig,
    pub peaks: PeakConfig,
    pub hashing: HashConfig,
    pub matching: MatchConfig,
    /// 日志级别
    pub log_level: LogLevel,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 22050,
            workers: 0,
            spectrogram: SpectrogramConfig::default(),
            peaks: PeakConfig::default(),
            hashing: HashConfig::default(),
            matching: MatchConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl AppConfig {
    /// 实际使用的线程数
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }

    /// 校验参数组合
    pub fn validate(&self) -> AppResult<()> {
        if self.target_sample_rate == 0 {
            return Err(AppError::Config("target_sample_rate 必须大于 0".to_string()));
        }
        self.spectrogram.validate()?;
        self.hashing.validate()?;
        if self.matching.query_chunk_size == 0 || self.matching.query_chunk_size > MAX_QUERY_CHUNK {
            return Err(AppError::Config(format!(
                "query_chunk_size 必须在 1..={} 之间，当前为 {}",
                MAX_QUERY_CHUNK, self.matching.query_chunk_size
            )));
        }
        Ok(())
    }
}

impl SpectrogramConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.window_size == 0 {
            return Err(AppError::Config("window_size 必须大于 0".to_string()));
        }
        if self.hop_length == 0 || self.hop_length > self.window_size {
            return Err(AppError::Config(format!(
                "hop_length 必须在 1..={} 之间，当前为 {}",
                self.window_size, self.hop_length
            )));
        }
        Ok(())
    }
}

impl HashConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.fan_value == 0 {
            return Err(AppError::Config("fan_value 必须大于 0".to_string()));
        }
        if self.delta_step == 0 {
            return Err(AppError::Config("delta_step 必须大于 0".to_string()));
        }
        if self.freq_bits == 0 || self.delta_bits == 0 {
            return Err(AppError::Config("freq_bits 与 delta_bits 必须大于 0".to_string()));
        }
        let total_bits = self.freq_bits.saturating_mul(2).saturating_add(self.delta_bits);
        if total_bits > 64 {
            return Err(AppError::Config(format!(
                "哈希总位数 {} 超过 64 位", total_bits
            )));
        }
        // delta_bits < 64 已由上面的总位数保证
        let max_bucket = u64::from(self.max_delta / self.delta_step);
        if max_bucket >= (1u64 << self.delta_bits) {
            return Err(AppError::Config(format!(
                "max_delta / delta_step = {} 无法放入 {} 位",
                max_bucket, self.delta_bits
            )));
        }
        Ok(())
    }
}

/// 加载配置文件
///
/// 文件不存在时写入默认配置并返回；文件存在但解析失败时返回错误。
pub fn load_config(config_path: &Path) -> AppResult<AppConfig> {
    let config = if config_path.exists() {
        let content = fs::read_to_string(config_path)?;
        serde_json::from_str::<AppConfig>(&content).map_err(|e| {
            warn!("[CONFIG] 配置文件 JSON 解析失败: {}", e);
            AppError::Config(format!("{}: {}", config_path.display(), e))
        })?
    } else {
        let config = AppConfig::default();
        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&config)?;
        fs::write(config_path, content)?;
        info!("[CONFIG] 已写入默认配置: {:?}", config_path);
        config
    };

    config.validate()?;
    info!("[CONFIG] 配置已加载");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.spectrogram.window_size, 2048);
        assert_eq!(config.spectrogram.hop_length, 512);
        assert_eq!(config.peaks.threshold, 20.0);
        assert_eq!((config.peaks.time_radius, config.peaks.freq_radius), (3, 3));
        assert_eq!(config.hashing.fan_value, 15);
        assert_eq!(config.spectrogram.bins(), 1025);
    }

    #[test]
    fn test_rejects_hop_longer_than_window() {
        let mut config = AppConfig::default();
        config.spectrogram.hop_length = 4096;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        config.spectrogram.hop_length = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_rejects_oversized_hash_layout() {
        let mut hashing = HashConfig::default();
        hashing.freq_bits = 30;
        hashing.delta_bits = 8;
        assert!(hashing.validate().is_err());

        let mut hashing = HashConfig::default();
        hashing.max_delta = 256;
        assert!(hashing.validate().is_err());

        // 步长放大后同样的上限可以放下
        hashing.delta_step = 2;
        assert!(hashing.validate().is_ok());
    }

    #[test]
    fn test_query_chunk_size_bounds() {
        let mut config = AppConfig::default();
        config.matching.query_chunk_size = MAX_QUERY_CHUNK;
        assert!(config.validate().is_ok());

        config.matching.query_chunk_size = MAX_QUERY_CHUNK + 1;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        config.matching.query_chunk_size = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_fan_value() {
        let mut hashing = HashConfig::default();
        hashing.fan_value = 0;
        assert!(hashing.validate().is_err());
    }

    #[test]
    fn test_load_writes_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = load_config(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        // 再次加载读取同一份文件
        let again = load_config(&path).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "peaks": { "threshold": 30.0 }, "log_level": "debug" }"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.peaks.threshold, 30.0);
        assert_eq!(config.peaks.time_radius, 3);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.hashing, HashConfig::default());
    }

    #[test]
    fn test_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config(&path), Err(AppError::Config(_))));
    }

    #[test]
    fn test_frames_to_seconds() {
        let config = SpectrogramConfig::default();
        let secs = config.frames_to_seconds(43, 22050);
        assert!((secs - 43.0 * 512.0 / 22050.0).abs() < 1e-9);
    }
}
