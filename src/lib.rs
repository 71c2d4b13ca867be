// MusicMatch - 音频指纹识别
//
// 频谱峰值星座图 + 组合哈希 + 时间偏移投票。

pub mod audio;
pub mod commands;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod library;
pub mod logging;
pub mod matcher;
pub mod store;
pub mod utils;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use matcher::MatchResult;
