// 错误处理模块

use thiserror::Error;
use serde::Serialize;

#[derive(Error, Debug)]
pub enum AppError {
    /// 空样本、损坏的音频数据、非法采样率
    #[error("无效输入: {0}")]
    InvalidInput(String),

    /// 指纹库读写失败（不可用、I/O 错误）
    #[error("存储不可用: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("未找到: {0}")]
    NotFound(String),
}

impl AppError {
    /// 是否只影响单个文件（批量建库时跳过该文件继续处理）
    pub fn is_per_file(&self) -> bool {
        matches!(self, AppError::InvalidInput(_) | AppError::Io(_) | AppError::NotFound(_))
    }
}

// 实现 Serialize 以便在 JSON 报告中输出错误
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
