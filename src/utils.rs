// 工具模块

use std::path::Path;

/// 歌曲标识：去掉扩展名的文件名
pub fn song_id_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "未知".to_string())
}

/// 歌曲标签：带扩展名的文件名
pub fn label_from_path(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "未知".to_string())
}

/// 当前本地时间，用于报告
pub fn now_string() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
