// 命令模块
//
// 每个子命令对应一个文件，负责组装组件并把结果打印到 stdout；日志走 stderr。

pub mod builddb;
pub mod identify;
pub mod inspect;

/// 识别命中
pub const EXIT_MATCH: u8 = 0;
/// 识别未命中
pub const EXIT_NO_MATCH: u8 = 1;
/// 任何错误
pub const EXIT_ERROR: u8 = 2;
