// MusicMatch - 音频指纹识别工具
// 主入口文件

use std::path::PathBuf;
use std::process::ExitCode;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use musicmatch::commands::{self, EXIT_ERROR, EXIT_MATCH, EXIT_NO_MATCH};
use musicmatch::config::{load_config, AppConfig, LogLevel};
use musicmatch::error::AppResult;
use musicmatch::logging;

#[derive(Parser)]
#[command(name = "musicmatch", version, about = "音频指纹建库与识别")]
struct Cli {
    /// 配置文件路径（不存在时写入默认配置）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 日志文件目录，不指定时只输出到控制台
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// 输出 debug 日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 扫描歌曲文件夹，建立指纹库
    Builddb {
        /// 歌曲文件夹
        #[arg(short, long)]
        input: PathBuf,
        /// 指纹库文件
        #[arg(short, long)]
        output: PathBuf,
    },
    /// 识别一段录音
    Identify {
        /// 指纹库文件
        #[arg(short, long)]
        database: PathBuf,
        /// 待识别的音频文件
        #[arg(short, long)]
        input: PathBuf,
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
        /// 输出的候选数量
        #[arg(long)]
        top: Option<usize>,
    },
    /// 查看指纹库内容
    Inspect {
        /// 指纹库文件
        #[arg(short, long)]
        database: PathBuf,
        /// 打印的行数
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

fn resolve_config(cli: &Cli) -> AppResult<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    if cli.verbose {
        config.log_level = LogLevel::Debug;
    }
    Ok(config)
}

fn run(cli: Cli, mut config: AppConfig) -> AppResult<u8> {
    match cli.command {
        Command::Builddb { input, output } => {
            commands::builddb::run(&input, &output, &config)?;
            Ok(EXIT_MATCH)
        }
        Command::Identify { database, input, json, top } => {
            if let Some(top) = top {
                config.matching.top_candidates = top;
            }
            let result = commands::identify::run(&database, &input, &config, json)?;
            Ok(if result.matched { EXIT_MATCH } else { EXIT_NO_MATCH })
        }
        Command::Inspect { database, limit } => {
            commands::inspect::run(&database, limit, &config)?;
            Ok(EXIT_MATCH)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("加载配置失败: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    // guard 必须保持存活，否则异步日志线程会退出
    let _log_guard = logging::init_logging(cli.log_dir.as_deref(), &config.log_level);
    info!("[APP] MusicMatch v{} 启动", env!("CARGO_PKG_VERSION"));

    match run(cli, config) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("[APP] {}", e);
            eprintln!("错误: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
