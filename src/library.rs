// 曲库建库与识别流程
//
// 建库：rayon 线程池并行解码、提取指纹，结果经 crossbeam 通道交给调用线程串行写库。
// 单个文件失败只记录并跳过；写库失败则终止整个建库。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;
use crate::audio::{is_audio_file, AudioDecoder};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::fingerprint::{self, HashRecord};
use crate::matcher::{self, MatchResult};
use crate::store::FingerprintStore;
use crate::utils::{label_from_path, now_string, song_id_from_path};

/// 单个文件的失败信息
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BuildFailure {
    pub path: String,
    pub error: String,
}

/// 建库报告
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub started_at: String,
    /// 发现的音频文件数
    pub scanned: usize,
    /// 成功写入的歌曲数
    pub ingested: usize,
    /// 写入的哈希总数
    pub hashes: usize,
    pub failures: Vec<BuildFailure>,
    pub elapsed_secs: f64,
}

/// 扫描结果：音频文件与无法访问的目录项
#[derive(Debug, Clone, Default)]
pub struct AudioScan {
    pub files: Vec<PathBuf>,
    pub failures: Vec<BuildFailure>,
}

/// 递归收集文件夹下的音频文件，按路径排序
///
/// 跟随符号链接；无法读取的目录项（权限不足、链接成环等）记入 `failures`，不中断扫描。
pub fn collect_audio_files(folder: &Path) -> AppResult<AudioScan> {
    if !folder.is_dir() {
        return Err(AppError::NotFound(format!("文件夹不存在: {}", folder.display())));
    }

    let mut scan = AudioScan::default();
    for entry in WalkDir::new(folder).follow_links(true) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && is_audio_file(entry.path()) {
                    scan.files.push(entry.into_path());
                }
            }
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|| folder.to_string_lossy().to_string());
                warn!("[BUILD] 无法访问 {}: {}", path, e);
                scan.failures.push(BuildFailure { path, error: e.to_string() });
            }
        }
    }
    scan.files.sort();

    debug!(
        "[BUILD] 在 {:?} 中发现 {} 个音频文件，{} 个目录项无法访问",
        folder, scan.files.len(), scan.failures.len()
    );
    Ok(scan)
}

/// 解码并提取单个文件的指纹
pub fn fingerprint_file<D: AudioDecoder + ?Sized>(
    path: &Path,
    decoder: &D,
    config: &AppConfig,
) -> AppResult<Vec<HashRecord>> {
    let audio = decoder.decode(path)?;
    let song_id = song_id_from_path(path);
    let label = label_from_path(path);
    fingerprint::fingerprint_song(&audio.samples, audio.sample_rate, config, &song_id, &label)
}

/// 对文件夹中的全部音频建库
pub fn build_database<S, D>(
    folder: &Path,
    store: &mut S,
    decoder: &D,
    config: &AppConfig,
) -> AppResult<BuildReport>
where
    S: FingerprintStore + ?Sized,
    D: AudioDecoder + ?Sized,
{
    let started = Instant::now();
    let mut report = BuildReport {
        started_at: now_string(),
        scanned: 0,
        ingested: 0,
        hashes: 0,
        failures: Vec::new(),
        elapsed_secs: 0.0,
    };

    config.validate()?;
    let AudioScan { files, failures } = collect_audio_files(folder)?;
    report.scanned = files.len();
    report.failures = failures;
    if files.is_empty() {
        warn!("[BUILD] {:?} 中没有音频文件", folder);
        return Ok(report);
    }

    let workers = config.worker_count();
    info!("[BUILD] 开始处理 {} 个文件，{} 个线程", files.len(), workers);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| AppError::Config(format!("创建线程池失败: {}", e)))?;

    let abort = AtomicBool::new(false);
    let (tx, rx) = crossbeam_channel::bounded::<(PathBuf, AppResult<Vec<HashRecord>>)>(workers * 2);

    let outcome = std::thread::scope(|scope| {
        let files = &files;
        let abort = &abort;
        let pool = &pool;

        scope.spawn(move || {
            pool.install(|| {
                files.par_iter().for_each_with(tx, |tx, path| {
                    if abort.load(Ordering::Relaxed) {
                        return;
                    }
                    let result = fingerprint_file(path, decoder, config);
                    // 接收端已关闭说明写库失败，剩余文件直接丢弃
                    let _ = tx.send((path.clone(), result));
                });
            });
        });

        // 串行写库
        for (path, result) in rx {
            match result {
                Ok(records) => {
                    if records.is_empty() {
                        warn!("[BUILD] {:?} 没有提取到任何哈希", path);
                    }
                    match store.insert_batch(&records) {
                        Ok(count) => {
                            report.ingested += 1;
                            report.hashes += count;
                            info!("[BUILD] 已写入 {:?}: {} 个哈希", path, count);
                        }
                        Err(e) => {
                            error!("[BUILD] 写入 {:?} 失败，终止建库: {}", path, e);
                            abort.store(true, Ordering::Relaxed);
                            return Err(e);
                        }
                    }
                }
                Err(e) if !e.is_per_file() => {
                    error!("[BUILD] 处理 {:?} 失败，终止建库: {}", path, e);
                    abort.store(true, Ordering::Relaxed);
                    return Err(e);
                }
                Err(e) => {
                    warn!("[BUILD] 跳过 {:?}: {}", path, e);
                    report.failures.push(BuildFailure {
                        path: path.to_string_lossy().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    });
    outcome?;

    report.failures.sort_by(|a, b| a.path.cmp(&b.path));
    report.elapsed_secs = started.elapsed().as_secs_f64();
    info!(
        "[BUILD] 完成: {}/{} 个文件, {} 个哈希, {} 个失败, 耗时 {:.2}s",
        report.ingested, report.scanned, report.hashes, report.failures.len(), report.elapsed_secs
    );
    Ok(report)
}

/// 识别单个音频文件
pub fn identify_file<S, D>(
    path: &Path,
    store: &S,
    decoder: &D,
    config: &AppConfig,
) -> AppResult<MatchResult>
where
    S: FingerprintStore + ?Sized,
    D: AudioDecoder + ?Sized,
{
    config.validate()?;
    let audio = decoder.decode(path)?;
    info!("[MATCH] 识别 {:?} ({:.1}s)", path, audio.duration_secs());
    let query = fingerprint::fingerprint_samples(&audio.samples, audio.sample_rate, config)?;
    matcher::identify(&query, store, &config.matching)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use crate::audio::AudioSample;
    use crate::fingerprint::HashCode;
    use crate::store::MemoryStore;

    /// 按文件名合成音频，文件名含 broken 时解码失败
    struct SyntheticDecoder;

    impl AudioDecoder for SyntheticDecoder {
        fn decode(&self, path: &Path) -> AppResult<AudioSample> {
            let name = label_from_path(path);
            if name.contains("broken") {
                return Err(AppError::InvalidInput(format!("损坏的文件: {}", name)));
            }
            let base = 200.0 + 40.0 * (name.len() % 9) as f32;
            let samples = (0..22050 * 2)
                .map(|i| {
                    let t = i as f32 / 22050.0;
                    let freq = base + 120.0 * ((t / 0.2) as usize % 5) as f32;
                    0.4 * (2.0 * std::f32::consts::PI * freq * t).sin()
                })
                .collect();
            Ok(AudioSample::new(samples, 22050))
        }
    }

    fn test_config() -> AppConfig {
        AppConfig { workers: 2, ..AppConfig::default() }
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_collect_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        touch(dir.path(), "b.mp3");
        touch(dir.path(), "a.wav");
        touch(dir.path(), "notes.txt");
        touch(&dir.path().join("sub"), "c.flac");

        let scan = collect_audio_files(dir.path()).unwrap();
        assert!(scan.failures.is_empty());
        let names: Vec<String> = scan.files.iter().map(|p| label_from_path(p)).collect();
        assert_eq!(names, vec!["a.wav", "b.mp3", "c.flac"]);
    }

    #[test]
    fn test_collect_missing_folder() {
        let dir = tempfile::tempdir().unwrap();
        let result = collect_audio_files(&dir.path().join("missing"));
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_entries_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        touch(dir.path(), "alpha.wav");
        // 指回上级目录的链接构成环
        std::os::unix::fs::symlink(dir.path(), sub.join("loop")).unwrap();

        let scan = collect_audio_files(dir.path()).unwrap();
        assert_eq!(scan.files.len(), 1);
        assert_eq!(scan.failures.len(), 1);
        assert!(scan.failures[0].path.ends_with("loop"));

        let mut store = MemoryStore::new();
        let report = build_database(dir.path(), &mut store, &SyntheticDecoder, &test_config()).unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.ingested, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("loop"));
    }

    #[test]
    fn test_build_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "alpha.wav");
        touch(dir.path(), "broken.mp3");
        touch(dir.path(), "gamma_long_name.wav");

        let mut store = MemoryStore::new();
        let report = build_database(dir.path(), &mut store, &SyntheticDecoder, &test_config()).unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.ingested, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("broken.mp3"));
        assert_eq!(report.hashes, store.len());
        assert!(store.len() > 0);
    }

    #[test]
    fn test_build_empty_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new();
        let report = build_database(dir.path(), &mut store, &SyntheticDecoder, &test_config()).unwrap();
        assert_eq!(report.scanned, 0);
        assert!(store.is_empty());
    }

    struct FailingStore;

    impl FingerprintStore for FailingStore {
        fn insert(&mut self, _: &HashRecord) -> AppResult<()> {
            Err(AppError::StoreUnavailable(rusqlite::Error::InvalidQuery))
        }

        fn query_batch(&self, _: &HashSet<HashCode>) -> AppResult<Vec<HashRecord>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_build_aborts_on_store_failure() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..6 {
            touch(dir.path(), &format!("song{}.wav", i));
        }
        let result = build_database(dir.path(), &mut FailingStore, &SyntheticDecoder, &test_config());
        assert!(matches!(result, Err(AppError::StoreUnavailable(_))));
    }

    #[test]
    fn test_build_aborts_on_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "alpha.wav");
        let mut config = test_config();
        config.spectrogram.hop_length = 0;

        let mut store = MemoryStore::new();
        let result = build_database(dir.path(), &mut store, &SyntheticDecoder, &config);
        assert!(matches!(result, Err(AppError::Config(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_identify_rejects_oversized_query_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.matching.query_chunk_size = crate::config::MAX_QUERY_CHUNK + 1;

        let store = MemoryStore::new();
        let result = identify_file(&dir.path().join("alpha.wav"), &store, &SyntheticDecoder, &config);
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_identify_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "alpha.wav");
        touch(dir.path(), "gamma_long_name.wav");

        let config = test_config();
        let mut store = MemoryStore::new();
        build_database(dir.path(), &mut store, &SyntheticDecoder, &config).unwrap();

        let result = identify_file(&dir.path().join("alpha.wav"), &store, &SyntheticDecoder, &config).unwrap();
        assert!(result.matched);
        assert_eq!(result.song_id.as_deref(), Some("alpha"));
        assert_eq!(result.label.as_deref(), Some("alpha.wav"));
        assert_eq!(result.best_delta, 0);
    }
}
