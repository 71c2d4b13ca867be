//! 偏移直方图投票匹配
//!
//! 对每条命中记录计算 `delta = 库内偏移 - 查询偏移`，按 (歌曲, delta) 计票。
//! 真正的匹配会让大量哈希集中在同一个 delta 上，偶然碰撞则分散在许多 delta 上，
//! 因此一首歌的得分取它所有 delta 中的最高票数。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use serde::Serialize;
use tracing::{debug, info};
use crate::config::MatchConfig;
use crate::error::AppResult;
use crate::fingerprint::{Fingerprint, HashCode};
use crate::store::FingerprintStore;

/// 单次识别的处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Idle,
    HashesExtracted,
    CandidatesRetrieved,
    Voted,
    Resolved,
}

impl fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchPhase::Idle => "idle",
            MatchPhase::HashesExtracted => "hashes-extracted",
            MatchPhase::CandidatesRetrieved => "candidates-retrieved",
            MatchPhase::Voted => "voted",
            MatchPhase::Resolved => "resolved",
        };
        f.write_str(name)
    }
}

/// 候选歌曲得分
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CandidateScore {
    pub song_id: String,
    pub label: String,
    /// 最大同偏移票数
    pub score: u32,
    /// 得票最多的 delta（帧）
    pub best_delta: i64,
    /// 该歌曲的全部命中数
    pub total_hits: u32,
}

/// 识别结果
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    pub song_id: Option<String>,
    pub label: Option<String>,
    /// 最佳歌曲的最大同偏移票数（未命中时为最佳候选的票数）
    pub score: u32,
    /// 查询片段在参考录音中的起始帧
    pub best_delta: i64,
    /// score / 查询哈希数
    pub confidence: f64,
    pub query_hashes: usize,
    pub candidates: Vec<CandidateScore>,
}

impl MatchResult {
    fn no_match(query_hashes: usize, candidates: Vec<CandidateScore>) -> Self {
        let (score, best_delta) = candidates
            .first()
            .map(|c| (c.score, c.best_delta))
            .unwrap_or((0, 0));
        Self {
            matched: false,
            song_id: None,
            label: None,
            score,
            best_delta,
            confidence: confidence(score, query_hashes),
            query_hashes,
            candidates,
        }
    }
}

fn confidence(score: u32, query_hashes: usize) -> f64 {
    if query_hashes == 0 {
        return 0.0;
    }
    (score as f64 / query_hashes as f64).min(1.0)
}

/// 每首歌的投票状态
#[derive(Default)]
struct SongVotes<'a> {
    deltas: HashMap<i64, u32>,
    labels: Vec<&'a str>,
    total_hits: u32,
}

/// 识别查询哈希
///
/// 单次遍历：提取哈希集合 -> 批量查询 -> 投票 -> 决出结果。不修改指纹库。
pub fn identify<S: FingerprintStore + ?Sized>(
    query: &[Fingerprint],
    store: &S,
    config: &MatchConfig,
) -> AppResult<MatchResult> {
    let mut phase = MatchPhase::Idle;
    debug!("[MATCH] 阶段: {}", phase);

    // 哈希 -> 查询偏移列表
    let mut query_offsets: HashMap<HashCode, Vec<u32>> = HashMap::new();
    for fp in query {
        query_offsets.entry(fp.hash).or_default().push(fp.offset);
    }
    let hashes: HashSet<HashCode> = query_offsets.keys().copied().collect();
    phase = advance(phase, MatchPhase::HashesExtracted);

    if hashes.is_empty() {
        info!("[MATCH] 查询没有任何哈希，未命中");
        advance(phase, MatchPhase::Resolved);
        return Ok(MatchResult::no_match(0, Vec::new()));
    }

    let records = store.query_batch(&hashes)?;
    phase = advance(phase, MatchPhase::CandidatesRetrieved);
    debug!("[MATCH] {} 个不同哈希命中 {} 条记录", hashes.len(), records.len());

    if records.is_empty() {
        info!("[MATCH] 指纹库中没有任何命中，未命中");
        advance(phase, MatchPhase::Resolved);
        return Ok(MatchResult::no_match(query.len(), Vec::new()));
    }

    let mut votes: HashMap<&str, SongVotes<'_>> = HashMap::new();
    for record in &records {
        let Some(offsets) = query_offsets.get(&record.hash) else {
            continue;
        };
        let song = votes.entry(record.song_id.as_str()).or_default();
        if !song.labels.contains(&record.label.as_str()) {
            song.labels.push(record.label.as_str());
        }
        for &query_offset in offsets {
            let delta = i64::from(record.offset) - i64::from(query_offset);
            *song.deltas.entry(delta).or_default() += 1;
            song.total_hits += 1;
        }
    }
    phase = advance(phase, MatchPhase::Voted);

    let ranked = rank_candidates(&votes);
    let winner = ranked.first().cloned();
    let candidates: Vec<CandidateScore> = ranked.into_iter().take(config.top_candidates.max(1)).collect();
    advance(phase, MatchPhase::Resolved);

    match winner {
        Some(best) if best.score >= config.min_votes => {
            info!(
                "[MATCH] 命中 {} ({}): {} 票, delta={} 帧",
                best.song_id, best.label, best.score, best.best_delta
            );
            Ok(MatchResult {
                matched: true,
                song_id: Some(best.song_id.clone()),
                label: Some(best.label.clone()),
                score: best.score,
                best_delta: best.best_delta,
                confidence: confidence(best.score, query.len()),
                query_hashes: query.len(),
                candidates,
            })
        }
        Some(best) => {
            info!(
                "[MATCH] 最佳候选 {} 仅 {} 票，低于阈值 {}，未命中",
                best.song_id, best.score, config.min_votes
            );
            Ok(MatchResult::no_match(query.len(), candidates))
        }
        None => Ok(MatchResult::no_match(query.len(), candidates)),
    }
}

/// 按 (得分降序, song_id 升序) 排列所有候选
///
/// 同一首歌内票数相同的 delta 取较小者；一首歌有多个 label 时取字典序最小者。
fn rank_candidates(votes: &HashMap<&str, SongVotes<'_>>) -> Vec<CandidateScore> {
    let mut ranked: Vec<CandidateScore> = votes
        .iter()
        .filter_map(|(song_id, song)| {
            // BTreeMap 保证 delta 升序，严格大于才替换即可得到最小 delta
            let ordered: BTreeMap<i64, u32> = song.deltas.iter().map(|(&d, &c)| (d, c)).collect();
            let (best_delta, score) = ordered
                .into_iter()
                .fold(None, |best: Option<(i64, u32)>, (delta, count)| match best {
                    Some((_, top)) if count <= top => best,
                    _ => Some((delta, count)),
                })?;
            let label = song.labels.iter().min().copied().unwrap_or_default();

            Some(CandidateScore {
                song_id: song_id.to_string(),
                label: label.to_string(),
                score,
                best_delta,
                total_hits: song.total_hits,
            })
        })
        .collect();

    ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.song_id.cmp(&b.song_id)));
    ranked
}

fn advance(from: MatchPhase, to: MatchPhase) -> MatchPhase {
    debug!("[MATCH] 阶段: {} -> {}", from, to);
    to
}
