//! 短时傅里叶分析
//!
//! 将单声道采样序列转换为 (帧, 频率桶) 的 dB 幅度矩阵。变换本身通过
//! [`Transform`] 抽象，默认实现基于 realfft。
//!
//! dB 以整段片段的最大幅度为参考，截断在 [`DYNAMIC_RANGE_DB`] 的动态范围内，
//! 再整体平移到 `[0, DYNAMIC_RANGE_DB]`：0 是片段的底噪线，最大值恒为
//! `DYNAMIC_RANGE_DB`。因此同一段音频无论音量大小，得到的矩阵相同。

use std::f32::consts::PI;
use realfft::RealFftPlanner;
use tracing::debug;
use crate::config::SpectrogramConfig;
use crate::error::{AppError, AppResult};

/// 相对片段最大幅度保留的动态范围（dB）
pub const DYNAMIC_RANGE_DB: f32 = 80.0;

/// 频域变换能力：返回每帧 `window_size / 2 + 1` 个线性幅度
pub trait Transform {
    fn magnitudes(&self, samples: &[f32], window_size: usize, hop_length: usize) -> AppResult<Vec<Vec<f32>>>;
}

/// 时频幅度矩阵（dB），按帧行优先存储
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    frames: usize,
    bins: usize,
    data: Vec<f32>,
}

impl Spectrogram {
    /// 从 dB 矩阵构建，形状不符时报错
    pub fn from_db(frames: usize, bins: usize, data: Vec<f32>) -> AppResult<Self> {
        if frames == 0 || bins == 0 {
            return Err(AppError::InvalidInput("频谱矩阵不能为空".to_string()));
        }
        if data.len() != frames * bins {
            return Err(AppError::InvalidInput(format!(
                "频谱矩阵形状不符: {}x{} 需要 {} 个值，实际 {} 个",
                frames, bins, frames * bins, data.len()
            )));
        }
        if data.iter().any(|v| v.is_nan()) {
            return Err(AppError::InvalidInput("频谱矩阵包含 NaN".to_string()));
        }
        Ok(Self { frames, bins, data })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    #[inline]
    pub fn get(&self, time: usize, freq: usize) -> f32 {
        self.data[time * self.bins + freq]
    }

    /// 单帧的全部频率桶
    pub fn frame(&self, time: usize) -> &[f32] {
        &self.data[time * self.bins..(time + 1) * self.bins]
    }

    /// 幅度最大值（dB）
    pub fn max_db(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }
}

/// 帧数 = ceil((len - window) / hop) + 1，至少为 1
pub fn frame_count(len: usize, window_size: usize, hop_length: usize) -> usize {
    if len <= window_size {
        1
    } else {
        (len - window_size + hop_length - 1) / hop_length + 1
    }
}

/// 基于 realfft 的实数 FFT，加 Hann 窗，末尾帧补零
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFftTransform;

impl Transform for RealFftTransform {
    fn magnitudes(&self, samples: &[f32], window_size: usize, hop_length: usize) -> AppResult<Vec<Vec<f32>>> {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(window_size);
        let window = hann_window(window_size);

        let mut input = fft.make_input_vec();
        let mut spectrum = fft.make_output_vec();

        let frames = frame_count(samples.len(), window_size, hop_length);
        let mut columns = Vec::with_capacity(frames);

        for index in 0..frames {
            let start = index * hop_length;
            let end = (start + window_size).min(samples.len());
            let available = end.saturating_sub(start);

            for (i, inp) in input.iter_mut().enumerate() {
                *inp = if i < available { samples[start + i] * window[i] } else { 0.0 };
            }

            fft.process(&mut input, &mut spectrum)
                .map_err(|e| AppError::InvalidInput(format!("FFT 失败: {}", e)))?;

            columns.push(spectrum.iter().map(|c| c.norm()).collect());
        }

        Ok(columns)
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    if size == 1 {
        return vec![1.0];
    }
    let n = size as f32;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (n - 1.0)).cos()))
        .collect()
}

/// 以 `reference` 为 0 dB 换算，低于动态范围的部分截断到底噪线 0
#[inline]
fn amplitude_to_db(magnitude: f32, reference: f32) -> f32 {
    if reference <= 0.0 {
        return 0.0;
    }
    let floor = 10f32.powf(-DYNAMIC_RANGE_DB / 20.0);
    (20.0 * (magnitude / reference).max(floor).log10() + DYNAMIC_RANGE_DB).max(0.0)
}

/// 使用默认变换构建频谱
pub fn build_spectrogram(samples: &[f32], sample_rate: u32, config: &SpectrogramConfig) -> AppResult<Spectrogram> {
    build_spectrogram_with(&RealFftTransform, samples, sample_rate, config)
}

/// 使用指定变换构建频谱
pub fn build_spectrogram_with<T: Transform + ?Sized>(
    transform: &T,
    samples: &[f32],
    sample_rate: u32,
    config: &SpectrogramConfig,
) -> AppResult<Spectrogram> {
    if samples.is_empty() {
        return Err(AppError::InvalidInput("采样序列为空".to_string()));
    }
    if sample_rate == 0 {
        return Err(AppError::InvalidInput("采样率必须大于 0".to_string()));
    }
    if samples.iter().any(|s| !s.is_finite()) {
        return Err(AppError::InvalidInput("采样序列包含非有限值".to_string()));
    }
    config.validate().map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let window_size = config.window_size;
    let hop_length = config.hop_length;
    let expected_frames = frame_count(samples.len(), window_size, hop_length);
    let bins = config.bins();

    let columns = transform.magnitudes(samples, window_size, hop_length)?;
    if columns.len() != expected_frames || columns.iter().any(|c| c.len() != bins) {
        return Err(AppError::InvalidInput(format!(
            "变换输出形状异常: 期望 {}x{}，实际 {} 帧",
            expected_frames, bins, columns.len()
        )));
    }

    let reference = columns
        .iter()
        .flat_map(|c| c.iter().copied())
        .fold(0.0f32, f32::max);

    let mut data = Vec::with_capacity(expected_frames * bins);
    for column in &columns {
        data.extend(column.iter().map(|&m| amplitude_to_db(m, reference)));
    }

    debug!(
        "[SPECTROGRAM] {} 个采样 @ {}Hz -> {} 帧 x {} 频率桶",
        samples.len(), sample_rate, expected_frames, bins
    );
    Spectrogram::from_db(expected_frames, bins, data)
}
