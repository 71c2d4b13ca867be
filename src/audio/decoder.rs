// 音频解码模块
//
// 使用 symphonia 解码任意支持的容器格式，下混为单声道后用 rubato 重采样到目标采样率。

use std::fs::File;
use std::path::Path;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, warn};
use crate::audio::{AudioDecoder, AudioSample};
use crate::error::{AppError, AppResult};

/// 重采样分块大小
const RESAMPLE_CHUNK: usize = 1024;

/// 基于 symphonia 的解码器
#[derive(Debug, Clone)]
pub struct SymphoniaDecoder {
    target_sample_rate: u32,
}

impl SymphoniaDecoder {
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, path: &Path) -> AppResult<AudioSample> {
        debug!("[DECODE] 解码: {:?}", path);
        let (interleaved, sample_rate, channels) = decode_file(path)?;
        let mono = to_mono(&interleaved, channels);
        let samples = resample(&mono, sample_rate, self.target_sample_rate)?;

        debug!(
            "[DECODE] 完成: {:?}, 原始 {}Hz/{}ch, 输出 {} 个采样 @ {}Hz",
            path, sample_rate, channels, samples.len(), self.target_sample_rate
        );
        Ok(AudioSample::new(samples, self.target_sample_rate))
    }
}

/// 解码为交错采样，返回 (采样, 采样率, 声道数)
fn decode_file(path: &Path) -> AppResult<(Vec<f32>, u32, usize)> {
    let file = File::open(path)?;
    let media_source_stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, media_source_stream, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AppError::InvalidInput(format!("无法识别的音频格式 {:?}: {}", path, e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AppError::InvalidInput(format!("没有可解码的音轨: {:?}", path)))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AppError::InvalidInput(format!("不支持的编码 {:?}: {}", path, e)))?;

    let mut samples = Vec::new();
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(AppError::InvalidInput(format!("读取音频包失败 {:?}: {}", path, e)));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                // 单个损坏的包跳过即可
                warn!("[DECODE] 跳过损坏的音频包 {:?}: {}", path, msg);
                continue;
            }
            Err(e) => {
                return Err(AppError::InvalidInput(format!("解码失败 {:?}: {}", path, e)));
            }
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count();

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if samples.is_empty() || sample_rate == 0 || channels == 0 {
        return Err(AppError::InvalidInput(format!("音频文件不含有效采样: {:?}", path)));
    }

    Ok((samples, sample_rate, channels))
}

/// 交错多声道取平均下混为单声道
pub(crate) fn to_mono(input: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return input.to_vec();
    }
    input
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// 重采样到目标采样率，输出长度为 ceil(len * ratio)，已去除滤波器延迟
pub(crate) fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> AppResult<Vec<f32>> {
    if input_rate == 0 || output_rate == 0 {
        return Err(AppError::InvalidInput("采样率必须大于 0".to_string()));
    }
    if input_rate == output_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    let ratio = output_rate as f64 / input_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| AppError::InvalidInput(format!("创建重采样器失败: {}", e)))?;

    let expected = (input.len() as f64 * ratio).ceil() as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut position = 0;
    let mut chunk = vec![0.0f32; RESAMPLE_CHUNK];
    // 输入耗尽后继续送入静音，把滤波器中残留的尾部推出来
    while output.len() < expected + delay {
        chunk.iter_mut().for_each(|s| *s = 0.0);
        if position < input.len() {
            let end = (position + RESAMPLE_CHUNK).min(input.len());
            chunk[..end - position].copy_from_slice(&input[position..end]);
            position = end;
        }

        let result = resampler
            .process(&[chunk.as_slice()], None)
            .map_err(|e| AppError::InvalidInput(format!("重采样失败: {}", e)))?;
        output.extend_from_slice(&result[0]);
    }

    Ok(output[delay..delay + expected].to_vec())
}
