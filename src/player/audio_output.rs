use crate::core::{AudioFrame, PlayerError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use crossbeam::queue::SegQueue;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// 设备不支持请求的配置时依次尝试的标准配置
const FALLBACK_CONFIGS: [(u32, u16); 4] = [(48000, 2), (44100, 2), (48000, 1), (44100, 1)];

/// 音频输出 - 使用 cpal 播放音频
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    buffer: Arc<SegQueue<f32>>,
    volume: Arc<Mutex<f32>>,
}

// cpal::Stream 本身不是 Send，AudioOutput 只在创建它的线程里启动/停止，
// 解码线程通过 AudioWriter 写入采样
unsafe impl Send for AudioOutput {}

impl AudioOutput {
    /// 创建音频输出（设备不支持时回退到标准配置）
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        info!("初始化音频输出: {} Hz, {} 声道", sample_rate, channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let requested = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let config = if Self::device_supports(&device, &requested)? {
            requested
        } else {
            warn!("⚠️  音频设备不支持 {} Hz, {} 声道配置，回退到标准配置", sample_rate, channels);
            let mut chosen = None;
            for (fb_rate, fb_channels) in FALLBACK_CONFIGS {
                let fb_config = StreamConfig {
                    channels: fb_channels,
                    sample_rate: cpal::SampleRate(fb_rate),
                    buffer_size: cpal::BufferSize::Default,
                };
                if Self::device_supports(&device, &fb_config)? {
                    info!("✅ 使用回退配置: {} Hz, {} 声道", fb_rate, fb_channels);
                    chosen = Some(fb_config);
                    break;
                }
            }
            chosen.ok_or_else(|| {
                PlayerError::AudioError(format!(
                    "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
                    sample_rate, channels
                ))
            })?
        };

        Ok(Self {
            device,
            config,
            stream: None,
            buffer: Arc::new(SegQueue::new()),
            volume: Arc::new(Mutex::new(1.0)),
        })
    }

    fn device_supports(device: &Device, config: &StreamConfig) -> Result<bool> {
        let supported = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?;
        Ok(supported
            .into_iter()
            .any(|range| Self::is_config_compatible(config, &range)))
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;
        rate_in_range && config.channels == supported.channels()
    }

    /// 开始播放
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = self.buffer.clone();
        let volume = self.volume.clone();

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let vol = *volume.lock();
                    for sample in data.iter_mut() {
                        *sample = buffer.pop().map_or(0.0, |value| value * vol);
                    }
                },
                move |err| {
                    error!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

        self.stream = Some(stream);
        info!("音频输出已启动");
        Ok(())
    }

    /// 停止播放
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            info!("音频输出已停止");
        }
    }

    /// 解码线程用来写采样的句柄
    pub fn writer(&self) -> AudioWriter {
        AudioWriter {
            buffer: self.buffer.clone(),
            volume: self.volume.clone(),
        }
    }

    /// 获取实际使用的音频配置 (采样率, 声道数)
    pub fn get_config(&self) -> (u32, u16) {
        (self.config.sample_rate.0, self.config.channels)
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 写入端：可以跨线程克隆
#[derive(Clone)]
pub struct AudioWriter {
    buffer: Arc<SegQueue<f32>>,
    volume: Arc<Mutex<f32>>,
}

impl AudioWriter {
    /// 写入音频帧（转换为 f32 交错采样）
    pub fn write_frame(&self, frame: &AudioFrame) {
        for sample in frame.to_f32() {
            self.buffer.push(sample);
        }
    }

    /// 设置音量 (0.0 - 1.0)
    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume.clamp(0.0, 1.0);
    }

    /// 缓冲区里尚未播放的采样数
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// 清空缓冲区（Seek、恢复播放后丢掉旧声音）
    pub fn clear(&self) {
        while self.buffer.pop().is_some() {}
    }
}
