use crate::core::{PlayerError, Result, SampleFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 硬件加速设备类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwDeviceKind {
    #[default]
    Cuda,           // NVIDIA CUDA
    D3D11VA,        // Windows Direct3D 11
    DXVA2,          // Windows DirectX Video Acceleration 2
    VAAPI,          // Linux Video Acceleration API
    VideoToolbox,   // macOS VideoToolbox
    QSV,            // Intel Quick Sync Video
}

impl HwDeviceKind {
    pub fn name(&self) -> &'static str {
        match self {
            HwDeviceKind::Cuda => "CUDA",
            HwDeviceKind::D3D11VA => "D3D11VA",
            HwDeviceKind::DXVA2 => "DXVA2",
            HwDeviceKind::VAAPI => "VAAPI",
            HwDeviceKind::VideoToolbox => "VideoToolbox",
            HwDeviceKind::QSV => "QSV",
        }
    }
}

/// 音频输出格式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioOutputConfig {
    pub sample_format: SampleFormat,
    /// 重采样目标采样率，None 表示保持源采样率
    pub sample_rate: Option<u32>,
    pub channels: u16,
}

impl Default for AudioOutputConfig {
    fn default() -> Self {
        Self {
            sample_format: SampleFormat::F32,
            sample_rate: None,
            channels: 2, // 默认立体声
        }
    }
}

/// 播放管线配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 视频包队列上限
    pub video_queue_capacity: usize,
    /// 音频包队列上限（音频包小、频率高，给更多余量）
    pub audio_queue_capacity: usize,
    /// 空队列等待粒度（毫秒）
    pub pop_wait_ms: u64,
    /// 同步等待单次最长睡眠（毫秒）
    pub pacing_slice_ms: u64,
    /// 文件末尾后 Demuxer 的轮询间隔（毫秒）
    pub eof_poll_ms: u64,
    /// 视频跟随音频时，音频时间戳最多允许落后主时钟多久（毫秒）
    pub audio_stall_ms: u64,
    pub require_video: bool,
    pub require_audio: bool,
    pub hw_device: HwDeviceKind,
    pub audio_output: AudioOutputConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video_queue_capacity: 500,
            audio_queue_capacity: 1000,
            pop_wait_ms: 1,
            pacing_slice_ms: 5,
            eof_poll_ms: 100,
            audio_stall_ms: 500,
            require_video: true,
            require_audio: false,
            hw_device: HwDeviceKind::default(),
            audio_output: AudioOutputConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// 从 JSON 字符串解析（缺省字段使用默认值）
    pub fn from_json(text: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.video_queue_capacity == 0 || self.audio_queue_capacity == 0 {
            return Err(PlayerError::InvalidConfig("队列容量必须大于 0".to_string()));
        }
        if self.pop_wait_ms == 0 || self.pacing_slice_ms == 0 || self.eof_poll_ms == 0 {
            return Err(PlayerError::InvalidConfig("等待间隔必须大于 0".to_string()));
        }
        if self.audio_output.channels == 0 {
            return Err(PlayerError::InvalidConfig("输出声道数必须大于 0".to_string()));
        }
        Ok(())
    }

    pub fn pop_wait(&self) -> Duration {
        Duration::from_millis(self.pop_wait_ms)
    }

    pub fn pacing_slice(&self) -> Duration {
        Duration::from_millis(self.pacing_slice_ms)
    }

    pub fn eof_poll(&self) -> Duration {
        Duration::from_millis(self.eof_poll_ms)
    }

    pub fn audio_stall_us(&self) -> i64 {
        self.audio_stall_ms as i64 * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_queue_bounds() {
        let config = PipelineConfig::default();
        assert_eq!(config.video_queue_capacity, 500);
        assert_eq!(config.audio_queue_capacity, 1000);
        assert_eq!(config.pacing_slice(), Duration::from_millis(5));
        assert_eq!(config.pop_wait(), Duration::from_millis(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json(
            r#"{ "video_queue_capacity": 64, "hw_device": "vaapi", "audio_output": { "sample_format": "s16" } }"#,
        )
        .unwrap();
        assert_eq!(config.video_queue_capacity, 64);
        assert_eq!(config.audio_queue_capacity, 1000);
        assert_eq!(config.hw_device, HwDeviceKind::VAAPI);
        assert_eq!(config.audio_output.sample_format, SampleFormat::S16);
        assert_eq!(config.audio_output.channels, 2);
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = PipelineConfig::from_json(r#"{ "audio_queue_capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, PlayerError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = PipelineConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, PlayerError::ConfigError(_)));
    }
}
