use serde::{Deserialize, Serialize};

/// 全局时间基：微秒
pub const AV_TIME_BASE: i64 = 1_000_000;

/// 基本流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        }
    }
}

/// 时间基（有理数，每个 tick 为 num/den 秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// 流时间戳 → 全局微秒（四舍五入，等价于 av_rescale_q）
    pub fn to_micros(&self, ticks: i64) -> i64 {
        rescale(ticks, self.num as i64 * AV_TIME_BASE, self.den as i64)
    }

    /// 全局微秒 → 流时间戳
    pub fn from_micros(&self, micros: i64) -> i64 {
        rescale(micros, self.den as i64, self.num as i64 * AV_TIME_BASE)
    }
}

fn rescale(value: i64, mul: i64, div: i64) -> i64 {
    if div == 0 {
        return 0;
    }
    let n = value as i128 * mul as i128;
    let d = div as i128;
    let half = d.abs() / 2;
    let r = if (n >= 0) == (d > 0) {
        (n.abs() + half) / d.abs()
    } else {
        -((n.abs() + half) / d.abs())
    };
    r as i64
}

/// 解码器配置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderConfig {
    /// 是否使用硬件加速解码
    pub hardware: bool,
}

/// 流描述（初始化时创建，之后只读）
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    /// 容器内的流索引
    pub index: usize,
    pub kind: StreamKind,
    /// 编解码器标识（不透明，由后端解释）
    pub codec_id: String,
    pub time_base: TimeBase,
    pub decoder: DecoderConfig,
}

/// 压缩数据包（属于且仅属于一个流）
///
/// `payload` 对管线不透明，由具体的解封装/解码后端解释。
#[derive(Debug)]
pub struct CompressedUnit<P> {
    pub stream_index: usize,
    /// 显示时间戳（流时间基）
    pub pts: Option<i64>,
    pub payload: P,
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
}

/// 音频采样格式（交错存储）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    S16,
    #[default]
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// 视频帧数据（已转换为输出像素格式）
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pts: i64,           // 显示时间戳（微秒）
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,      // CPU 内存数据，紧密排列
}

/// 音频帧数据（已转换为交错输出格式）
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pts: i64,           // 播放时间戳（微秒）
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub data: Vec<u8>,      // 交错采样字节
}

impl AudioFrame {
    /// 每声道采样数
    pub fn samples(&self) -> usize {
        let frame_bytes = self.format.bytes_per_sample() * self.channels.max(1) as usize;
        self.data.len() / frame_bytes
    }

    /// 帧时长（微秒）
    pub fn duration_us(&self) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples() as i64 * AV_TIME_BASE / self.sample_rate as i64
    }

    /// 转换为 f32 采样（cpal 输出使用）
    pub fn to_f32(&self) -> Vec<f32> {
        match self.format {
            SampleFormat::F32 => bytemuck::pod_collect_to_vec::<u8, f32>(&self.data),
            SampleFormat::S16 => bytemuck::pod_collect_to_vec::<u8, i16>(&self.data)
                .into_iter()
                .map(|s| s as f32 / i16::MAX as f32)
                .collect(),
        }
    }
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Ready,
    Playing,
    Paused,
    Seeking,
    Finished,
    Stopped,
}

/// 媒体信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: i64,          // 总时长（微秒）
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// 缓冲状态信息（用于监控和调试）
#[derive(Debug, Clone, Default)]
pub struct BufferStatus {
    /// 视频数据包队列长度
    pub video_packets: usize,

    /// 音频数据包队列长度
    pub audio_packets: usize,
}
