//! 解码后端与呈现端的接口。
//!
//! 管线只依赖这里的 trait：解封装、解码、格式转换由后端实现（FFmpeg 或测试用的脚本后端），
//! 画面与声音交给 [`PresentationSink`]。

use crate::core::{AudioFrame, CompressedUnit, PipelineConfig, Result, StreamDescriptor, VideoFrame};
use crate::player::demuxer_source::DemuxerSource;

/// 解码器输出的原始帧
pub trait DecodedFrame: Send {
    /// 帧时间戳（流时间基），没有则为 None
    fn pts(&self) -> Option<i64>;
}

/// 单个基本流的解码器
///
/// 一次 `submit` 可能产出零个或多个帧，解码器内部缓存若干包是正常现象。
pub trait StreamDecoder: Send {
    type Packet;
    type Frame: DecodedFrame;

    /// 送入一个压缩包
    fn submit(&mut self, unit: &CompressedUnit<Self::Packet>) -> Result<()>;

    /// 通知输入结束，之后 `receive` 吐出剩余的缓存帧
    fn send_eof(&mut self) -> Result<()>;

    /// 取一个解码帧；Ok(None) 表示需要更多输入（EAGAIN）或已取空
    fn receive(&mut self) -> Result<Option<Self::Frame>>;

    /// 清空解码器内部缓存（Seek 后调用）
    fn flush(&mut self);

    fn info(&self) -> String {
        "软件解码".to_string()
    }
}

/// 原始帧 → 呈现格式（RGBA / 交错采样）
pub trait FrameConverter<F>: Send {
    type Output: Presentable;

    fn convert(&mut self, frame: F, pts_us: i64) -> Result<Self::Output>;
}

/// 呈现端：接收转换好的画面和声音
pub trait PresentationSink: Send + Sync {
    fn on_video_frame(&self, frame: VideoFrame);

    fn on_audio_samples(&self, frame: AudioFrame);

    /// 丢弃设备里尚未播放的旧音频（恢复播放、Seek 后调用）
    fn audio_reset(&self) {}
}

/// 可以交给呈现端的帧
pub trait Presentable: Send {
    fn present(self, sink: &dyn PresentationSink);
}

impl Presentable for VideoFrame {
    fn present(self, sink: &dyn PresentationSink) {
        sink.on_video_frame(self);
    }
}

impl Presentable for AudioFrame {
    fn present(self, sink: &dyn PresentationSink) {
        sink.on_audio_samples(self);
    }
}

/// 媒体后端：打开容器并为选中的流创建解码器和转换器
pub trait MediaBackend: Send + Sync + 'static {
    type Packet: Send + 'static;
    type Demuxer: DemuxerSource<Packet = Self::Packet> + 'static;
    type VideoDecoder: StreamDecoder<Packet = Self::Packet> + 'static;
    type AudioDecoder: StreamDecoder<Packet = Self::Packet> + 'static;
    type VideoConverter: FrameConverter<<Self::VideoDecoder as StreamDecoder>::Frame, Output = VideoFrame>
        + 'static;
    type AudioConverter: FrameConverter<<Self::AudioDecoder as StreamDecoder>::Frame, Output = AudioFrame>
        + 'static;

    fn open(&self, uri: &str) -> Result<Self::Demuxer>;

    /// 创建视频解码器；`stream.decoder.hardware` 为真时硬件上下文创建失败必须返回错误
    fn open_video(
        &self,
        demuxer: &Self::Demuxer,
        stream: &StreamDescriptor,
        config: &PipelineConfig,
    ) -> Result<(Self::VideoDecoder, Self::VideoConverter)>;

    fn open_audio(
        &self,
        demuxer: &Self::Demuxer,
        stream: &StreamDescriptor,
        config: &PipelineConfig,
    ) -> Result<(Self::AudioDecoder, Self::AudioConverter)>;
}
