//! FFmpeg 后端：解封装、软/硬解码、swscale / swresample 转换

pub mod decoder;
pub mod demuxer;
pub mod hw_decoder;

pub use decoder::{AudioResampler, AudioStreamDecoder, VideoScaler, VideoStreamDecoder};
pub use demuxer::FfmpegDemuxer;
pub use hw_decoder::HwDeviceContext;

use crate::core::{PipelineConfig, Result, StreamDescriptor};
use crate::player::backend::MediaBackend;
use ffmpeg_next as ffmpeg;
use log::info;

pub struct FfmpegBackend;

impl FfmpegBackend {
    /// 初始化 FFmpeg 库
    pub fn new() -> Result<Self> {
        ffmpeg::init()?;
        info!("FFmpeg 初始化完成");
        Ok(Self)
    }
}

impl MediaBackend for FfmpegBackend {
    type Packet = ffmpeg::Packet;
    type Demuxer = FfmpegDemuxer;
    type VideoDecoder = VideoStreamDecoder;
    type AudioDecoder = AudioStreamDecoder;
    type VideoConverter = VideoScaler;
    type AudioConverter = AudioResampler;

    fn open(&self, uri: &str) -> Result<FfmpegDemuxer> {
        FfmpegDemuxer::open(uri)
    }

    fn open_video(
        &self,
        demuxer: &FfmpegDemuxer,
        stream: &StreamDescriptor,
        config: &PipelineConfig,
    ) -> Result<(VideoStreamDecoder, VideoScaler)> {
        let hw_device = stream.decoder.hardware.then_some(config.hw_device);
        let decoder = VideoStreamDecoder::new(demuxer.parameters(stream.index)?, hw_device)?;
        Ok((decoder, VideoScaler::new()))
    }

    fn open_audio(
        &self,
        demuxer: &FfmpegDemuxer,
        stream: &StreamDescriptor,
        config: &PipelineConfig,
    ) -> Result<(AudioStreamDecoder, AudioResampler)> {
        let decoder = AudioStreamDecoder::new(demuxer.parameters(stream.index)?)?;
        Ok((decoder, AudioResampler::new(config.audio_output.clone())))
    }
}
