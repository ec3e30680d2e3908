use crate::core::{
    CompressedUnit, DecoderConfig, MediaInfo, PlayerError, Result, StreamDescriptor, StreamKind,
    TimeBase,
};
use crate::player::demuxer_source::DemuxerSource;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, ffi, format, media};
use log::{debug, info, warn};

/// 基于 FFmpeg 的解封装器
pub struct FfmpegDemuxer {
    input_ctx: format::context::Input,
    streams: Vec<StreamDescriptor>,
    media_info: MediaInfo,
    source_path: String,
}

fn stream_descriptor(stream: &format::stream::Stream, kind: StreamKind) -> StreamDescriptor {
    let tb = stream.time_base();
    StreamDescriptor {
        index: stream.index(),
        kind,
        codec_id: stream.parameters().id().name().to_string(),
        time_base: TimeBase::new(tb.numerator(), tb.denominator()),
        decoder: DecoderConfig::default(),
    }
}

impl FfmpegDemuxer {
    /// 打开媒体文件或网络流，选出最佳视频流和音频流
    pub fn open(path: &str) -> Result<Self> {
        info!("正在打开: {}", path);

        let input_ctx = format::input(&path)
            .map_err(|e| PlayerError::OpenError(format!("无法打开 {}: {}", path, e)))?;

        let mut streams = Vec::new();
        if let Some(stream) = input_ctx.streams().best(media::Type::Video) {
            streams.push(stream_descriptor(&stream, StreamKind::Video));
        }
        if let Some(stream) = input_ctx.streams().best(media::Type::Audio) {
            streams.push(stream_descriptor(&stream, StreamKind::Audio));
        }
        for s in &streams {
            debug!(
                "{} 流: 索引 {}，编码 {}，时间基 {}/{}",
                s.kind.as_str(),
                s.index,
                s.codec_id,
                s.time_base.num,
                s.time_base.den
            );
        }

        let mut demuxer = Self {
            input_ctx,
            streams,
            media_info: MediaInfo::default(),
            source_path: path.to_string(),
        };
        demuxer.media_info = demuxer.extract_media_info()?;
        Ok(demuxer)
    }

    /// 提取媒体信息（内部使用）
    fn extract_media_info(&self) -> Result<MediaInfo> {
        let mut info = MediaInfo {
            duration: self.duration_us(),
            video_codec: "none".to_string(),
            audio_codec: "none".to_string(),
            ..MediaInfo::default()
        };

        if let Some(desc) = self.video_stream() {
            let stream = self.stream_at(desc.index)?;
            let decoder = codec::context::Context::from_parameters(stream.parameters())?
                .decoder()
                .video()?;
            let fps = stream.avg_frame_rate();
            info.width = decoder.width();
            info.height = decoder.height();
            info.fps = if fps.denominator() != 0 {
                fps.numerator() as f64 / fps.denominator() as f64
            } else {
                0.0
            };
            info.video_codec = desc.codec_id.clone();
        }

        if let Some(desc) = self.audio_stream() {
            let stream = self.stream_at(desc.index)?;
            let decoder = codec::context::Context::from_parameters(stream.parameters())?
                .decoder()
                .audio()?;
            info.sample_rate = decoder.rate();
            info.channels = decoder.channels();
            info.audio_codec = desc.codec_id.clone();
        }

        Ok(info)
    }

    fn stream_at(&self, index: usize) -> Result<format::stream::Stream<'_>> {
        self.input_ctx
            .stream(index)
            .ok_or_else(|| PlayerError::OpenError(format!("流索引 {} 不存在", index)))
    }

    /// 流的编解码参数（创建解码器用）
    pub fn parameters(&self, index: usize) -> Result<codec::Parameters> {
        Ok(self.stream_at(index)?.parameters())
    }
}

impl DemuxerSource for FfmpegDemuxer {
    type Packet = ffmpeg::Packet;

    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<CompressedUnit<ffmpeg::Packet>>> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input_ctx) {
                Ok(()) => {
                    return Ok(Some(CompressedUnit {
                        stream_index: packet.stream(),
                        pts: packet.pts(),
                        payload: packet,
                    }));
                }
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    // 网络流暂时没有数据
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn seek(&mut self, stream_index: usize, target_ticks: i64) -> Result<()> {
        let ret = unsafe {
            ffi::av_seek_frame(
                self.input_ctx.as_mut_ptr(),
                stream_index as i32,
                target_ticks,
                ffi::AVSEEK_FLAG_BACKWARD as i32,
            )
        };
        if ret < 0 {
            warn!("av_seek_frame 失败: {}", ffmpeg::Error::from(ret));
            return Err(PlayerError::SeekError(format!(
                "av_seek_frame 返回 {}",
                ffmpeg::Error::from(ret)
            )));
        }
        Ok(())
    }

    fn duration_us(&self) -> i64 {
        // AV_NOPTS_VALUE 或负值表示未知
        self.input_ctx.duration().max(0)
    }

    fn media_info(&self) -> MediaInfo {
        self.media_info.clone()
    }

    fn is_seekable(&self) -> bool {
        unsafe {
            let pb = (*self.input_ctx.as_ptr()).pb;
            pb.is_null() || (*pb).seekable != 0
        }
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_path)
    }
}
