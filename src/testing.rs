//! 测试用的脚本化媒体后端：内存里按固定帧率生成音视频包，不依赖 FFmpeg。
//!
//! 视频 30fps、时间基 1/90000、每 12 帧一个关键帧；音频 48kHz、每帧 1024 采样。
//! 视频解码器会缓存两帧再输出，模拟真实解码器的延迟。

use crate::core::{
    AudioFrame, CompressedUnit, DecoderConfig, MediaInfo, PipelineConfig, PixelFormat, PlayerError,
    Result, SampleFormat, StreamDescriptor, StreamKind, TimeBase, VideoFrame,
};
use crate::player::backend::{
    DecodedFrame, FrameConverter, MediaBackend, PresentationSink, StreamDecoder,
};
use crate::player::demuxer_source::DemuxerSource;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

pub const VIDEO_TIME_BASE: TimeBase = TimeBase::new(1, 90_000);
pub const AUDIO_TIME_BASE: TimeBase = TimeBase::new(1, 48_000);
pub const VIDEO_FPS: i64 = 30;
pub const VIDEO_FRAME_US: i64 = 33_334;
pub const AUDIO_FRAME_SAMPLES: i64 = 1024;
pub const AUDIO_FRAME_US: i64 = 21_334;

const VIDEO_INDEX: usize = 0;
const AUDIO_INDEX: usize = 1;
const DATA_INDEX: usize = 2;

#[derive(Debug, Clone)]
pub struct ScriptedMedia {
    pub duration_us: i64,
    pub gop: i64,
    pub has_video: bool,
    pub has_audio: bool,
    pub data_stream: bool,
    pub seek_fails: bool,
    pub corrupt_video: Option<i64>,
    pub decoder_delay: usize,
    pub hw_available: bool,
    pub audio_decoder_fails: bool,
}

impl ScriptedMedia {
    pub fn new(duration_us: i64) -> Self {
        Self {
            duration_us,
            gop: 12,
            has_video: true,
            has_audio: true,
            data_stream: false,
            seek_fails: false,
            corrupt_video: None,
            decoder_delay: 2,
            hw_available: false,
            audio_decoder_fails: false,
        }
    }

    pub fn video_only(mut self) -> Self {
        self.has_audio = false;
        self
    }

    pub fn audio_only(mut self) -> Self {
        self.has_video = false;
        self
    }

    pub fn with_data_stream(mut self) -> Self {
        self.data_stream = true;
        self
    }

    pub fn failing_seek(mut self) -> Self {
        self.seek_fails = true;
        self
    }

    /// 第 `frame` 个视频包解码失败
    pub fn corrupt_video_frame(mut self, frame: i64) -> Self {
        self.corrupt_video = Some(frame);
        self
    }

    pub fn with_hardware(mut self) -> Self {
        self.hw_available = true;
        self
    }

    pub fn failing_audio_decoder(mut self) -> Self {
        self.audio_decoder_fails = true;
        self
    }

    fn video_frames(&self) -> i64 {
        if !self.has_video {
            return 0;
        }
        (self.duration_us * VIDEO_FPS + 999_999) / 1_000_000
    }

    fn audio_frames(&self) -> i64 {
        if !self.has_audio {
            return 0;
        }
        let per_frame = AUDIO_FRAME_SAMPLES * 1_000_000;
        (self.duration_us * 48_000 + per_frame - 1) / per_frame
    }
}

fn video_ticks(frame: i64) -> i64 {
    frame * (90_000 / VIDEO_FPS)
}

fn audio_ticks(frame: i64) -> i64 {
    frame * AUDIO_FRAME_SAMPLES
}

#[derive(Debug, Clone)]
pub struct ScriptedPacket {
    pub keyframe: bool,
    pub corrupt: bool,
}

impl ScriptedPacket {
    pub fn video(keyframe: bool) -> Self {
        Self {
            keyframe,
            corrupt: false,
        }
    }
}

pub struct ScriptedDemuxer {
    media: ScriptedMedia,
    streams: Vec<StreamDescriptor>,
    next_video: i64,
    next_audio: i64,
    reads: u64,
}

impl ScriptedDemuxer {
    pub fn new(media: ScriptedMedia) -> Self {
        let mut streams = Vec::new();
        if media.has_video {
            streams.push(StreamDescriptor {
                index: VIDEO_INDEX,
                kind: StreamKind::Video,
                codec_id: "scripted-video".to_string(),
                time_base: VIDEO_TIME_BASE,
                decoder: DecoderConfig::default(),
            });
        }
        if media.has_audio {
            streams.push(StreamDescriptor {
                index: AUDIO_INDEX,
                kind: StreamKind::Audio,
                codec_id: "scripted-audio".to_string(),
                time_base: AUDIO_TIME_BASE,
                decoder: DecoderConfig::default(),
            });
        }
        Self {
            media,
            streams,
            next_video: 0,
            next_audio: 0,
            reads: 0,
        }
    }
}

impl DemuxerSource for ScriptedDemuxer {
    type Packet = ScriptedPacket;

    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<CompressedUnit<ScriptedPacket>>> {
        self.reads += 1;
        if self.media.data_stream && self.reads % 5 == 0 {
            return Ok(Some(CompressedUnit {
                stream_index: DATA_INDEX,
                pts: None,
                payload: ScriptedPacket::video(false),
            }));
        }

        let video = (self.next_video < self.media.video_frames())
            .then(|| VIDEO_TIME_BASE.to_micros(video_ticks(self.next_video)));
        let audio = (self.next_audio < self.media.audio_frames())
            .then(|| AUDIO_TIME_BASE.to_micros(audio_ticks(self.next_audio)));

        let take_video = match (video, audio) {
            (None, None) => return Ok(None),
            (Some(v), Some(a)) => v <= a,
            (Some(_), None) => true,
            (None, Some(_)) => false,
        };

        if take_video {
            let frame = self.next_video;
            self.next_video += 1;
            Ok(Some(CompressedUnit {
                stream_index: VIDEO_INDEX,
                pts: Some(video_ticks(frame)),
                payload: ScriptedPacket {
                    keyframe: frame % self.media.gop == 0,
                    corrupt: self.media.corrupt_video == Some(frame),
                },
            }))
        } else {
            let frame = self.next_audio;
            self.next_audio += 1;
            Ok(Some(CompressedUnit {
                stream_index: AUDIO_INDEX,
                pts: Some(audio_ticks(frame)),
                payload: ScriptedPacket {
                    keyframe: true,
                    corrupt: false,
                },
            }))
        }
    }

    fn seek(&mut self, stream_index: usize, target_ticks: i64) -> Result<()> {
        if self.media.seek_fails {
            return Err(PlayerError::SeekError("脚本数据源拒绝 Seek".to_string()));
        }
        let time_base = self
            .streams
            .iter()
            .find(|s| s.index == stream_index)
            .map(|s| s.time_base)
            .ok_or_else(|| PlayerError::SeekError(format!("未知流 {}", stream_index)))?;
        let target_us = time_base.to_micros(target_ticks).max(0);

        // 视频回到目标之前最近的关键帧，音频从关键帧时刻开始
        let start_us = if self.media.has_video {
            let frame = target_us * VIDEO_FPS / 1_000_000;
            let keyframe = (frame - frame % self.media.gop).min(self.media.video_frames());
            self.next_video = keyframe;
            VIDEO_TIME_BASE.to_micros(video_ticks(keyframe))
        } else {
            target_us
        };
        self.next_audio = start_us * 48_000 / (AUDIO_FRAME_SAMPLES * 1_000_000);
        Ok(())
    }

    fn duration_us(&self) -> i64 {
        self.media.duration_us
    }

    fn media_info(&self) -> MediaInfo {
        MediaInfo {
            duration: self.media.duration_us,
            width: if self.media.has_video { 4 } else { 0 },
            height: if self.media.has_video { 2 } else { 0 },
            fps: if self.media.has_video { VIDEO_FPS as f64 } else { 0.0 },
            video_codec: if self.media.has_video { "scripted-video".into() } else { String::new() },
            audio_codec: if self.media.has_audio { "scripted-audio".into() } else { String::new() },
            sample_rate: if self.media.has_audio { 48_000 } else { 0 },
            channels: if self.media.has_audio { 2 } else { 0 },
        }
    }

    fn description(&self) -> String {
        format!("scripted ({}us)", self.media.duration_us)
    }
}

#[derive(Debug)]
pub struct ScriptedFrame {
    pts: Option<i64>,
}

impl DecodedFrame for ScriptedFrame {
    fn pts(&self) -> Option<i64> {
        self.pts
    }
}

/// 按提交顺序输出，缓存 `delay` 个包；flush 后视频需要等到关键帧
pub struct ScriptedDecoder {
    kind: StreamKind,
    delay: usize,
    pending: VecDeque<Option<i64>>,
    draining: bool,
    need_keyframe: bool,
}

impl ScriptedDecoder {
    fn new(kind: StreamKind, delay: usize) -> Self {
        Self {
            kind,
            delay,
            pending: VecDeque::new(),
            draining: false,
            need_keyframe: kind == StreamKind::Video,
        }
    }
}

impl StreamDecoder for ScriptedDecoder {
    type Packet = ScriptedPacket;
    type Frame = ScriptedFrame;

    fn submit(&mut self, unit: &CompressedUnit<ScriptedPacket>) -> Result<()> {
        if unit.payload.corrupt {
            return Err(PlayerError::DecodeError(format!(
                "损坏的{}包 pts={:?}",
                self.kind.as_str(),
                unit.pts
            )));
        }
        if self.need_keyframe && !unit.payload.keyframe {
            return Ok(());
        }
        self.need_keyframe = false;
        self.pending.push_back(unit.pts);
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        self.draining = true;
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<ScriptedFrame>> {
        if self.pending.len() > self.delay || (self.draining && !self.pending.is_empty()) {
            Ok(self.pending.pop_front().map(|pts| ScriptedFrame { pts }))
        } else {
            Ok(None)
        }
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.draining = false;
        self.need_keyframe = self.kind == StreamKind::Video;
    }
}

pub struct ScriptedVideoConverter {
    width: u32,
    height: u32,
}

impl FrameConverter<ScriptedFrame> for ScriptedVideoConverter {
    type Output = VideoFrame;

    fn convert(&mut self, _frame: ScriptedFrame, pts_us: i64) -> Result<VideoFrame> {
        Ok(VideoFrame {
            pts: pts_us,
            width: self.width,
            height: self.height,
            format: PixelFormat::RGBA,
            data: vec![0; (self.width * self.height * 4) as usize],
        })
    }
}

pub struct ScriptedAudioConverter {
    channels: u16,
    format: SampleFormat,
}

impl FrameConverter<ScriptedFrame> for ScriptedAudioConverter {
    type Output = AudioFrame;

    fn convert(&mut self, _frame: ScriptedFrame, pts_us: i64) -> Result<AudioFrame> {
        let bytes =
            AUDIO_FRAME_SAMPLES as usize * self.channels as usize * self.format.bytes_per_sample();
        Ok(AudioFrame {
            pts: pts_us,
            sample_rate: 48_000,
            channels: self.channels,
            format: self.format,
            data: vec![0; bytes],
        })
    }
}

pub struct ScriptedBackend {
    media: ScriptedMedia,
}

impl ScriptedBackend {
    pub fn new(media: ScriptedMedia) -> Self {
        Self { media }
    }
}

impl MediaBackend for ScriptedBackend {
    type Packet = ScriptedPacket;
    type Demuxer = ScriptedDemuxer;
    type VideoDecoder = ScriptedDecoder;
    type AudioDecoder = ScriptedDecoder;
    type VideoConverter = ScriptedVideoConverter;
    type AudioConverter = ScriptedAudioConverter;

    fn open(&self, uri: &str) -> Result<ScriptedDemuxer> {
        if uri.starts_with("missing") {
            return Err(PlayerError::OpenError(uri.to_string()));
        }
        Ok(ScriptedDemuxer::new(self.media.clone()))
    }

    fn open_video(
        &self,
        _demuxer: &ScriptedDemuxer,
        stream: &StreamDescriptor,
        config: &PipelineConfig,
    ) -> Result<(ScriptedDecoder, ScriptedVideoConverter)> {
        if stream.decoder.hardware && !self.media.hw_available {
            return Err(PlayerError::HardwareError(format!(
                "无法创建 {} 硬件设备上下文",
                config.hw_device.name()
            )));
        }
        Ok((
            ScriptedDecoder::new(StreamKind::Video, self.media.decoder_delay),
            ScriptedVideoConverter {
                width: 4,
                height: 2,
            },
        ))
    }

    fn open_audio(
        &self,
        _demuxer: &ScriptedDemuxer,
        _stream: &StreamDescriptor,
        config: &PipelineConfig,
    ) -> Result<(ScriptedDecoder, ScriptedAudioConverter)> {
        if self.media.audio_decoder_fails {
            return Err(PlayerError::DecodeError("找不到音频解码器".to_string()));
        }
        Ok((
            ScriptedDecoder::new(StreamKind::Audio, 0),
            ScriptedAudioConverter {
                channels: config.audio_output.channels,
                format: config.audio_output.sample_format,
            },
        ))
    }
}

/// 记录收到的帧时间戳
#[derive(Default)]
pub struct RecordingSink {
    video: Mutex<Vec<i64>>,
    audio: Mutex<Vec<i64>>,
    resets: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn video_pts(&self) -> Vec<i64> {
        self.video.lock().clone()
    }

    pub fn audio_pts(&self) -> Vec<i64> {
        self.audio.lock().clone()
    }

    pub fn video_count(&self) -> usize {
        self.video.lock().len()
    }

    pub fn audio_count(&self) -> usize {
        self.audio.lock().len()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// 轮询直到条件成立或超时
    pub fn wait_for(&self, cond: impl Fn(&Self) -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond(self) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond(self)
    }
}

impl PresentationSink for RecordingSink {
    fn on_video_frame(&self, frame: VideoFrame) {
        self.video.lock().push(frame.pts);
    }

    fn on_audio_samples(&self, frame: AudioFrame) {
        self.audio.lock().push(frame.pts);
    }

    fn audio_reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packets_interleave_by_timestamp() {
        let mut demuxer = ScriptedDemuxer::new(ScriptedMedia::new(200_000));
        let mut last_us = i64::MIN;
        let mut video = 0;
        let mut audio = 0;
        while let Some(unit) = demuxer.read_packet().unwrap() {
            let tb = if unit.stream_index == VIDEO_INDEX {
                video += 1;
                VIDEO_TIME_BASE
            } else {
                audio += 1;
                AUDIO_TIME_BASE
            };
            let us = tb.to_micros(unit.pts.unwrap());
            assert!(us >= last_us);
            last_us = us;
        }
        assert_eq!(video, 6);
        assert_eq!(audio, 10);
    }

    #[test]
    fn seek_lands_on_preceding_keyframe() {
        let mut demuxer = ScriptedDemuxer::new(ScriptedMedia::new(10_000_000));
        demuxer
            .seek(VIDEO_INDEX, VIDEO_TIME_BASE.from_micros(5_000_000))
            .unwrap();
        let unit = demuxer.read_packet().unwrap().unwrap();
        assert_eq!(unit.stream_index, VIDEO_INDEX);
        assert_eq!(VIDEO_TIME_BASE.to_micros(unit.pts.unwrap()), 4_800_000);
        assert!(unit.payload.keyframe);
    }
}
