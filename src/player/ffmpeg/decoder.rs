use crate::core::{
    AudioFrame, AudioOutputConfig, CompressedUnit, HwDeviceKind, PixelFormat, PlayerError, Result,
    SampleFormat, VideoFrame,
};
use crate::player::backend::{DecodedFrame, FrameConverter, StreamDecoder};
use crate::player::ffmpeg::hw_decoder::{self, HwDeviceContext};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, ffi, software, util};
use log::{debug, info};

impl DecodedFrame for util::frame::Video {
    fn pts(&self) -> Option<i64> {
        util::frame::Frame::timestamp(self).or_else(|| util::frame::Frame::pts(self))
    }
}

impl DecodedFrame for util::frame::Audio {
    fn pts(&self) -> Option<i64> {
        util::frame::Frame::timestamp(self).or_else(|| util::frame::Frame::pts(self))
    }
}

/// 把 receive_frame 的结果归一成 Ok(None) = 需要更多输入 / 已取空
fn receive_result(result: std::result::Result<(), ffmpeg::Error>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(false),
        Err(ffmpeg::Error::Eof) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// 视频解码器（软解或硬解）
pub struct VideoStreamDecoder {
    decoder: codec::decoder::Video,
    hw_device: Option<HwDeviceContext>,
}

impl VideoStreamDecoder {
    /// `hw_device` 为 Some 时创建硬件设备，失败直接返回错误
    pub fn new(parameters: codec::Parameters, hw_device: Option<HwDeviceKind>) -> Result<Self> {
        let mut context = codec::context::Context::from_parameters(parameters)?;

        let hw_device = match hw_device {
            Some(kind) => {
                let device = HwDeviceContext::create(kind)?;
                device.attach(&mut context)?;
                Some(device)
            }
            None => None,
        };

        unsafe {
            let codec_ctx = context.as_mut_ptr();
            (*codec_ctx).thread_count = 4;
            (*codec_ctx).thread_type = (ffi::FF_THREAD_FRAME | ffi::FF_THREAD_SLICE) as i32;
        }

        let decoder = context.decoder().video()?;
        debug!(
            "视频解码器: {}x{}, 格式: {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );

        Ok(Self { decoder, hw_device })
    }
}

impl StreamDecoder for VideoStreamDecoder {
    type Packet = ffmpeg::Packet;
    type Frame = util::frame::Video;

    fn submit(&mut self, unit: &CompressedUnit<ffmpeg::Packet>) -> Result<()> {
        match self.decoder.send_packet(&unit.payload) {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Eof) => {
                debug!("视频解码器已处于 EOF 状态，flush 后忽略本次包");
                self.decoder.flush();
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn send_eof(&mut self) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn receive(&mut self) -> Result<Option<util::frame::Video>> {
        let mut frame = util::frame::Video::empty();
        if !receive_result(self.decoder.receive_frame(&mut frame))? {
            return Ok(None);
        }
        if hw_decoder::is_hardware_frame(&frame) {
            return hw_decoder::transfer_to_system(&frame).map(Some);
        }
        Ok(Some(frame))
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn info(&self) -> String {
        match &self.hw_device {
            Some(device) => format!("硬件解码 ({})", device.kind().name()),
            None => "软件解码".to_string(),
        }
    }
}

/// 音频解码器
pub struct AudioStreamDecoder {
    decoder: codec::decoder::Audio,
}

impl AudioStreamDecoder {
    pub fn new(parameters: codec::Parameters) -> Result<Self> {
        let context = codec::context::Context::from_parameters(parameters)?;
        let decoder = context.decoder().audio()?;
        debug!(
            "音频解码器: {} Hz, {} 声道, 格式: {:?}",
            decoder.rate(),
            decoder.channels(),
            decoder.format()
        );
        Ok(Self { decoder })
    }
}

impl StreamDecoder for AudioStreamDecoder {
    type Packet = ffmpeg::Packet;
    type Frame = util::frame::Audio;

    fn submit(&mut self, unit: &CompressedUnit<ffmpeg::Packet>) -> Result<()> {
        match self.decoder.send_packet(&unit.payload) {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Eof) => {
                debug!("音频解码器已处于 EOF 状态，flush 后忽略本次包");
                self.decoder.flush();
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn send_eof(&mut self) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn receive(&mut self) -> Result<Option<util::frame::Audio>> {
        let mut frame = util::frame::Audio::empty();
        if receive_result(self.decoder.receive_frame(&mut frame))? {
            Ok(Some(frame))
        } else {
            Ok(None)
        }
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

/// 任意像素格式 → RGBA（紧密排列）
pub struct VideoScaler {
    scaler: Option<software::scaling::Context>,
    source: Option<(util::format::Pixel, u32, u32)>,
}

// SwsContext 本身不是 Send，但每个 scaler 只在所属解码线程里使用
unsafe impl Send for VideoScaler {}

impl VideoScaler {
    pub fn new() -> Self {
        Self {
            scaler: None,
            source: None,
        }
    }
}

impl Default for VideoScaler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameConverter<util::frame::Video> for VideoScaler {
    type Output = VideoFrame;

    fn convert(&mut self, frame: util::frame::Video, pts_us: i64) -> Result<VideoFrame> {
        let width = frame.width();
        let height = frame.height();
        let source = (frame.format(), width, height);

        // 首帧或分辨率/格式变化时（重新）创建 scaler
        if self.source != Some(source) {
            if self.source.is_some() {
                info!("🔧 视频格式变化 {:?} → {:?}，重建 scaler", self.source, source);
            }
            let scaler = software::scaling::Context::get(
                frame.format(),
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| PlayerError::ConvertError(format!("创建 scaler 失败: {}", e)))?;
            self.scaler = Some(scaler);
            self.source = Some(source);
        }
        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| PlayerError::ConvertError("scaler 未初始化".to_string()))?;

        let mut rgba_frame = util::frame::Video::empty();
        scaler
            .run(&frame, &mut rgba_frame)
            .map_err(|e| PlayerError::ConvertError(format!("像素格式转换失败: {}", e)))?;

        // 按行复制，去掉 stride 填充
        let row_size = width as usize * 4;
        let mut data = vec![0u8; row_size * height as usize];
        let stride = rgba_frame.stride(0);
        let frame_data = rgba_frame.data(0);
        for y in 0..height as usize {
            let src = y * stride;
            let dst = y * row_size;
            data[dst..dst + row_size].copy_from_slice(&frame_data[src..src + row_size]);
        }

        Ok(VideoFrame {
            pts: pts_us,
            width,
            height,
            format: PixelFormat::RGBA,
            data,
        })
    }
}

/// 任意采样格式 → 交错 S16 / F32（可选重采样和声道转换）
pub struct AudioResampler {
    target: AudioOutputConfig,
    resampler: Option<software::resampling::Context>,
    source: Option<(util::format::Sample, u64, u32)>,
}

// SwrContext 同样只在所属解码线程里使用
unsafe impl Send for AudioResampler {}

fn channel_layout_for(channels: u16) -> util::channel_layout::ChannelLayout {
    match channels {
        1 => util::channel_layout::ChannelLayout::MONO,
        2 => util::channel_layout::ChannelLayout::STEREO,
        n => util::channel_layout::ChannelLayout::default(n as i32),
    }
}

fn output_sample(format: SampleFormat) -> util::format::Sample {
    match format {
        SampleFormat::S16 => util::format::Sample::I16(util::format::sample::Type::Packed),
        SampleFormat::F32 => util::format::Sample::F32(util::format::sample::Type::Packed),
    }
}

impl AudioResampler {
    pub fn new(target: AudioOutputConfig) -> Self {
        Self {
            target,
            resampler: None,
            source: None,
        }
    }
}

impl FrameConverter<util::frame::Audio> for AudioResampler {
    type Output = AudioFrame;

    fn convert(&mut self, mut frame: util::frame::Audio, pts_us: i64) -> Result<AudioFrame> {
        let source_rate = frame.rate();
        // 部分解码器不填声道布局，按声道数补上默认布局
        if frame.channel_layout().is_empty() {
            frame.set_channel_layout(channel_layout_for(frame.channels()));
        }
        let source_layout = frame.channel_layout();
        let target_rate = self.target.sample_rate.unwrap_or(source_rate);
        let target_channels = self.target.channels;
        let source = (frame.format(), source_layout.bits(), source_rate);

        if self.source != Some(source) {
            debug!(
                "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch {:?}",
                source_rate,
                frame.channels(),
                target_rate,
                target_channels,
                self.target.sample_format
            );
            let resampler = software::resampling::Context::get(
                frame.format(),
                source_layout,
                source_rate,
                output_sample(self.target.sample_format),
                channel_layout_for(target_channels),
                target_rate,
            )
            .map_err(|e| PlayerError::ConvertError(format!("创建重采样器失败: {}", e)))?;
            self.resampler = Some(resampler);
            self.source = Some(source);
        }
        let resampler = self
            .resampler
            .as_mut()
            .ok_or_else(|| PlayerError::ConvertError("重采样器未初始化".to_string()))?;

        let mut resampled = util::frame::Audio::empty();
        resampler
            .run(&frame, &mut resampled)
            .map_err(|e| PlayerError::ConvertError(format!("音频重采样失败: {}", e)))?;

        let byte_len = resampled.samples()
            * target_channels as usize
            * self.target.sample_format.bytes_per_sample();
        let plane = resampled.data(0);
        let data = plane[..byte_len.min(plane.len())].to_vec();

        Ok(AudioFrame {
            pts: pts_us,
            sample_rate: target_rate,
            channels: target_channels,
            format: self.target.sample_format,
            data,
        })
    }
}
