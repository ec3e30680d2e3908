use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use myy_pipeline::core::{AudioFrame, PipelineConfig, PlaybackState, StreamKind, VideoFrame};
use myy_pipeline::player::{FfmpegBackend, PresentationSink};
use myy_pipeline::PlaybackManager;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "audio-output")]
use myy_pipeline::player::{AudioOutput, AudioWriter};

#[derive(Parser, Debug)]
#[command(name = "myy-pipeline", version, about = "无界面播放：解封装 - 解码 - 音画同步")]
struct Args {
    /// 媒体文件路径或网络流地址
    uri: String,

    /// 使用硬件解码（设备类型见配置 hw_device）
    #[arg(long)]
    hw: bool,

    /// JSON 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 开始播放后立即跳转到该位置（秒）
    #[arg(long)]
    seek: Option<f64>,

    /// 播放该秒数后暂停
    #[arg(long)]
    pause_after: Option<f64>,

    /// 暂停持续的秒数
    #[arg(long, default_value_t = 2.0)]
    pause_for: f64,
}

/// 命令行呈现端：视频帧只计数，音频送声卡（启用 audio-output 时）
struct ConsoleSink {
    video_frames: AtomicU64,
    audio_frames: AtomicU64,
    #[cfg(feature = "audio-output")]
    audio: Option<AudioWriter>,
}

impl PresentationSink for ConsoleSink {
    fn on_video_frame(&self, frame: VideoFrame) {
        let n = self.video_frames.fetch_add(1, Ordering::Relaxed) + 1;
        if n <= 3 || n % 100 == 0 {
            info!(
                "🎬 视频帧 #{}: pts={:.3}s {}x{}",
                n,
                frame.pts as f64 / 1_000_000.0,
                frame.width,
                frame.height
            );
        }
    }

    fn on_audio_samples(&self, frame: AudioFrame) {
        self.audio_frames.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "audio-output")]
        {
            if let Some(audio) = &self.audio {
                audio.write_frame(&frame);
            }
        }
        #[cfg(not(feature = "audio-output"))]
        let _ = frame;
    }

    fn audio_reset(&self) {
        #[cfg(feature = "audio-output")]
        {
            if let Some(audio) = &self.audio {
                audio.clear();
            }
        }
    }
}

/// 打开声卡，并把音频输出格式对齐到设备实际配置
#[cfg(feature = "audio-output")]
fn open_audio_device(config: &mut PipelineConfig) -> Option<AudioOutput> {
    let rate = config.audio_output.sample_rate.unwrap_or(48_000);
    match AudioOutput::new(rate, config.audio_output.channels) {
        Ok(mut output) => {
            let (rate, channels) = output.get_config();
            config.audio_output.sample_rate = Some(rate);
            config.audio_output.channels = channels;
            if let Err(e) = output.start() {
                warn!("⚠️ 音频输出启动失败，静音播放: {}", e);
                return None;
            }
            Some(output)
        }
        Err(e) => {
            warn!("⚠️ 无法打开音频设备，静音播放: {}", e);
            None
        }
    }
}

/// 注册 Ctrl-C 处理；注册失败只记录警告，返回的标志永远不会被置位
fn install_interrupt_flag() -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!("⚠️ 无法注册 Ctrl-C 处理，只能等待播放结束: {}", e);
    }
    interrupted
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    info!("🎬 MYY Pipeline 启动");

    #[cfg_attr(not(feature = "audio-output"), allow(unused_mut))]
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("读取配置失败: {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    #[cfg(feature = "audio-output")]
    let audio_device = open_audio_device(&mut config);

    let sink = Arc::new(ConsoleSink {
        video_frames: AtomicU64::new(0),
        audio_frames: AtomicU64::new(0),
        #[cfg(feature = "audio-output")]
        audio: audio_device.as_ref().map(|output| output.writer()),
    });

    let backend = FfmpegBackend::new().context("FFmpeg 初始化失败")?;
    let mut manager = PlaybackManager::new(backend, sink.clone(), config);

    let media = manager
        .open(&args.uri, args.hw)
        .with_context(|| format!("无法打开 {}", args.uri))?;
    info!(
        "媒体信息: 时长 {:.1}s, {}x{} @ {:.2}fps ({}), 音频 {} Hz {} 声道 ({})",
        media.duration as f64 / 1_000_000.0,
        media.width,
        media.height,
        media.fps,
        media.video_codec,
        media.sample_rate,
        media.channels,
        media.audio_codec
    );

    let interrupted = install_interrupt_flag();

    manager.play().context("启动播放失败")?;
    if let Some(seconds) = args.seek {
        info!("⏩ 跳转到 {:.1}s", seconds);
        manager.seek_micros((seconds * 1_000_000.0) as i64);
    }

    let started = Instant::now();
    let mut pause_pending = args.pause_after.map(Duration::from_secs_f64);
    let mut last_report = Instant::now();

    loop {
        if interrupted.load(Ordering::SeqCst) {
            info!("🛑 收到 Ctrl-C，停止播放");
            break;
        }
        if manager.state() == PlaybackState::Finished {
            info!("📄 播放完毕");
            break;
        }

        if let Some(after) = pause_pending {
            if started.elapsed() >= after {
                pause_pending = None;
                info!("⏸ 暂停 {:.1}s", args.pause_for);
                manager.pause();
                thread::sleep(Duration::from_secs_f64(args.pause_for.max(0.0)));
                manager.play().context("恢复播放失败")?;
            }
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            let buffers = manager.buffer_status();
            info!(
                "⏱ {:.2}s / {:.2}s, 队列 视频 {} 音频 {}",
                manager.position_micros() as f64 / 1_000_000.0,
                manager.duration_micros() as f64 / 1_000_000.0,
                buffers.video_packets,
                buffers.audio_packets
            );
        }
        thread::sleep(Duration::from_millis(50));
    }

    for kind in [StreamKind::Video, StreamKind::Audio] {
        if let Some(stats) = manager.worker_stats(kind) {
            info!("{} 统计: {:?}", kind.as_str(), stats);
        }
    }
    manager.stop();
    info!(
        "✅ 共呈现 {} 个视频帧, {} 个音频帧",
        sink.video_frames.load(Ordering::Relaxed),
        sink.audio_frames.load(Ordering::Relaxed)
    );
    Ok(())
}
