use crate::core::{
    BufferStatus, MediaInfo, PipelineConfig, PlaybackState, PlayerError, Result, StreamDescriptor,
    StreamKind, AV_TIME_BASE,
};
use crate::player::backend::{MediaBackend, PresentationSink};
use crate::player::decode_worker::{DecodeWorker, WorkerControl, WorkerOptions, WorkerStatsSnapshot};
use crate::player::demuxer_source::DemuxerSource;
use crate::player::demuxer_thread::{DemuxerThread, ReaderStats, SeekStream, StreamRoute};
use crate::player::log_ctx;
use crate::player::packet_queue::PacketQueue;
use crate::player::shared::PipelineShared;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 已打开、尚未启动线程的媒体
struct Prepared<B: MediaBackend> {
    demuxer: B::Demuxer,
    video: Option<(StreamDescriptor, B::VideoDecoder, B::VideoConverter)>,
    audio: Option<(StreamDescriptor, B::AudioDecoder, B::AudioConverter)>,
}

/// 运行中的播放会话
struct Session {
    shared: Arc<PipelineShared>,
    reader: DemuxerThread,
    workers: Vec<Box<dyn WorkerControl>>,
    /// 暂停开始的时刻；播放中为 None
    paused_at: Mutex<Option<Instant>>,
}

impl Session {
    fn worker(&self, kind: StreamKind) -> Option<&dyn WorkerControl> {
        self.workers.iter().find(|w| w.kind() == kind).map(|w| w.as_ref())
    }

    fn is_seeking(&self) -> bool {
        self.shared.seek.is_pending() || self.workers.iter().any(|w| w.seek_active())
    }
}

/// 启动中途失败时回收已经启动的解码线程
fn shutdown_workers(shared: &PipelineShared, workers: &mut [Box<dyn WorkerControl>]) {
    shared.stop();
    for worker in workers.iter_mut() {
        worker.close();
        worker.join();
    }
}

/// 播放管理器 - 整体控制播放流程
///
/// 生命周期：`init`/`open` 打开媒体并创建解码器 → `start` 启动 Demuxer 线程和解码线程（处于暂停）
/// → `play`/`pause`/`seek` → `stop`。停止后再次 `play` 会重新打开同一个媒体。
pub struct PlaybackManager<B: MediaBackend> {
    backend: B,
    sink: Arc<dyn PresentationSink>,
    config: PipelineConfig,
    source: Option<(String, bool)>,
    media_info: Option<MediaInfo>,
    prepared: Option<Prepared<B>>,
    session: Option<Session>,
    stopped: bool,
}

impl<B: MediaBackend> PlaybackManager<B> {
    pub fn new(backend: B, sink: Arc<dyn PresentationSink>, config: PipelineConfig) -> Self {
        info!("{} 🎮 创建播放管理器...", log_ctx());
        Self {
            backend,
            sink,
            config,
            source: None,
            media_info: None,
            prepared: None,
            session: None,
            stopped: false,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 打开媒体，选择音视频流并创建解码器
    ///
    /// 任何一步失败都会返回错误，不会留下半初始化的状态；
    /// 请求了硬件解码但设备上下文创建失败时直接报错，不回退到软件解码。
    pub fn open(&mut self, uri: &str, use_hw: bool) -> Result<MediaInfo> {
        self.stop();
        self.config.validate()?;
        info!("{} 📂 打开媒体: {}（硬件解码: {}）", log_ctx(), uri, use_hw);

        let demuxer = self.backend.open(uri)?;
        let mut video_stream = demuxer.video_stream().cloned();
        let audio_stream = demuxer.audio_stream().cloned();

        if video_stream.is_none() && self.config.require_video {
            return Err(PlayerError::NoVideoStream);
        }
        if audio_stream.is_none() && self.config.require_audio {
            return Err(PlayerError::NoAudioStream);
        }
        if video_stream.is_none() && audio_stream.is_none() {
            return Err(PlayerError::NoPlayableStream);
        }

        let video = match video_stream.take() {
            Some(mut stream) => {
                stream.decoder.hardware = use_hw;
                let (decoder, converter) = self.backend.open_video(&demuxer, &stream, &self.config)?;
                info!("{} ✓ 视频流 #{}: {}", log_ctx(), stream.index, stream.codec_id);
                Some((stream, decoder, converter))
            }
            None => None,
        };
        let audio = match audio_stream {
            Some(stream) => {
                let (decoder, converter) = self.backend.open_audio(&demuxer, &stream, &self.config)?;
                info!("{} ✓ 音频流 #{}: {}", log_ctx(), stream.index, stream.codec_id);
                Some((stream, decoder, converter))
            }
            None => None,
        };

        let media_info = demuxer.media_info();
        info!(
            "{} ✅ 媒体已打开: {}，时长 {:.2}s",
            log_ctx(),
            demuxer.description(),
            media_info.duration as f64 / AV_TIME_BASE as f64
        );

        self.prepared = Some(Prepared {
            demuxer,
            video,
            audio,
        });
        self.media_info = Some(media_info.clone());
        self.source = Some((uri.to_string(), use_hw));
        self.stopped = false;
        Ok(media_info)
    }

    /// 初始化；失败时记录错误并返回 false
    pub fn init(&mut self, uri: &str, use_hw: bool) -> bool {
        match self.open(uri, use_hw) {
            Ok(_) => true,
            Err(e) => {
                error!("{} ❌ 初始化失败: {}", log_ctx(), e);
                false
            }
        }
    }

    /// 启动 Demuxer 线程和解码线程，初始为暂停状态
    pub fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(PlayerError::InvalidState("播放线程已经启动".to_string()));
        }
        let prepared = self
            .prepared
            .take()
            .ok_or_else(|| PlayerError::InvalidState("没有已打开的媒体".to_string()))?;

        let has_video = prepared.video.is_some();
        let has_audio = prepared.audio.is_some();
        let shared = Arc::new(PipelineShared::new(has_video, has_audio));
        let options = WorkerOptions {
            pacing_slice: self.config.pacing_slice(),
            audio_stall_us: self.config.audio_stall_us(),
        };

        info!("{} 🚀 启动播放线程（视频: {}，音频: {}）", log_ctx(), has_video, has_audio);

        let mut routes = Vec::new();
        let mut workers: Vec<Box<dyn WorkerControl>> = Vec::new();
        let mut seek_stream = None;

        if let Some((stream, decoder, converter)) = prepared.video {
            let queue = Arc::new(PacketQueue::new(
                StreamKind::Video,
                self.config.video_queue_capacity,
                self.config.pop_wait(),
            ));
            routes.push(StreamRoute {
                stream_index: stream.index,
                queue: queue.clone(),
            });
            seek_stream = Some(SeekStream {
                index: stream.index,
                time_base: stream.time_base,
            });
            let worker = DecodeWorker::new(
                &stream,
                decoder,
                converter,
                queue,
                shared.clone(),
                self.sink.clone(),
                options,
            );
            match worker.spawn() {
                Ok(handle) => workers.push(Box::new(handle)),
                Err(e) => {
                    shutdown_workers(&shared, &mut workers);
                    return Err(e);
                }
            }
        }

        if let Some((stream, decoder, converter)) = prepared.audio {
            let queue = Arc::new(PacketQueue::new(
                StreamKind::Audio,
                self.config.audio_queue_capacity,
                self.config.pop_wait(),
            ));
            routes.push(StreamRoute {
                stream_index: stream.index,
                queue: queue.clone(),
            });
            if seek_stream.is_none() {
                seek_stream = Some(SeekStream {
                    index: stream.index,
                    time_base: stream.time_base,
                });
            }
            let worker = DecodeWorker::new(
                &stream,
                decoder,
                converter,
                queue,
                shared.clone(),
                self.sink.clone(),
                options,
            );
            match worker.spawn() {
                Ok(handle) => workers.push(Box::new(handle)),
                Err(e) => {
                    shutdown_workers(&shared, &mut workers);
                    return Err(e);
                }
            }
        }

        let seek_stream = seek_stream.ok_or(PlayerError::NoPlayableStream)?;
        let reader = match DemuxerThread::start(
            prepared.demuxer,
            routes,
            seek_stream,
            shared.clone(),
            self.config.eof_poll(),
        ) {
            Ok(reader) => reader,
            Err(e) => {
                shutdown_workers(&shared, &mut workers);
                return Err(e);
            }
        };

        self.session = Some(Session {
            shared,
            reader,
            workers,
            paused_at: Mutex::new(Some(Instant::now())),
        });
        Ok(())
    }

    /// 播放（从暂停恢复）
    ///
    /// 尚未启动时先启动线程；停止后会重新打开上一次的媒体。
    pub fn play(&mut self) -> Result<()> {
        if self.session.is_none() {
            if self.prepared.is_none() {
                let (uri, use_hw) = self
                    .source
                    .clone()
                    .ok_or_else(|| PlayerError::InvalidState("没有打开的文件，无法播放".to_string()))?;
                info!("{} 从停止状态恢复播放，重新打开: {}", log_ctx(), uri);
                self.open(&uri, use_hw)?;
            }
            self.start()?;
        }

        let Some(session) = self.session.as_ref() else {
            return Err(PlayerError::InvalidState("播放线程未启动".to_string()));
        };
        let mut paused_at = session.paused_at.lock();
        if let Some(since) = paused_at.take() {
            // 暂停期间时钟照常走，恢复时一次性扣掉
            let paused = since.elapsed();
            session.shared.clock.compensate_pause(paused);
            session.shared.control.play();
            info!("{} 🎬 播放（暂停了 {}ms）", log_ctx(), paused.as_millis());
        } else {
            debug!("{} 已在播放中", log_ctx());
        }
        Ok(())
    }

    /// 暂停播放
    pub fn pause(&self) {
        let Some(session) = self.session.as_ref() else {
            warn!("{} ⚠️  暂停被忽略：播放线程未启动", log_ctx());
            return;
        };
        let mut paused_at = session.paused_at.lock();
        if paused_at.is_none() {
            session.shared.control.pause();
            *paused_at = Some(Instant::now());
            info!("{} ⏸ 暂停", log_ctx());
        }
    }

    /// Seek 到指定秒数
    pub fn seek(&self, position_seconds: i64) {
        self.seek_micros(position_seconds.saturating_mul(AV_TIME_BASE));
    }

    /// Seek 到指定位置（微秒），超出范围时截断到 [0, 时长]
    ///
    /// 只发送请求，立即返回；Demuxer 线程处理完、解码线程找到目标之后的首帧前，`is_seeking()` 为真。
    pub fn seek_micros(&self, target_us: i64) {
        let Some(session) = self.session.as_ref() else {
            warn!("{} ⚠️  Seek 被忽略：播放线程未启动", log_ctx());
            return;
        };
        let duration = self.duration_micros();
        let target = if duration > 0 {
            target_us.clamp(0, duration)
        } else {
            target_us.max(0)
        };
        let request = session.shared.seek.request(target);
        info!("{} 🎯 Seek #{} 到: {}us", log_ctx(), request.seq, target);
        if let Err(e) = session.reader.seek(request) {
            error!("{} ❌ 发送 seek 命令到 DemuxerThread 失败: {}", log_ctx(), e);
            session.shared.seek.complete(request.seq);
        }
    }

    pub fn duration_micros(&self) -> i64 {
        self.media_info.as_ref().map(|m| m.duration).unwrap_or(0)
    }

    /// 总时长（秒，向下取整）
    pub fn duration_seconds(&self) -> i64 {
        self.duration_micros() / AV_TIME_BASE
    }

    /// 当前位置（微秒）
    ///
    /// Seek 进行中返回目标位置；否则以最近呈现的音频时间戳为准，没有音频时用视频。
    pub fn position_micros(&self) -> i64 {
        let Some(session) = self.session.as_ref() else {
            return 0;
        };
        if session.is_seeking() {
            return session.shared.seek.last_target();
        }
        let sync = &session.shared.sync;
        let pts = if session.shared.has_audio {
            sync.audio_pts().or_else(|| sync.video_pts())
        } else {
            sync.video_pts()
        };
        pts.unwrap_or(0).max(0)
    }

    /// 当前位置（秒，向下取整）
    pub fn position_seconds(&self) -> i64 {
        self.position_micros() / AV_TIME_BASE
    }

    pub fn is_seeking(&self) -> bool {
        self.session.as_ref().map(|s| s.is_seeking()).unwrap_or(false)
    }

    pub fn state(&self) -> PlaybackState {
        match (&self.session, &self.prepared) {
            (Some(session), _) => {
                if session.is_seeking() {
                    PlaybackState::Seeking
                } else if session.workers.iter().all(|w| w.is_finished()) {
                    PlaybackState::Finished
                } else if session.shared.control.is_playing() {
                    PlaybackState::Playing
                } else {
                    PlaybackState::Paused
                }
            }
            (None, Some(_)) => PlaybackState::Ready,
            (None, None) if self.stopped => PlaybackState::Stopped,
            (None, None) => PlaybackState::Idle,
        }
    }

    pub fn media_info(&self) -> Option<&MediaInfo> {
        self.media_info.as_ref()
    }

    /// 各包队列当前长度
    pub fn buffer_status(&self) -> BufferStatus {
        let depth = |kind| {
            self.session
                .as_ref()
                .and_then(|s| s.worker(kind))
                .map(|w| w.queue_depth())
                .unwrap_or(0)
        };
        BufferStatus {
            video_packets: depth(StreamKind::Video),
            audio_packets: depth(StreamKind::Audio),
        }
    }

    pub fn worker_stats(&self, kind: StreamKind) -> Option<WorkerStatsSnapshot> {
        self.session.as_ref()?.worker(kind).map(|w| w.stats())
    }

    pub fn demuxer_stats(&self) -> Option<&ReaderStats> {
        self.session.as_ref().map(|s| s.reader.stats())
    }

    /// 停止播放：通知所有线程退出并等待结束，之后才释放解码器
    pub fn stop(&mut self) {
        let had_media = self.session.is_some() || self.prepared.is_some();
        self.prepared = None;

        if let Some(mut session) = self.session.take() {
            info!("{} ⏹️  停止播放", log_ctx());
            session.shared.stop();
            for worker in &session.workers {
                worker.close();
            }
            session.reader.stop();
            info!("{} ✅ DemuxerThread 已停止", log_ctx());
            for worker in session.workers.iter_mut() {
                worker.join();
                info!("{} ✅ {}解码线程已结束", log_ctx(), worker.kind().as_str());
            }
            info!("{} ✅ 停止播放完成，所有线程已清理", log_ctx());
        }

        if had_media {
            self.stopped = true;
        }
    }
}

impl<B: MediaBackend> Drop for PlaybackManager<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
