//! 解码线程：出队 → 解码 → Seek 过滤 → 同步等待 → 转换 → 交给呈现端。
//!
//! 音频线程以播放时钟为准调度；视频线程跟随最近一次呈现的音频时间戳，
//! 没有音频流（或音频已经放完）时退回到播放时钟。没有音频时视频就是主时钟。

use crate::core::{PlayerError, Result, StreamDescriptor, StreamKind, TimeBase};
use crate::player::backend::{DecodedFrame, FrameConverter, Presentable, PresentationSink, StreamDecoder};
use crate::player::log_ctx;
use crate::player::packet_queue::{PacketQueue, PopResult};
use crate::player::shared::{PipelineShared, NO_PTS};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 音视频同步角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRole {
    /// 音频：按播放时钟调度，并发布音频时间戳
    AudioMaster,
    /// 没有音频时的视频：按播放时钟调度
    VideoMaster,
    /// 有音频时的视频：跟随音频时间戳
    VideoFollower,
}

impl SyncRole {
    pub fn for_stream(kind: StreamKind, has_audio: bool) -> Self {
        match kind {
            StreamKind::Audio => SyncRole::AudioMaster,
            StreamKind::Video if has_audio => SyncRole::VideoFollower,
            StreamKind::Video => SyncRole::VideoMaster,
        }
    }

    /// 主时钟角色在起播和 Seek 落地时重定位播放时钟
    pub fn is_master(&self) -> bool {
        !matches!(self, SyncRole::VideoFollower)
    }
}

/// 解码线程统计（原子计数，可在任意线程读取）
#[derive(Debug)]
pub struct WorkerStats {
    frames_emitted: AtomicU64,
    frames_skipped: AtomicU64,
    units_discarded: AtomicU64,
    decode_errors: AtomicU64,
    last_delay_us: AtomicI64,
    resumes: AtomicU64,
    resume_delay: Mutex<Option<(u64, i64)>>,
    finished: AtomicBool,
}

/// 统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub frames_emitted: u64,
    /// Seek 后时间戳早于目标而被跳过的帧
    pub frames_skipped: u64,
    /// 出队后发现已被 Seek 作废而丢弃的包/帧
    pub units_discarded: u64,
    pub decode_errors: u64,
    pub last_delay_us: Option<i64>,
    /// 暂停后恢复播放的次数（不含首次起播）
    pub resumes: u64,
    /// 最近一次恢复后算出的第一个同步延迟：(第几次恢复, 延迟微秒)
    pub resume_delay: Option<(u64, i64)>,
    pub finished: bool,
}

impl WorkerStats {
    fn new() -> Self {
        Self {
            frames_emitted: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            units_discarded: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            last_delay_us: AtomicI64::new(NO_PTS),
            resumes: AtomicU64::new(0),
            resume_delay: Mutex::new(None),
            finished: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        let last_delay = self.last_delay_us.load(Ordering::Relaxed);
        WorkerStatsSnapshot {
            frames_emitted: self.frames_emitted.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            units_discarded: self.units_discarded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            last_delay_us: (last_delay != NO_PTS).then_some(last_delay),
            resumes: self.resumes.load(Ordering::Relaxed),
            resume_delay: *self.resume_delay.lock(),
            finished: self.finished.load(Ordering::Acquire),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// 解码线程的统一控制接口（管理器不关心包的具体类型）
pub trait WorkerControl: Send {
    fn kind(&self) -> StreamKind;

    /// 队列中等待解码的包数
    fn queue_depth(&self) -> usize;

    fn queue_capacity(&self) -> usize;

    /// 是否还在寻找 Seek 后的首个有效帧
    fn seek_active(&self) -> bool;

    fn stats(&self) -> WorkerStatsSnapshot;

    fn is_finished(&self) -> bool;

    /// 关闭输入队列，唤醒阻塞在出队上的线程
    fn close(&self);

    fn join(&mut self);
}

/// 已启动的解码线程
pub struct WorkerHandle<P> {
    kind: StreamKind,
    queue: Arc<PacketQueue<P>>,
    stats: Arc<WorkerStats>,
    thread: Option<JoinHandle<()>>,
}

impl<P: Send> WorkerControl for WorkerHandle<P> {
    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn queue_depth(&self) -> usize {
        self.queue.size()
    }

    fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    fn seek_active(&self) -> bool {
        self.queue.seek_target().is_some()
    }

    fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    fn is_finished(&self) -> bool {
        self.stats.is_finished()
    }

    fn close(&self) {
        self.queue.close();
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("{} ❌ {}解码线程异常退出", log_ctx(), self.kind.as_str());
            }
        }
    }
}

/// 解码线程参数
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    /// 同步等待单次最长睡眠
    pub pacing_slice: Duration,
    /// 视频跟随音频时允许音频时间戳落后主时钟的上限（微秒）
    pub audio_stall_us: i64,
}

/// 同步等待结果
enum Pacing {
    Due,
    Aborted,
}

pub struct DecodeWorker<D: StreamDecoder, C> {
    kind: StreamKind,
    role: SyncRole,
    time_base: TimeBase,
    decoder: D,
    converter: C,
    queue: Arc<PacketQueue<D::Packet>>,
    shared: Arc<PipelineShared>,
    sink: Arc<dyn PresentationSink>,
    stats: Arc<WorkerStats>,
    options: WorkerOptions,

    epoch: u64,
    seek_target: Option<i64>,
    needs_rebase: bool,
    pending_resume: Option<u64>,
    last_pts: Option<i64>,
}

impl<D, C> DecodeWorker<D, C>
where
    D: StreamDecoder + 'static,
    D::Packet: Send + 'static,
    C: FrameConverter<D::Frame> + 'static,
{
    pub fn new(
        stream: &StreamDescriptor,
        decoder: D,
        converter: C,
        queue: Arc<PacketQueue<D::Packet>>,
        shared: Arc<PipelineShared>,
        sink: Arc<dyn PresentationSink>,
        options: WorkerOptions,
    ) -> Self {
        let role = SyncRole::for_stream(stream.kind, shared.has_audio);
        let epoch = queue.epoch();
        Self {
            kind: stream.kind,
            role,
            time_base: stream.time_base,
            decoder,
            converter,
            queue,
            shared,
            sink,
            stats: Arc::new(WorkerStats::new()),
            options,
            epoch,
            seek_target: None,
            needs_rebase: role.is_master(),
            pending_resume: None,
            last_pts: None,
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    pub fn spawn(self) -> Result<WorkerHandle<D::Packet>> {
        let kind = self.kind;
        let queue = self.queue.clone();
        let stats = self.stats.clone();
        let thread = thread::Builder::new()
            .name(format!("{}-decode", kind.as_str()))
            .spawn(move || self.run())
            .map_err(PlayerError::IoError)?;
        Ok(WorkerHandle {
            kind,
            queue,
            stats,
            thread: Some(thread),
        })
    }

    fn label(&self) -> &'static str {
        match self.kind {
            StreamKind::Video => "🎬 视频",
            StreamKind::Audio => "🔊 音频",
        }
    }

    fn run(mut self) {
        info!(
            "{} {}解码线程启动（{:?}，{}）",
            log_ctx(),
            self.label(),
            self.role,
            self.decoder.info()
        );

        let mut packet_count: u64 = 0;

        while self.shared.is_running() {
            if !self.wait_if_paused() {
                break;
            }

            match self.queue.pop() {
                PopResult::Closed => {
                    info!("{} {}解码线程检测到队列关闭，准备退出", log_ctx(), self.label());
                    break;
                }
                PopResult::EndOfStream { epoch, seek_target } => {
                    self.adopt_epoch(epoch, seek_target);
                    self.finish_stream();
                }
                PopResult::Unit(popped) => {
                    self.adopt_epoch(popped.epoch, popped.seek_target);

                    // 出队之后、解码之前又发生了 Seek：这个包已经过期
                    if self.queue.epoch() != self.epoch {
                        self.stats.units_discarded.fetch_add(1, Ordering::Relaxed);
                        debug!("{} {}包在 Seek 后过期，丢弃", log_ctx(), self.label());
                        continue;
                    }

                    packet_count += 1;
                    if packet_count % 500 == 0 {
                        debug!("{} 📦 {}已接收 {} 个包", log_ctx(), self.label(), packet_count);
                    }

                    if let Err(e) = self.decoder.submit(&popped.unit) {
                        self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                        warn!("{} {}解码错误（已跳过）: {}", log_ctx(), self.label(), e);
                        continue;
                    }
                    drop(popped);
                    self.receive_frames();
                }
            }
        }

        info!(
            "{} {}解码线程结束（输出 {} 帧）",
            log_ctx(),
            self.label(),
            self.stats.frames_emitted.load(Ordering::Relaxed)
        );
    }

    /// 发现新的 Seek 代：清空解码器，接管新的 Seek 目标
    fn adopt_epoch(&mut self, epoch: u64, seek_target: Option<i64>) {
        if epoch == self.epoch {
            return;
        }
        info!(
            "{} 🔄 {}解码线程：执行 flush 解码器（代 {} → {}，目标 {:?}us）",
            log_ctx(),
            self.label(),
            self.epoch,
            epoch,
            seek_target
        );
        self.decoder.flush();
        self.epoch = epoch;
        self.seek_target = seek_target;
        self.needs_rebase = self.role.is_master();
        self.last_pts = None;
        self.stats.finished.store(false, Ordering::Release);
        if self.kind == StreamKind::Audio {
            self.shared.sync.set_audio_finished(false);
            self.sink.audio_reset();
        }
    }

    /// 取出解码器里所有可用的帧
    fn receive_frames(&mut self) {
        loop {
            match self.decoder.receive() {
                Ok(Some(frame)) => {
                    if !self.handle_frame(frame) {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("{} {}解码错误（已跳过）: {}", log_ctx(), self.label(), e);
                    break;
                }
            }
        }
    }

    /// 返回 false 表示本轮应停止取帧（Seek 作废或停止播放）
    fn handle_frame(&mut self, frame: D::Frame) -> bool {
        let pts = match frame.pts() {
            Some(ticks) => self.time_base.to_micros(ticks),
            None => self.last_pts.unwrap_or(0),
        };
        self.last_pts = Some(pts);

        // Seek 后跳过目标之前的帧
        let landing = match self.seek_target {
            Some(target) if pts < target => {
                self.stats.frames_skipped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "{} {} Seek 后跳过旧帧: PTS={}us < {}us",
                    log_ctx(),
                    self.label(),
                    pts,
                    target
                );
                return true;
            }
            Some(_) => true,
            None => false,
        };

        if self.needs_rebase {
            self.shared.clock.rebase(pts, self.shared.clock.now());
            self.needs_rebase = false;
            debug!("{} ⏱ {}重定位播放时钟到 {}us", log_ctx(), self.label(), pts);
        }

        if let Pacing::Aborted = self.pace(pts) {
            return false;
        }

        let output = match self.converter.convert(frame, pts) {
            Ok(output) => output,
            Err(e) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!("{} {}格式转换失败（已跳过）: {}", log_ctx(), self.label(), e);
                return true;
            }
        };

        // 呈现和写 PTS 期间 flush 会等待，换代后旧帧不会再送出
        let sink = &*self.sink;
        let sync = &self.shared.sync;
        let kind = self.kind;
        let presented = self.queue.with_current_epoch(self.epoch, || {
            output.present(sink);
            match kind {
                StreamKind::Audio => sync.set_audio_pts(pts),
                StreamKind::Video => sync.set_video_pts(pts),
            }
        });
        if presented.is_none() {
            self.stats.units_discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let emitted = self.stats.frames_emitted.fetch_add(1, Ordering::Relaxed) + 1;
        if emitted <= 5 || emitted % 100 == 0 {
            debug!("{} {}帧 #{}: PTS={}us", log_ctx(), self.label(), emitted, pts);
        }

        if landing {
            self.seek_target = None;
            if self.queue.complete_seek(self.epoch) {
                info!("{} ✅ {}找到 Seek 后的首个有效帧: PTS={}us", log_ctx(), self.label(), pts);
            }
        }
        true
    }

    /// 同步参考时间（微秒）
    fn reference_time(&self) -> i64 {
        let now = self.shared.clock.now();
        match self.role {
            SyncRole::AudioMaster | SyncRole::VideoMaster => now,
            SyncRole::VideoFollower => {
                let sync = &self.shared.sync;
                match sync.audio_pts() {
                    Some(audio) if !sync.is_audio_finished() => {
                        audio.max(now - self.options.audio_stall_us)
                    }
                    _ => now,
                }
            }
        }
    }

    /// 分片睡眠直到帧到期；每片之间检查停止、暂停和 Seek
    fn pace(&mut self, pts: i64) -> Pacing {
        let mut first = true;
        loop {
            if !self.shared.is_running() || self.queue.epoch() != self.epoch {
                return Pacing::Aborted;
            }
            if !self.shared.control.is_playing() {
                if !self.wait_if_paused() {
                    return Pacing::Aborted;
                }
                continue;
            }

            let delay = pts - self.reference_time();
            if first {
                self.stats.last_delay_us.store(delay, Ordering::Relaxed);
                first = false;
            }
            if let Some(ordinal) = self.pending_resume.take() {
                *self.stats.resume_delay.lock() = Some((ordinal, delay));
                debug!("{} ▶ {}恢复后首个同步延迟: {}us", log_ctx(), self.label(), delay);
            }

            if delay <= 0 {
                return Pacing::Due;
            }
            let slice = Duration::from_micros(delay as u64).min(self.options.pacing_slice);
            thread::sleep(slice);
        }
    }

    /// 暂停时阻塞；返回 false 表示已停止
    fn wait_if_paused(&mut self) -> bool {
        let control = &self.shared.control;
        if control.is_playing() {
            return self.shared.is_running();
        }
        debug!("{} ⏸ {}解码线程暂停", log_ctx(), self.label());
        if !control.wait_while_paused() {
            return false;
        }
        let ordinal = self.stats.resumes.fetch_add(1, Ordering::Relaxed) + 1;
        self.pending_resume = Some(ordinal);
        if self.kind == StreamKind::Audio {
            self.sink.audio_reset();
        }
        debug!("{} ▶ {}解码线程恢复", log_ctx(), self.label());
        self.shared.is_running()
    }

    /// 输入结束：放完解码器里缓存的帧
    fn finish_stream(&mut self) {
        if self.stats.is_finished() {
            return;
        }
        match self.decoder.send_eof() {
            Ok(()) => self.receive_frames(),
            Err(e) => warn!("{} {}解码器 drain 失败: {}", log_ctx(), self.label(), e),
        }
        self.decoder.flush();

        // 流在到达 Seek 目标之前就结束了
        if self.seek_target.take().is_some() {
            self.queue.complete_seek(self.epoch);
        }
        if self.queue.epoch() != self.epoch {
            return;
        }
        self.stats.finished.store(true, Ordering::Release);
        if self.kind == StreamKind::Audio {
            self.shared.sync.set_audio_finished(true);
        }
        info!(
            "{} 📄 {}流播放完毕（共 {} 帧）",
            log_ctx(),
            self.label(),
            self.stats.frames_emitted.load(Ordering::Relaxed)
        );
    }
}
