use crate::core::{CompressedUnit, PlayerError, Result, TimeBase};
use crate::player::demuxer_source::DemuxerSource;
use crate::player::log_ctx;
use crate::player::packet_queue::{PacketQueue, PushResult};
use crate::player::shared::{PipelineShared, SeekRequest};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Demuxer 线程命令
#[derive(Debug, Clone, Copy)]
pub enum DemuxerCommand {
    Seek(SeekRequest),
    Stop,
}

/// Demuxer 线程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReaderState {
    Reading = 0,
    SeekPending = 1,
    EndOfFile = 2,
    Stopped = 3,
}

impl ReaderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReaderState::Reading,
            1 => ReaderState::SeekPending,
            2 => ReaderState::EndOfFile,
            _ => ReaderState::Stopped,
        }
    }
}

/// 读包统计
#[derive(Debug)]
pub struct ReaderStats {
    packets_read: AtomicU64,
    packets_discarded: AtomicU64,
    seeks: AtomicU64,
    state: AtomicU8,
}

impl ReaderStats {
    fn new() -> Self {
        Self {
            packets_read: AtomicU64::new(0),
            packets_discarded: AtomicU64::new(0),
            seeks: AtomicU64::new(0),
            state: AtomicU8::new(ReaderState::Reading as u8),
        }
    }

    pub fn packets_read(&self) -> u64 {
        self.packets_read.load(Ordering::Relaxed)
    }

    /// 不属于已选中流而被丢弃的包
    pub fn packets_discarded(&self) -> u64 {
        self.packets_discarded.load(Ordering::Relaxed)
    }

    /// 成功执行的 Seek 次数
    pub fn seeks(&self) -> u64 {
        self.seeks.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> ReaderState {
        ReaderState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ReaderState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// 流索引 → 包队列
pub struct StreamRoute<P> {
    pub stream_index: usize,
    pub queue: Arc<PacketQueue<P>>,
}

/// Seek 所用的参考流（有视频用视频，否则用音频）
#[derive(Debug, Clone, Copy)]
pub struct SeekStream {
    pub index: usize,
    pub time_base: TimeBase,
}

/// Demuxer 线程管理器
///
/// - 读到的包按流索引分发到各自的有界队列，队列满时阻塞（背压）
/// - Seek/Stop 通过命令通道下发，每轮循环用 try_recv() 取空，连续的 Seek 只执行最后一个
pub struct DemuxerThread {
    thread_handle: Option<JoinHandle<()>>,
    command_tx: Sender<DemuxerCommand>,
    stats: Arc<ReaderStats>,
}

impl DemuxerThread {
    /// 启动 Demuxer 线程
    pub fn start<D>(
        demuxer: D,
        routes: Vec<StreamRoute<D::Packet>>,
        seek_stream: SeekStream,
        shared: Arc<PipelineShared>,
        eof_poll: Duration,
    ) -> Result<Self>
    where
        D: DemuxerSource + 'static,
    {
        let (command_tx, command_rx) = unbounded::<DemuxerCommand>();
        let stats = Arc::new(ReaderStats::new());

        let reader = Reader {
            demuxer,
            routes,
            seek_stream,
            shared,
            command_rx,
            stats: stats.clone(),
            eof_poll,
            at_eof: false,
            pending: None,
        };

        let thread_handle = thread::Builder::new()
            .name("demuxer".to_string())
            .spawn(move || reader.run())?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            command_tx,
            stats,
        })
    }

    /// 发送 Seek 命令
    pub fn seek(&self, request: SeekRequest) -> Result<()> {
        self.command_tx
            .send(DemuxerCommand::Seek(request))
            .map_err(|e| PlayerError::Other(format!("发送 Seek 命令失败: {}", e)))
    }

    pub fn stats(&self) -> &ReaderStats {
        &self.stats
    }

    /// 停止线程：发送 Stop 命令并 join
    ///
    /// 调用方需要先关闭包队列，否则阻塞在 push 上的线程要等到下一次检查命令才会退出。
    pub fn stop(&mut self) {
        info!("{} 🛑 DemuxerThread::stop() called", log_ctx());
        let _ = self.command_tx.send(DemuxerCommand::Stop);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("{} ❌ Demuxer 线程异常退出", log_ctx());
            }
        }
    }
}

impl Drop for DemuxerThread {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("{} ⚠ DemuxerThread 被 drop，但可能未调用 stop()，正在尝试优雅停止", log_ctx());
            self.stop();
        }
    }
}

/// 命令处理结果
enum Flow {
    Continue,
    Seek(SeekRequest),
    Stop,
}

struct Reader<D: DemuxerSource> {
    demuxer: D,
    routes: Vec<StreamRoute<D::Packet>>,
    seek_stream: SeekStream,
    shared: Arc<PipelineShared>,
    command_rx: Receiver<DemuxerCommand>,
    stats: Arc<ReaderStats>,
    eof_poll: Duration,
    at_eof: bool,
    /// 入队被打断、尚未送出的包
    pending: Option<CompressedUnit<D::Packet>>,
}

impl<D: DemuxerSource> Reader<D> {
    fn queue_for(&self, stream_index: usize) -> Option<Arc<PacketQueue<D::Packet>>> {
        self.routes
            .iter()
            .find(|r| r.stream_index == stream_index)
            .map(|r| r.queue.clone())
    }

    /// Demuxer 循环（在独立线程中运行）
    fn run(mut self) {
        info!("{} 🎬 Demuxer 线程启动: {}", log_ctx(), self.demuxer.description());

        let mut video_count: u64 = 0;
        let mut audio_count: u64 = 0;
        const LOG_FIRST_N: u64 = 5;

        while self.shared.is_running() {
            // 优先处理所有命令（非阻塞）
            match self.drain_commands(None) {
                Flow::Stop => break,
                Flow::Seek(request) => {
                    self.handle_seek(request);
                    continue;
                }
                Flow::Continue => {}
            }

            if self.at_eof {
                // 到达 EOF：保持线程存活，等待 Seek/Stop
                match self.command_rx.recv_timeout(self.eof_poll) {
                    Ok(cmd) => match self.drain_commands(Some(cmd)) {
                        Flow::Stop => break,
                        Flow::Seek(request) => self.handle_seek(request),
                        Flow::Continue => {}
                    },
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                continue;
            }

            // 上次入队被命令打断的包优先重新入队，Seek 失败时不丢包
            let unit = match self.pending.take() {
                Some(unit) => unit,
                None => match self.demuxer.read_packet() {
                    Ok(Some(unit)) => {
                        self.stats.packets_read.fetch_add(1, Ordering::Relaxed);
                        let Some(queue) = self.queue_for(unit.stream_index) else {
                            // 忽略未选中的流（字幕/数据等）
                            self.stats.packets_discarded.fetch_add(1, Ordering::Relaxed);
                            continue;
                        };

                        let count = match queue.kind() {
                            crate::core::StreamKind::Video => {
                                video_count += 1;
                                video_count
                            }
                            crate::core::StreamKind::Audio => {
                                audio_count += 1;
                                audio_count
                            }
                        };
                        if count <= LOG_FIRST_N || count % 500 == 0 {
                            debug!(
                                "{} 📦 Demuxer 读取{}包 #{}（队列 {}/{}）",
                                log_ctx(),
                                queue.kind().as_str(),
                                count,
                                queue.size(),
                                queue.capacity()
                            );
                        }
                        unit
                    }
                    Ok(None) => {
                        info!("{} 📄 Demuxer 到达文件末尾，等待命令（Seek/Stop）...", log_ctx());
                        self.mark_end_of_stream();
                        continue;
                    }
                    Err(e) => {
                        // 读包错误按文件结束处理，解码线程可以把缓存的帧放完，之后仍可 Seek
                        error!("{} ❌ 读取包失败: {}", log_ctx(), e);
                        self.mark_end_of_stream();
                        continue;
                    }
                },
            };

            let Some(queue) = self.queue_for(unit.stream_index) else {
                continue;
            };

            // 队列满时阻塞（背压），有新命令或停止时先把包留在手里
            let shared = &self.shared;
            let command_rx = &self.command_rx;
            match queue.push(unit, || !command_rx.is_empty() || !shared.is_running()) {
                PushResult::Pushed => {}
                PushResult::Interrupted(unit) => {
                    debug!("{} ↩ 入队被命令打断，暂存当前包", log_ctx());
                    self.pending = Some(unit);
                }
                PushResult::Closed(_) => {
                    info!("{} 队列已关闭，Demuxer 退出", log_ctx());
                    break;
                }
            }
        }

        self.stats.set_state(ReaderState::Stopped);
        info!(
            "{} 🛑 Demuxer 线程退出（共读取 {} 个包：{} 视频，{} 音频，丢弃 {}）",
            log_ctx(),
            self.stats.packets_read(),
            video_count,
            audio_count,
            self.stats.packets_discarded()
        );
    }

    /// 取空命令通道，连续的 Seek 只保留最后一个
    fn drain_commands(&self, first: Option<DemuxerCommand>) -> Flow {
        let mut pending: Option<SeekRequest> = None;
        let mut next = first;
        loop {
            let cmd = match next.take() {
                Some(cmd) => cmd,
                None => match self.command_rx.try_recv() {
                    Ok(cmd) => cmd,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return Flow::Stop,
                },
            };
            match cmd {
                DemuxerCommand::Seek(request) => {
                    if let Some(old) = pending.replace(request) {
                        debug!(
                            "{} ⏭ Seek #{} ({}us) 被 #{} 覆盖",
                            log_ctx(),
                            old.seq,
                            old.target_us,
                            request.seq
                        );
                        self.shared.seek.complete(old.seq);
                    }
                }
                DemuxerCommand::Stop => {
                    info!("{} ⏹ Demuxer 线程收到停止命令", log_ctx());
                    return Flow::Stop;
                }
            }
        }
        match pending {
            Some(request) => Flow::Seek(request),
            None => Flow::Continue,
        }
    }

    fn handle_seek(&mut self, request: SeekRequest) {
        info!(
            "{} ⏩ Demuxer 线程收到 Seek 命令 #{}: {}us",
            log_ctx(),
            request.seq,
            request.target_us
        );
        self.stats.set_state(ReaderState::SeekPending);

        let result = if self.demuxer.is_seekable() {
            let ticks = self.seek_stream.time_base.from_micros(request.target_us);
            self.demuxer.seek(self.seek_stream.index, ticks)
        } else {
            Err(PlayerError::SeekError("数据源不支持 Seek".to_string()))
        };

        match result {
            Ok(()) => {
                // 先清空队列并设置目标，再标记请求完成，外部不会看到“既无请求也无目标”的间隙
                let mut dropped = usize::from(self.pending.take().is_some());
                for route in &self.routes {
                    dropped += route.queue.flush(Some(request.target_us));
                }
                self.shared.sync.reset_audio();
                self.shared
                    .clock
                    .rebase(request.target_us, self.shared.clock.now());
                self.at_eof = false;
                self.stats.seeks.fetch_add(1, Ordering::Relaxed);
                info!(
                    "{} 🧹 Seek 成功，清空 {} 个旧包，等待解码端跳到 {}us",
                    log_ctx(),
                    dropped,
                    request.target_us
                );
            }
            Err(e) => {
                // 失败不影响当前播放
                error!("{} ❌ Seek 失败: {}", log_ctx(), e);
            }
        }

        self.shared.seek.complete(request.seq);
        self.stats.set_state(if self.at_eof {
            ReaderState::EndOfFile
        } else {
            ReaderState::Reading
        });
    }

    fn mark_end_of_stream(&mut self) {
        for route in &self.routes {
            route.queue.set_end_of_stream();
        }
        self.at_eof = true;
        self.stats.set_state(ReaderState::EndOfFile);
    }
}
