//! 管线各线程共享的控制状态。

use crate::core::PlaybackClock;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// 时间戳未知
pub const NO_PTS: i64 = i64::MIN;

/// 播放/暂停开关
///
/// 状态在互斥锁下修改并通过条件变量唤醒等待者，
/// 另外用原子量镜像一份 `playing`，同步等待的热路径不需要加锁。
pub struct PlaybackControl {
    state: Mutex<ControlState>,
    cv: Condvar,
    playing: AtomicBool,
}

struct ControlState {
    playing: bool,
    stopped: bool,
}

impl PlaybackControl {
    /// 新建时处于暂停状态
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControlState {
                playing: false,
                stopped: false,
            }),
            cv: Condvar::new(),
            playing: AtomicBool::new(false),
        }
    }

    /// 返回状态是否发生变化
    pub fn play(&self) -> bool {
        let mut state = self.state.lock();
        let changed = !state.playing;
        state.playing = true;
        self.playing.store(true, Ordering::Release);
        drop(state);
        self.cv.notify_all();
        changed
    }

    pub fn pause(&self) -> bool {
        let mut state = self.state.lock();
        let changed = state.playing;
        state.playing = false;
        self.playing.store(false, Ordering::Release);
        changed
    }

    /// 唤醒所有等待者并让它们退出
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        drop(state);
        self.cv.notify_all();
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// 阻塞直到恢复播放；返回 false 表示已停止
    pub fn wait_while_paused(&self) -> bool {
        let mut state = self.state.lock();
        while !state.playing && !state.stopped {
            self.cv.wait(&mut state);
        }
        !state.stopped
    }
}

impl Default for PlaybackControl {
    fn default() -> Self {
        Self::new()
    }
}

/// 音视频最近一次呈现的时间戳（微秒）
pub struct SyncState {
    audio_pts: AtomicI64,
    video_pts: AtomicI64,
    audio_finished: AtomicBool,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            audio_pts: AtomicI64::new(NO_PTS),
            video_pts: AtomicI64::new(NO_PTS),
            audio_finished: AtomicBool::new(false),
        }
    }

    pub fn audio_pts(&self) -> Option<i64> {
        match self.audio_pts.load(Ordering::Acquire) {
            NO_PTS => None,
            pts => Some(pts),
        }
    }

    pub fn video_pts(&self) -> Option<i64> {
        match self.video_pts.load(Ordering::Acquire) {
            NO_PTS => None,
            pts => Some(pts),
        }
    }

    pub fn set_audio_pts(&self, pts: i64) {
        self.audio_pts.store(pts, Ordering::Release);
    }

    pub fn set_video_pts(&self, pts: i64) {
        self.video_pts.store(pts, Ordering::Release);
    }

    /// Seek 后旧的音频时间戳作废，直到新的音频帧落地
    pub fn reset_audio(&self) {
        self.audio_pts.store(NO_PTS, Ordering::Release);
        self.audio_finished.store(false, Ordering::Release);
    }

    pub fn set_audio_finished(&self, finished: bool) {
        self.audio_finished.store(finished, Ordering::Release);
    }

    pub fn is_audio_finished(&self) -> bool {
        self.audio_finished.load(Ordering::Acquire)
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

/// Seek 请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub target_us: i64,
    pub seq: u64,
}

/// 记录已发出、已处理的 Seek 请求序号
pub struct SeekTracker {
    requested: AtomicU64,
    handled: AtomicU64,
    target_us: AtomicI64,
}

impl SeekTracker {
    pub fn new() -> Self {
        Self {
            requested: AtomicU64::new(0),
            handled: AtomicU64::new(0),
            target_us: AtomicI64::new(0),
        }
    }

    pub fn request(&self, target_us: i64) -> SeekRequest {
        self.target_us.store(target_us, Ordering::Release);
        let seq = self.requested.fetch_add(1, Ordering::AcqRel) + 1;
        SeekRequest { target_us, seq }
    }

    /// Demuxer 处理完（不论成功与否）后调用
    pub fn complete(&self, seq: u64) {
        self.handled.fetch_max(seq, Ordering::AcqRel);
    }

    pub fn is_pending(&self) -> bool {
        self.handled.load(Ordering::Acquire) < self.requested.load(Ordering::Acquire)
    }

    /// 最近一次请求的目标（微秒）
    pub fn last_target(&self) -> i64 {
        self.target_us.load(Ordering::Acquire)
    }
}

impl Default for SeekTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// 一次播放会话内各线程共享的状态
pub struct PipelineShared {
    running: AtomicBool,
    pub control: PlaybackControl,
    pub clock: PlaybackClock,
    pub sync: SyncState,
    pub seek: SeekTracker,
    pub has_video: bool,
    pub has_audio: bool,
}

impl PipelineShared {
    pub fn new(has_video: bool, has_audio: bool) -> Self {
        let clock = PlaybackClock::new();
        clock.set_time(0);
        Self {
            running: AtomicBool::new(true),
            control: PlaybackControl::new(),
            clock,
            sync: SyncState::new(),
            seek: SeekTracker::new(),
            has_video,
            has_audio,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.control.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_while_paused_returns_on_play() {
        let control = Arc::new(PlaybackControl::new());
        let waiter = {
            let control = control.clone();
            thread::spawn(move || control.wait_while_paused())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(control.play());
        assert!(!control.play());
        assert!(waiter.join().unwrap());
        assert!(control.is_playing());
    }

    #[test]
    fn shutdown_releases_paused_waiters() {
        let control = Arc::new(PlaybackControl::new());
        let waiter = {
            let control = control.clone();
            thread::spawn(move || control.wait_while_paused())
        };
        thread::sleep(Duration::from_millis(20));
        control.shutdown();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn seek_tracker_pending_until_latest_handled() {
        let tracker = SeekTracker::new();
        assert!(!tracker.is_pending());
        let first = tracker.request(1_000_000);
        let second = tracker.request(2_000_000);
        assert_eq!(tracker.last_target(), 2_000_000);
        tracker.complete(first.seq);
        assert!(tracker.is_pending());
        tracker.complete(second.seq);
        assert!(!tracker.is_pending());
        // 乱序完成不会让序号倒退
        tracker.complete(first.seq);
        assert!(!tracker.is_pending());
    }

    #[test]
    fn sync_state_reset_clears_audio() {
        let sync = SyncState::new();
        assert_eq!(sync.audio_pts(), None);
        sync.set_audio_pts(5_000_000);
        sync.set_audio_finished(true);
        sync.set_video_pts(4_000_000);
        sync.reset_audio();
        assert_eq!(sync.audio_pts(), None);
        assert!(!sync.is_audio_finished());
        assert_eq!(sync.video_pts(), Some(4_000_000));
    }
}
