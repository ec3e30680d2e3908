use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 播放时钟 - 用于音视频同步（单位：微秒）
///
/// 逻辑时间 = 墙上时钟经过时间 - 锚点偏移。
/// 暂停补偿、Seek 重定位都只是对同一个原子偏移量做一次更新，
/// 因此任意线程读取 `now()` 都不会阻塞。
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<ClockInner>,
}

struct ClockInner {
    epoch: Instant,       // 墙上时钟基准时刻
    offset_us: AtomicI64, // 锚点偏移（微秒）
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClockInner {
                epoch: Instant::now(),
                offset_us: AtomicI64::new(0),
            }),
        }
    }

    fn elapsed_us(&self) -> i64 {
        self.inner.epoch.elapsed().as_micros() as i64
    }

    /// 获取当前播放时间（微秒）
    pub fn now(&self) -> i64 {
        self.elapsed_us() - self.inner.offset_us.load(Ordering::Acquire)
    }

    /// 暂停补偿：把锚点向后推移暂停时长，恢复后 `now()` 从暂停处继续
    pub fn compensate_pause(&self, paused: Duration) {
        let paused_us = paused.as_micros() as i64;
        self.inner.offset_us.fetch_add(paused_us, Ordering::AcqRel);
    }

    /// Seek 重定位：时钟整体平移 `target_us - reference_us`
    ///
    /// 调用后，时间戳为 `target_us` 的帧恰好在原本 `reference_us` 到期的时刻到期。
    /// 传入 `reference_us = now()` 即表示“`target_us` 这一帧现在到期”。
    pub fn rebase(&self, target_us: i64, reference_us: i64) {
        let shift = target_us - reference_us;
        self.inner.offset_us.fetch_sub(shift, Ordering::AcqRel);
    }

    /// 直接设置当前播放时间（微秒）
    pub fn set_time(&self, time_us: i64) {
        let offset = self.elapsed_us() - time_us;
        self.inner.offset_us.store(offset, Ordering::Release);
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
