//! 有界压缩包队列：Demuxer 线程生产，解码线程消费。
//!
//! 队列状态（包、Seek 代数、Seek 目标、EOF 标记）全部放在同一把锁下，
//! 所以 `flush` 与 `push`/`pop` 互斥：消费者要么拿到 flush 之前的包，要么拿到之后的包，
//! 不会看到一半。每次 flush 都会递增 `epoch`，解码线程据此判断“手里的包是不是已经过期”。

use crate::core::{CompressedUnit, StreamKind};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// 出队结果
#[derive(Debug)]
pub enum PopResult<P> {
    Unit(Popped<P>),
    /// 队列为空且 Demuxer 已读到文件末尾（每个 epoch 只报告一次）
    EndOfStream {
        epoch: u64,
        seek_target: Option<i64>,
    },
    /// 队列已关闭（停止播放）
    Closed,
}

/// 出队的包以及出队时刻的 Seek 状态
#[derive(Debug)]
pub struct Popped<P> {
    pub unit: CompressedUnit<P>,
    pub epoch: u64,
    pub seek_target: Option<i64>,
}

/// 入队结果，失败时把包还给调用方
#[derive(Debug)]
pub enum PushResult<P> {
    Pushed,
    Interrupted(CompressedUnit<P>),
    Closed(CompressedUnit<P>),
}

struct QueueState<P> {
    units: VecDeque<CompressedUnit<P>>,
    epoch: u64,
    seek_target: Option<i64>,
    post_flush: bool,
    end_of_stream: bool,
    eos_reported: bool,
    closed: bool,
}

pub struct PacketQueue<P> {
    kind: StreamKind,
    capacity: usize,
    wait_slice: Duration,
    state: Mutex<QueueState<P>>,
    /// flush 与“确认代数 + 呈现”互斥，flush 返回后不会再有旧帧被呈现
    present_guard: Mutex<()>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<P> PacketQueue<P> {
    pub fn new(kind: StreamKind, capacity: usize, wait_slice: Duration) -> Self {
        Self {
            kind,
            capacity: capacity.max(1),
            wait_slice,
            state: Mutex::new(QueueState {
                units: VecDeque::with_capacity(capacity.min(1024)),
                epoch: 0,
                seek_target: None,
                post_flush: false,
                end_of_stream: false,
                eos_reported: false,
                closed: false,
            }),
            present_guard: Mutex::new(()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 入队；队列满时分片等待，每片醒来检查一次 `interrupt`
    ///
    /// `interrupt` 在持锁状态下调用，不能反过来访问本队列。
    pub fn push<F>(&self, unit: CompressedUnit<P>, interrupt: F) -> PushResult<P>
    where
        F: Fn() -> bool,
    {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return PushResult::Closed(unit);
            }
            if state.units.len() < self.capacity {
                state.units.push_back(unit);
                state.post_flush = false;
                state.eos_reported = false;
                drop(state);
                self.not_empty.notify_one();
                return PushResult::Pushed;
            }
            if interrupt() {
                return PushResult::Interrupted(unit);
            }
            self.not_full.wait_for(&mut state, self.wait_slice);
        }
    }

    /// 非阻塞入队，队列满或已关闭时把包还回来
    pub fn try_push(&self, unit: CompressedUnit<P>) -> Result<(), CompressedUnit<P>> {
        match self.push(unit, || true) {
            PushResult::Pushed => Ok(()),
            PushResult::Interrupted(unit) | PushResult::Closed(unit) => Err(unit),
        }
    }

    /// 出队；队列为空时以 `wait_slice` 为粒度等待，直到有包、EOF 或关闭
    pub fn pop(&self) -> PopResult<P> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return PopResult::Closed;
            }
            if let Some(unit) = state.units.pop_front() {
                let popped = Popped {
                    unit,
                    epoch: state.epoch,
                    seek_target: state.seek_target,
                };
                drop(state);
                self.not_full.notify_one();
                return PopResult::Unit(popped);
            }
            if state.end_of_stream && !state.eos_reported {
                state.eos_reported = true;
                return PopResult::EndOfStream {
                    epoch: state.epoch,
                    seek_target: state.seek_target,
                };
            }
            self.not_empty.wait_for(&mut state, self.wait_slice);
        }
    }

    /// 原子地丢弃所有包并进入新的 Seek 代
    ///
    /// 返回丢弃的包数量。
    pub fn flush(&self, seek_target: Option<i64>) -> usize {
        let _present = self.present_guard.lock();
        let mut state = self.state.lock();
        let dropped = state.units.len();
        state.units.clear();
        state.epoch += 1;
        state.seek_target = seek_target;
        state.post_flush = true;
        state.end_of_stream = false;
        state.eos_reported = false;
        drop(state);
        self.not_full.notify_all();
        self.not_empty.notify_all();
        dropped
    }

    /// 仍处于 `epoch` 这一代时执行 `f`，期间 flush 会等待；代数已变化返回 None
    ///
    /// `f` 不能访问本队列。
    pub fn with_current_epoch<R>(&self, epoch: u64, f: impl FnOnce() -> R) -> Option<R> {
        let _present = self.present_guard.lock();
        if self.state.lock().epoch != epoch {
            return None;
        }
        Some(f())
    }

    /// 解码线程找到 Seek 后的首个有效帧时调用；只清除同一代的目标
    pub fn complete_seek(&self, epoch: u64) -> bool {
        let mut state = self.state.lock();
        if state.epoch == epoch && state.seek_target.is_some() {
            state.seek_target = None;
            true
        } else {
            false
        }
    }

    pub fn seek_target(&self) -> Option<i64> {
        self.state.lock().seek_target
    }

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn size(&self) -> usize {
        self.state.lock().units.len()
    }

    /// flush 之后还没有新包入队
    pub fn is_post_flush(&self) -> bool {
        self.state.lock().post_flush
    }

    pub fn set_end_of_stream(&self) {
        self.state.lock().end_of_stream = true;
        self.not_empty.notify_all();
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.state.lock().end_of_stream
    }

    /// 关闭队列并唤醒所有等待者
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.units.clear();
        drop(state);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn unit(n: u64) -> CompressedUnit<u64> {
        CompressedUnit {
            stream_index: 0,
            pts: Some(n as i64),
            payload: n,
        }
    }

    fn queue(capacity: usize) -> PacketQueue<u64> {
        PacketQueue::new(StreamKind::Video, capacity, Duration::from_millis(1))
    }

    fn pop_payload(q: &PacketQueue<u64>) -> u64 {
        match q.pop() {
            PopResult::Unit(p) => p.unit.payload,
            other => panic!("expected unit, got {other:?}"),
        }
    }

    #[test]
    fn pops_in_fifo_order() {
        let q = queue(8);
        for n in 0..5 {
            assert!(q.try_push(unit(n)).is_ok());
        }
        assert_eq!(q.size(), 5);
        for n in 0..5 {
            assert_eq!(pop_payload(&q), n);
        }
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn try_push_rejects_when_full() {
        let q = queue(3);
        for n in 0..3 {
            assert!(q.try_push(unit(n)).is_ok());
        }
        let rejected = q.try_push(unit(99)).unwrap_err();
        assert_eq!(rejected.payload, 99);
        assert_eq!(q.size(), 3);
    }

    #[test]
    fn blocked_push_resumes_after_pop() {
        let q = Arc::new(queue(2));
        q.try_push(unit(0)).unwrap();
        q.try_push(unit(1)).unwrap();

        let producer = {
            let q = q.clone();
            thread::spawn(move || matches!(q.push(unit(2), || false), PushResult::Pushed))
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(q.size(), 2);
        assert_eq!(pop_payload(&q), 0);
        assert!(producer.join().unwrap());
        assert_eq!(pop_payload(&q), 1);
        assert_eq!(pop_payload(&q), 2);
    }

    #[test]
    fn push_returns_unit_when_interrupted() {
        let q = queue(1);
        q.try_push(unit(0)).unwrap();
        let calls = AtomicUsize::new(0);
        let result = q.push(unit(7), || calls.fetch_add(1, Ordering::SeqCst) >= 3);
        match result {
            PushResult::Interrupted(u) => assert_eq!(u.payload, 7),
            other => panic!("expected interruption, got {other:?}"),
        }
        assert_eq!(q.size(), 1);
    }

    #[test]
    fn size_never_exceeds_capacity_under_contention() {
        let q = Arc::new(queue(16));
        let done = Arc::new(AtomicBool::new(false));

        let producer = {
            let q = q.clone();
            thread::spawn(move || {
                for n in 0..2_000 {
                    assert!(matches!(q.push(unit(n), || false), PushResult::Pushed));
                }
            })
        };
        let observer = {
            let q = q.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut max = 0;
                while !done.load(Ordering::SeqCst) {
                    max = max.max(q.size());
                }
                max
            })
        };

        let mut expected = 0;
        while expected < 2_000 {
            assert_eq!(pop_payload(&q), expected);
            expected += 1;
        }
        producer.join().unwrap();
        done.store(true, Ordering::SeqCst);
        assert!(observer.join().unwrap() <= 16);
    }

    #[test]
    fn flush_discards_and_starts_new_epoch() {
        let q = queue(8);
        for n in 0..4 {
            q.try_push(unit(n)).unwrap();
        }
        assert_eq!(q.epoch(), 0);
        assert!(!q.is_post_flush());

        assert_eq!(q.flush(Some(5_000_000)), 4);
        assert_eq!(q.size(), 0);
        assert_eq!(q.epoch(), 1);
        assert_eq!(q.seek_target(), Some(5_000_000));
        assert!(q.is_post_flush());

        q.try_push(unit(10)).unwrap();
        assert!(!q.is_post_flush());
        match q.pop() {
            PopResult::Unit(p) => {
                assert_eq!(p.unit.payload, 10);
                assert_eq!(p.epoch, 1);
                assert_eq!(p.seek_target, Some(5_000_000));
            }
            other => panic!("expected unit, got {other:?}"),
        }
    }

    #[test]
    fn consumer_never_sees_unit_from_previous_epoch() {
        // 生产者在同一线程里交替 push/flush（与 Demuxer 线程一致），
        // 负载记录入队时的代数；消费者拿到的包必须属于出队时的代。
        let q = Arc::new(queue(4));
        let producer = {
            let q = q.clone();
            thread::spawn(move || {
                let mut generation = 0u64;
                for n in 0..3_000u64 {
                    if n % 97 == 0 {
                        q.flush(None);
                        generation += 1;
                    }
                    let u = CompressedUnit {
                        stream_index: 0,
                        pts: None,
                        payload: generation,
                    };
                    if let PushResult::Closed(_) = q.push(u, || false) {
                        return;
                    }
                }
                q.set_end_of_stream();
            })
        };

        loop {
            match q.pop() {
                PopResult::Unit(p) => assert_eq!(p.unit.payload, p.epoch),
                PopResult::EndOfStream { .. } => break,
                PopResult::Closed => panic!("queue closed unexpectedly"),
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn end_of_stream_reported_once_per_epoch() {
        let q = Arc::new(queue(4));
        q.try_push(unit(1)).unwrap();
        q.set_end_of_stream();

        assert_eq!(pop_payload(&q), 1);
        assert!(matches!(q.pop(), PopResult::EndOfStream { epoch: 0, .. }));

        // 再次 pop 会阻塞，直到 flush 之后出现新包
        let consumer = {
            let q = q.clone();
            thread::spawn(move || match q.pop() {
                PopResult::Unit(p) => (p.unit.payload, p.epoch),
                other => panic!("expected unit, got {other:?}"),
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(q.is_end_of_stream());
        q.flush(Some(0));
        assert!(!q.is_end_of_stream());
        q.try_push(unit(42)).unwrap();
        assert_eq!(consumer.join().unwrap(), (42, 1));
    }

    #[test]
    fn flush_waits_for_running_presentation() {
        let q = Arc::new(queue(4));
        let presenting = Arc::new(AtomicBool::new(false));
        let presenter = {
            let q = q.clone();
            let presenting = presenting.clone();
            thread::spawn(move || {
                q.with_current_epoch(0, || {
                    presenting.store(true, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(40));
                    presenting.store(false, Ordering::SeqCst);
                })
            })
        };
        while !presenting.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        q.flush(Some(1_000));
        // flush 返回时呈现必须已经结束
        assert!(!presenting.load(Ordering::SeqCst));
        assert_eq!(presenter.join().unwrap(), Some(()));

        assert_eq!(q.with_current_epoch(0, || ()), None);
        assert_eq!(q.with_current_epoch(1, || 7), Some(7));
    }

    #[test]
    fn complete_seek_ignores_stale_epoch() {
        let q = queue(4);
        q.flush(Some(1_000));
        q.flush(Some(2_000));
        assert!(!q.complete_seek(1));
        assert_eq!(q.seek_target(), Some(2_000));
        assert!(q.complete_seek(2));
        assert_eq!(q.seek_target(), None);
        assert!(!q.complete_seek(2));
    }

    #[test]
    fn close_wakes_blocked_pop_and_push() {
        let q = Arc::new(queue(1));
        let consumer = {
            let q = q.clone();
            thread::spawn(move || matches!(q.pop(), PopResult::Closed))
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert!(consumer.join().unwrap());
        assert!(q.is_closed());
        assert!(matches!(q.push(unit(1), || false), PushResult::Closed(_)));
    }
}
