// 播放器核心模块

pub mod backend;          // 解码后端 / 呈现端接口
pub mod demuxer_source;   // Demuxer 抽象接口
pub mod demuxer_thread;   // Demuxer 线程管理
pub mod packet_queue;     // 有界包队列（支持原子 flush）
pub mod shared;           // 线程间共享的控制状态
pub mod decode_worker;    // 音视频解码线程
pub mod manager;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
#[cfg(feature = "audio-output")]
pub mod audio_output;

pub use backend::{DecodedFrame, FrameConverter, MediaBackend, Presentable, PresentationSink, StreamDecoder};
pub use decode_worker::{SyncRole, WorkerStatsSnapshot};
pub use demuxer_source::DemuxerSource;
pub use demuxer_thread::{DemuxerThread, ReaderState};
pub use manager::PlaybackManager;
pub use packet_queue::PacketQueue;

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::FfmpegBackend;
#[cfg(feature = "audio-output")]
pub use audio_output::{AudioOutput, AudioWriter};

use std::process;
use std::thread;

/// 日志前缀：进程号 + 线程名
pub(crate) fn log_ctx() -> String {
    let current = thread::current();
    format!(
        "[pid:{} tid:{}]",
        process::id(),
        current.name().unwrap_or("main")
    )
}
