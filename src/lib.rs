//! 音视频播放管线：Demuxer 线程读包 → 有界包队列 → 音视频解码线程按音频主时钟呈现。
//!
//! 解封装/解码后端通过 [`player::MediaBackend`] 接入，启用 `ffmpeg` feature 时提供基于 FFmpeg 的实现；
//! 画面和声音交给 [`player::PresentationSink`]，启用 `audio-output` feature 时可以直接输出到声卡。

pub mod core;
pub mod player;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::core::{PipelineConfig, PlayerError, Result};
pub use crate::player::PlaybackManager;
