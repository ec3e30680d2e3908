use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    ConfigError(#[from] serde_json::Error),

    #[error("无效配置: {0}")]
    InvalidConfig(String),

    #[error("无法打开文件: {0}")]
    OpenError(String),

    #[error("无法找到视频流")]
    NoVideoStream,

    #[error("无法找到音频流")]
    NoAudioStream,

    #[error("没有可解码的音视频流")]
    NoPlayableStream,

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("硬件加速错误: {0}")]
    HardwareError(String),

    #[error("格式转换错误: {0}")]
    ConvertError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("Seek 失败: {0}")]
    SeekError(String),

    #[error("状态错误: {0}")]
    InvalidState(String),

    #[error("其他错误: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
