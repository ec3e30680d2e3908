use crate::core::{CompressedUnit, MediaInfo, Result, StreamDescriptor, StreamKind};

/// Demuxer 数据源抽象接口
///
/// 这个 trait 定义了所有 Demuxer 实现必须提供的方法。
/// `read_packet` 返回容器里所有流的包，是否丢弃由 Demuxer 线程根据已选中的流决定。
pub trait DemuxerSource: Send {
    /// 压缩包负载类型（对管线不透明）
    type Packet: Send + 'static;

    /// 已选中参与播放的流（每种类型至多一个）
    fn streams(&self) -> &[StreamDescriptor];

    /// 读取下一个媒体包
    ///
    /// 返回：
    /// - Ok(Some(unit)): 成功读取一个包
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误
    fn read_packet(&mut self) -> Result<Option<CompressedUnit<Self::Packet>>>;

    /// Seek 到 `target_ticks`（`stream_index` 所在流的时间基）之前最近的关键帧
    fn seek(&mut self, stream_index: usize, target_ticks: i64) -> Result<()>;

    /// 容器总时长（微秒），未知时为 0
    fn duration_us(&self) -> i64;

    /// 获取媒体信息
    fn media_info(&self) -> MediaInfo;

    /// 是否支持 seek
    fn is_seekable(&self) -> bool {
        true
    }

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;

    fn stream(&self, kind: StreamKind) -> Option<&StreamDescriptor> {
        self.streams().iter().find(|s| s.kind == kind)
    }

    fn video_stream(&self) -> Option<&StreamDescriptor> {
        self.stream(StreamKind::Video)
    }

    fn audio_stream(&self) -> Option<&StreamDescriptor> {
        self.stream(StreamKind::Audio)
    }
}
