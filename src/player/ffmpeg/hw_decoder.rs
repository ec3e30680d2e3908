use crate::core::{HwDeviceKind, PlayerError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;
use ffmpeg_next::util;
use log::{debug, info, warn};
use std::ptr;

impl HwDeviceKind {
    /// 转换为 FFmpeg 硬件设备类型
    pub fn to_ffmpeg_type(&self) -> ffi::AVHWDeviceType {
        match self {
            HwDeviceKind::Cuda => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
            HwDeviceKind::D3D11VA => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA,
            HwDeviceKind::DXVA2 => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2,
            HwDeviceKind::VAAPI => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
            HwDeviceKind::VideoToolbox => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX,
            HwDeviceKind::QSV => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_QSV,
        }
    }
}

/// 硬件设备上下文（AVBufferRef 引用）
pub struct HwDeviceContext {
    kind: HwDeviceKind,
    ptr: *mut ffi::AVBufferRef,
}

// 设备上下文由引用计数管理，只在所属解码线程里使用
unsafe impl Send for HwDeviceContext {}

impl HwDeviceContext {
    /// 创建硬件设备，失败返回 HardwareError（不回退软解）
    pub fn create(kind: HwDeviceKind) -> Result<Self> {
        let mut device: *mut ffi::AVBufferRef = ptr::null_mut();
        let ret = unsafe {
            ffi::av_hwdevice_ctx_create(
                &mut device,
                kind.to_ffmpeg_type(),
                ptr::null(),
                ptr::null_mut(),
                0,
            )
        };

        if ret < 0 || device.is_null() {
            warn!("✗ {} 硬件设备创建失败: {}", kind.name(), ffmpeg::Error::from(ret));
            return Err(PlayerError::HardwareError(format!(
                "无法创建 {} 硬件设备: {}",
                kind.name(),
                ffmpeg::Error::from(ret)
            )));
        }

        info!("✓ 已创建 {} 硬件设备", kind.name());
        Ok(Self { kind, ptr: device })
    }

    pub fn kind(&self) -> HwDeviceKind {
        self.kind
    }

    /// 把设备挂到解码器上下文（必须在 open 之前调用）
    pub fn attach(&self, context: &mut ffmpeg::codec::context::Context) -> Result<()> {
        unsafe {
            let codec_ctx = context.as_mut_ptr();
            let device_ref = ffi::av_buffer_ref(self.ptr);
            if device_ref.is_null() {
                return Err(PlayerError::HardwareError("av_buffer_ref 失败".to_string()));
            }
            (*codec_ctx).hw_device_ctx = device_ref;
        }
        debug!("已将 {} 设备挂到解码器", self.kind.name());
        Ok(())
    }
}

impl Drop for HwDeviceContext {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                ffi::av_buffer_unref(&mut self.ptr);
            }
        }
    }
}

/// 帧是否位于显存（带 hw_frames_ctx）
pub fn is_hardware_frame(frame: &util::frame::Video) -> bool {
    unsafe { !(*frame.as_ptr()).hw_frames_ctx.is_null() }
}

/// 显存帧 → 内存帧（保留 pts 等属性）
pub fn transfer_to_system(frame: &util::frame::Video) -> Result<util::frame::Video> {
    let mut sw_frame = util::frame::Video::empty();
    unsafe {
        let ret = ffi::av_hwframe_transfer_data(sw_frame.as_mut_ptr(), frame.as_ptr(), 0);
        if ret < 0 {
            return Err(PlayerError::HardwareError(format!(
                "显存帧下载失败: {}",
                ffmpeg::Error::from(ret)
            )));
        }
        let ret = ffi::av_frame_copy_props(sw_frame.as_mut_ptr(), frame.as_ptr());
        if ret < 0 {
            return Err(PlayerError::HardwareError(format!(
                "复制帧属性失败: {}",
                ffmpeg::Error::from(ret)
            )));
        }
    }
    Ok(sw_frame)
}
