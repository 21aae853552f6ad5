use crate::core::{FrameSize, VideoFrame};
use std::sync::Arc;

/// 渲染目标
///
/// 两个回调都在渲染线程上执行。`on_mode_change` 总是先于对应尺寸的第一帧，
/// 实现方可以在这里重建纹理。
pub trait VideoSurface: Send + Sync {
    /// 视频尺寸变化（每次实际变化只调用一次）
    fn on_mode_change(&self, size: FrameSize);

    /// 绘制一帧
    fn draw(&self, frame: &VideoFrame);

    /// 描述信息（用于日志）
    fn description(&self) -> String {
        "surface".to_string()
    }
}

pub type SurfaceHandle = Arc<dyn VideoSurface>;
