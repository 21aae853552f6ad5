// 原生媒体引擎转发层
//
// 引擎线程交付的视频帧经单槽位（latest-wins）送到渲染线程，
// PCM 缓冲经有界 FIFO 送到音频输出线程；会话对象负责生命周期和停止屏障。

pub mod core;
pub mod player;
pub mod renderer;

pub use crate::core::{PlayerError, RelayConfig, Result};
pub use crate::player::{EngineCallbacks, EngineHandle, NativeEngine};
pub use crate::renderer::{SurfaceHandle, VideoSurface};
