// 视频输出：渲染目标、帧转发与渲染线程

pub mod surface;
pub mod video_relay;
pub mod render_thread;

pub use surface::{SurfaceHandle, VideoSurface};
pub use video_relay::{FrameDelivery, VideoFrameRelay};
pub use render_thread::RenderThread;
