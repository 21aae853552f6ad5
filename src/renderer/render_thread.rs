use crate::core::Result;
use crate::renderer::video_relay::VideoFrameRelay;
use log::{info, warn};
use std::process;
use std::thread::{self, JoinHandle};
use std::time::Duration;

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 渲染线程 - 被视频转发唤醒后把最新帧画到 surface 上
pub struct RenderThread {
    relay: VideoFrameRelay,
    thread_handle: Option<JoinHandle<()>>,
}

impl RenderThread {
    pub fn start(relay: VideoFrameRelay, poll_interval: Duration) -> Result<Self> {
        let thread_relay = relay.clone();
        let thread_handle = thread::Builder::new()
            .name("video-render".to_string())
            .spawn(move || Self::render_loop(thread_relay, poll_interval))?;

        Ok(Self {
            relay,
            thread_handle: Some(thread_handle),
        })
    }

    fn render_loop(relay: VideoFrameRelay, poll_interval: Duration) {
        info!("{} 🎨 渲染线程启动", log_ctx());
        let mut rendered: u64 = 0;

        while relay.is_accepting() {
            if relay.wait_for_work(poll_interval) && relay.render_pending() {
                rendered += 1;
            }
        }

        info!("{} 🛑 渲染线程退出（共处理 {} 次）", log_ctx(), rendered);
    }

    /// 停止转发并等待线程退出
    pub fn stop(&mut self) {
        self.relay.quiesce();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("{} ⚠ 渲染线程异常退出", log_ctx());
            }
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("{} ⚠ RenderThread 被 drop，但未调用 stop()，正在停止", log_ctx());
            self.stop();
        }
    }
}
