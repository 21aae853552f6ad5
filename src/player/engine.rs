use crate::core::{
    AudioSinkConfig, BuildInfo, LifecycleState, MediaSource, PlaybackEvent, PlayerError, Result,
};
use crate::player::audio_relay::{AudioBufferRelay, AudioDelivery};
use crate::renderer::{FrameDelivery, VideoFrameRelay};
use crossbeam_channel::Sender;
use log::{error, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;

/// 缩略图的最大字节数（RGBA）
pub const MAX_THUMBNAIL_BYTES: usize = 256 * 1024 * 1024;

/// 原生媒体引擎抽象接口
///
/// 解复用、解码、音视频同步都在引擎内部完成；转发层只负责把引擎线程
/// 交付的数据送到渲染线程和音频输出线程。
pub trait NativeEngine: Send + Sync {
    /// 启动引擎，之后引擎线程通过 `callbacks` 交付数据
    fn start(&self, callbacks: EngineCallbacks) -> Result<()>;

    /// 停止引擎并等待其所有线程退出；返回后不得再调用任何回调
    fn stop(&self);

    /// 播放媒体（立即返回，错误通过 `EngineCallbacks::report_event` 异步上报）
    fn read_media(&self, source: &MediaSource);

    /// 生成 RGBA 缩略图，失败返回 None
    ///
    /// 在独立线程上调用，调用方超时后不再等待结果。同一会话同时进行的调用
    /// 不超过 `thumbnail.max_in_flight` 个，尺寸不超过 `MAX_THUMBNAIL_BYTES`。
    fn thumbnail(&self, path: &str, width: u32, height: u32) -> Option<Vec<u8>>;

    /// 构建信息（无副作用）
    fn build_info(&self) -> BuildInfo;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String {
        "native engine".to_string()
    }
}

/// 引擎调用应用侧的入口
///
/// 每个回调都在生命周期读锁内执行：`destroy()` 拿到写锁时，
/// 所有进行中的交付已经结束，之后的回调直接被拒绝。
#[derive(Clone)]
pub struct EngineCallbacks {
    lifecycle: Arc<RwLock<LifecycleState>>,
    video: VideoFrameRelay,
    audio: Arc<AudioBufferRelay>,
    events: Sender<PlaybackEvent>,
}

impl EngineCallbacks {
    pub(crate) fn new(
        lifecycle: Arc<RwLock<LifecycleState>>,
        video: VideoFrameRelay,
        audio: Arc<AudioBufferRelay>,
        events: Sender<PlaybackEvent>,
    ) -> Self {
        Self {
            lifecycle,
            video,
            audio,
            events,
        }
    }

    /// 视频输出尺寸变化
    pub fn on_vout_size_changed(&self, width: u32, height: u32) {
        let state = self.lifecycle.read();
        if *state == LifecycleState::Initialized {
            self.video.on_vout_size_changed(width, height);
        }
    }

    /// 交付一帧，尺寸沿用最近一次 `on_vout_size_changed`
    pub fn on_frame_ready(&self, frame: Vec<u8>) -> FrameDelivery {
        let state = self.lifecycle.read();
        if *state != LifecycleState::Initialized {
            return FrameDelivery::Discarded;
        }
        self.video.on_frame_ready_current_size(frame)
    }

    /// 交付一帧（带尺寸）
    pub fn on_frame_ready_sized(&self, frame: Vec<u8>, width: u32, height: u32) -> FrameDelivery {
        let state = self.lifecycle.read();
        if *state != LifecycleState::Initialized {
            return FrameDelivery::Discarded;
        }
        self.video.on_frame_ready(frame, width, height)
    }

    /// 打开音频输出
    pub fn on_audio_sink_open(&self, sample_rate: u32, channels: u16, buffer_samples: u32) -> Result<()> {
        let state = self.lifecycle.read();
        if *state != LifecycleState::Initialized {
            return Err(PlayerError::lifecycle("on_audio_sink_open", *state));
        }
        info!("打开音频输出: {} Hz, {} 声道, {} 采样", sample_rate, channels, buffer_samples);
        self.audio
            .open_sink(AudioSinkConfig::new(sample_rate, channels, buffer_samples))
    }

    /// 交付一个 PCM 缓冲
    pub fn on_audio_buffer_ready(&self, data: Vec<u8>, size: usize, sample_count: usize) -> Result<AudioDelivery> {
        let state = self.lifecycle.read();
        if *state != LifecycleState::Initialized {
            return Err(PlayerError::lifecycle("on_audio_buffer_ready", *state));
        }
        self.audio.on_buffer_ready(data, size, sample_count)
    }

    /// 关闭音频输出
    pub fn on_audio_sink_close(&self) {
        let state = self.lifecycle.read();
        if *state == LifecycleState::Initialized {
            info!("关闭音频输出");
            self.audio.close_sink();
        }
    }

    /// 上报播放事件
    pub fn report_event(&self, event: PlaybackEvent) {
        match &event {
            PlaybackEvent::EncounteredError { mrl, reason } => {
                error!("❌ 播放失败 {}: {}", mrl, reason)
            }
            other => info!("播放事件: {:?}", other),
        }
        if self.events.send(event).is_err() {
            warn!("事件接收端已关闭");
        }
    }
}
