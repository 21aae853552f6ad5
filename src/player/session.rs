use crate::core::{
    AudioClock, FrameSize, LifecycleState, MediaSource, PlaybackEvent, PlayerError, RelayConfig,
    Result, SinkState,
};
use crate::player::audio_output::AudioSinkFactory;
use crate::player::audio_relay::AudioBufferRelay;
use crate::player::engine::{EngineCallbacks, NativeEngine, MAX_THUMBNAIL_BYTES};
use crate::player::stats::{RelayStats, StatsSnapshot};
use crate::renderer::{RenderThread, SurfaceHandle, VideoFrameRelay};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::process;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// 占用一个缩略图线程名额，drop 时归还
struct ThumbnailSlot(Arc<AtomicUsize>);

impl ThumbnailSlot {
    fn acquire(in_flight: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then(|| n + 1))
            .ok()
            .map(|_| ThumbnailSlot(in_flight.clone()))
    }
}

impl Drop for ThumbnailSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// 默认音频输出
pub fn default_sink_factory() -> Arc<dyn AudioSinkFactory> {
    #[cfg(feature = "cpal-output")]
    {
        Arc::new(crate::player::audio_output::CpalAudioSinkFactory)
    }
    #[cfg(not(feature = "cpal-output"))]
    {
        Arc::new(crate::player::audio_output::NullAudioSinkFactory)
    }
}

/// 播放会话 - 持有引擎和两路转发，生命周期由调用方管理
///
/// 状态：Uninitialized -> init -> Initialized -> destroy -> Destroyed。
/// 除 `set_surface` 和构建信息外，所有播放操作都要求 Initialized。
pub struct EngineHandle {
    session_id: u64,
    engine: Arc<dyn NativeEngine>,
    config: RelayConfig,
    lifecycle: Arc<RwLock<LifecycleState>>,
    control: Mutex<()>,  // 串行化 init / destroy
    video: VideoFrameRelay,
    audio: Arc<AudioBufferRelay>,
    stats: Arc<RelayStats>,
    clock: AudioClock,
    render_thread: Mutex<Option<RenderThread>>,
    thumbnails_in_flight: Arc<AtomicUsize>,
    events_tx: Sender<PlaybackEvent>,
    events_rx: Receiver<PlaybackEvent>,
}

impl EngineHandle {
    pub fn new(engine: Arc<dyn NativeEngine>, config: RelayConfig) -> Result<Self> {
        Self::with_sink_factory(engine, config, default_sink_factory())
    }

    pub fn with_sink_factory(
        engine: Arc<dyn NativeEngine>,
        config: RelayConfig,
        sink_factory: Arc<dyn AudioSinkFactory>,
    ) -> Result<Self> {
        config.validate()?;

        let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let stats = Arc::new(RelayStats::new());
        let clock = AudioClock::new();
        let video = VideoFrameRelay::new(stats.clone());
        let audio = Arc::new(AudioBufferRelay::new(
            config.audio.clone(),
            sink_factory,
            stats.clone(),
            clock.clone(),
        ));
        let (events_tx, events_rx) = unbounded();

        info!("{} 🎮 创建会话 #{}: {}", log_ctx(), session_id, engine.description());

        Ok(Self {
            session_id,
            engine,
            config,
            lifecycle: Arc::new(RwLock::new(LifecycleState::Uninitialized)),
            control: Mutex::new(()),
            video,
            audio,
            stats,
            clock,
            render_thread: Mutex::new(None),
            thumbnails_in_flight: Arc::new(AtomicUsize::new(0)),
            events_tx,
            events_rx,
        })
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn state(&self) -> LifecycleState {
        *self.lifecycle.read()
    }

    pub fn sink_state(&self) -> SinkState {
        self.audio.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// 音频播放位置（毫秒）
    pub fn audio_position_ms(&self) -> i64 {
        self.clock.position_ms()
    }

    /// 引擎异步上报的播放事件
    pub fn events(&self) -> Receiver<PlaybackEvent> {
        self.events_rx.clone()
    }

    fn callbacks(&self) -> EngineCallbacks {
        EngineCallbacks::new(
            self.lifecycle.clone(),
            self.video.clone(),
            self.audio.clone(),
            self.events_tx.clone(),
        )
    }

    fn require_initialized(&self, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state != LifecycleState::Initialized {
            return Err(PlayerError::lifecycle(operation, state));
        }
        Ok(())
    }

    /// 初始化引擎；成功后重复调用无效果
    pub fn init(&self) -> Result<()> {
        let _control = self.control.lock();

        {
            let mut state = self.lifecycle.write();
            match *state {
                LifecycleState::Initialized => {
                    debug!("会话 #{} 已初始化，忽略重复 init", self.session_id);
                    return Ok(());
                }
                LifecycleState::Destroyed => {
                    return Err(PlayerError::lifecycle("init", LifecycleState::Destroyed));
                }
                LifecycleState::Uninitialized => {}
            }
            // 引擎可能在 start() 内就开始回调
            *state = LifecycleState::Initialized;
        }

        info!("{} 🚀 初始化会话 #{}", log_ctx(), self.session_id);

        if let Err(e) = self.engine.start(self.callbacks()) {
            error!("{} ❌ 引擎启动失败: {}", log_ctx(), e);
            self.rollback_init();
            return Err(match e {
                PlayerError::EngineInit(reason) => PlayerError::EngineInit(reason),
                other => PlayerError::EngineInit(other.to_string()),
            });
        }

        let poll = Duration::from_millis(self.config.video.render_poll_ms);
        match RenderThread::start(self.video.clone(), poll) {
            Ok(render_thread) => {
                *self.render_thread.lock() = Some(render_thread);
            }
            Err(e) => {
                error!("{} ❌ 启动渲染线程失败: {}", log_ctx(), e);
                self.engine.stop();
                self.rollback_init();
                return Err(PlayerError::EngineInit(e.to_string()));
            }
        }

        info!("{} ✅ 会话 #{} 初始化完成", log_ctx(), self.session_id);
        Ok(())
    }

    fn rollback_init(&self) {
        *self.lifecycle.write() = LifecycleState::Uninitialized;
        self.audio.shutdown();
        self.video.discard_pending();
    }

    /// 销毁会话，可重复调用
    ///
    /// 返回后不会再有任何 surface 或音频输出回调。不要在引擎回调中调用。
    pub fn destroy(&self) {
        let _control = self.control.lock();

        if self.state() == LifecycleState::Destroyed {
            debug!("会话 #{} 已销毁，忽略重复 destroy", self.session_id);
            return;
        }

        // 阻塞在音频背压上的回调持有读锁，先放行
        self.audio.begin_shutdown();

        // 写锁等待进行中的回调结束，之后的回调都会被拒绝
        let previous = {
            let mut state = self.lifecycle.write();
            std::mem::replace(&mut *state, LifecycleState::Destroyed)
        };

        info!("{} 🛑 销毁会话 #{}", log_ctx(), self.session_id);

        if previous == LifecycleState::Initialized {
            self.engine.stop();
        }

        let render_thread = self.render_thread.lock().take();
        match render_thread {
            Some(mut render_thread) => render_thread.stop(),
            None => self.video.quiesce(),
        }
        self.audio.shutdown();

        let stats = self.stats.snapshot();
        info!(
            "{} ✅ 会话 #{} 已销毁（渲染 {} 帧，丢弃 {} 帧，播放 {} 个音频缓冲，欠载 {} 次）",
            log_ctx(),
            self.session_id,
            stats.frames_rendered,
            stats.frames_dropped,
            stats.audio_buffers_played,
            stats.audio_underruns
        );
    }

    /// 绑定/更换/解除渲染目标，init 前后都可以调用
    pub fn set_surface(&self, surface: Option<SurfaceHandle>) -> Result<()> {
        let state = self.state();
        if state == LifecycleState::Destroyed {
            return Err(PlayerError::lifecycle("set_surface", state));
        }
        self.video.set_surface(surface);
        Ok(())
    }

    /// 播放媒体；立即返回，播放错误通过 `events()` 上报
    pub fn read_media(&self, mrl: &str) -> Result<()> {
        self.require_initialized("read_media")?;
        let source = MediaSource::from_mrl(mrl)?;
        match &source {
            MediaSource::NetworkStream { url, protocol } => {
                info!("{} ▶ 读取网络流 [{}] {}", log_ctx(), protocol.as_str(), url)
            }
            other => info!("{} ▶ 读取 {}", log_ctx(), other.mrl()),
        }
        self.engine.read_media(&source);
        Ok(())
    }

    /// 获取缩略图（RGBA，width*height*4 字节），失败或超时返回 None
    pub fn get_thumbnail(&self, path: &str, width: u32, height: u32) -> Result<Option<Vec<u8>>> {
        self.require_initialized("get_thumbnail")?;
        let size = FrameSize::new(width, height);
        let expected = match size.rgba_len() {
            Some(len) if len > 0 && len <= MAX_THUMBNAIL_BYTES => len,
            _ => {
                warn!("缩略图尺寸无效: {}", size);
                return Ok(None);
            }
        };

        let slot = match ThumbnailSlot::acquire(
            &self.thumbnails_in_flight,
            self.config.thumbnail.max_in_flight,
        ) {
            Some(slot) => slot,
            None => {
                warn!(
                    "缩略图线程已达上限（{}），放弃: {}",
                    self.config.thumbnail.max_in_flight, path
                );
                return Ok(None);
            }
        };

        let timeout = Duration::from_millis(self.config.thumbnail.timeout_ms);
        let (tx, rx) = bounded(1);
        let engine = self.engine.clone();
        let owned_path = path.to_string();

        // 超时后工作线程自行结束，结果被丢弃；名额在引擎返回后归还
        thread::Builder::new()
            .name("thumbnailer".to_string())
            .spawn(move || {
                let result = engine.thumbnail(&owned_path, width, height);
                drop(slot);
                let _ = tx.send(result);
            })?;

        match rx.recv_timeout(timeout) {
            Ok(Some(data)) if data.len() == expected => Ok(Some(data)),
            Ok(Some(data)) => {
                warn!(
                    "缩略图大小不符: {} 字节，期望 {} 字节（{}）",
                    data.len(),
                    expected,
                    path
                );
                Ok(None)
            }
            Ok(None) => {
                debug!("无法生成缩略图: {}", path);
                Ok(None)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("生成缩略图超时（{:?}）: {}", timeout, path);
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("缩略图线程异常退出: {}", path);
                Ok(None)
            }
        }
    }

    pub fn version(&self) -> String {
        self.engine.build_info().version
    }

    pub fn compiler(&self) -> String {
        self.engine.build_info().compiler
    }

    pub fn changeset(&self) -> String {
        self.engine.build_info().changeset
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        match self.state() {
            LifecycleState::Destroyed => {}
            LifecycleState::Initialized => {
                warn!("{} ⚠ 会话 #{} 未调用 destroy() 就被 drop，正在销毁", log_ctx(), self.session_id);
                self.destroy();
            }
            LifecycleState::Uninitialized => self.destroy(),
        }
    }
}
