// 会话级集成测试：用脚本化的引擎驱动回调，检查生命周期和停止屏障

use crossbeam_channel::Receiver;
use media_relay::core::{
    AudioBuffer, AudioSinkConfig, BuildInfo, FrameSize, LifecycleState, MediaSource,
    PlaybackEvent, PlayerError, RelayConfig, Result, SinkState, ThumbnailConfig, VideoFrame,
};
use media_relay::player::{
    AudioSink, AudioSinkFactory, EngineCallbacks, EngineHandle, NativeEngine,
    NullAudioSinkFactory, SyntheticEngine,
};
use media_relay::renderer::{FrameDelivery, VideoSurface};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 由测试线程直接调用回调的引擎
#[derive(Default)]
struct ScriptedEngine {
    callbacks: Mutex<Option<EngineCallbacks>>,
    fail_starts: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    read: Mutex<Vec<MediaSource>>,
    thumbnails: AtomicUsize,
    thumbnail_len: usize,
    thumbnail_delay: Duration,
}

impl ScriptedEngine {
    fn callbacks(&self) -> EngineCallbacks {
        self.callbacks.lock().clone().expect("engine not started")
    }
}

impl NativeEngine for ScriptedEngine {
    fn start(&self, callbacks: EngineCallbacks) -> Result<()> {
        if self
            .fail_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PlayerError::Other("no decoder".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.callbacks.lock() = Some(callbacks);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn read_media(&self, source: &MediaSource) {
        self.read.lock().push(source.clone());
    }

    fn thumbnail(&self, _path: &str, _width: u32, _height: u32) -> Option<Vec<u8>> {
        self.thumbnails.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.thumbnail_delay);
        Some(vec![0; self.thumbnail_len])
    }

    fn build_info(&self) -> BuildInfo {
        BuildInfo {
            version: "3.0.20".to_string(),
            compiler: "scripted".to_string(),
            changeset: "abc123".to_string(),
        }
    }
}

/// 记录所有调用；`closed` 置位后的任何调用都计入 `late`
#[derive(Default)]
struct RecordingSurface {
    modes: Mutex<Vec<FrameSize>>,
    frames: Mutex<Vec<u64>>,
    closed: AtomicBool,
    late: AtomicUsize,
}

impl RecordingSurface {
    fn check_late(&self) {
        if self.closed.load(Ordering::SeqCst) {
            self.late.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl VideoSurface for RecordingSurface {
    fn on_mode_change(&self, size: FrameSize) {
        self.check_late();
        self.modes.lock().push(size);
    }

    fn draw(&self, frame: &VideoFrame) {
        self.check_late();
        assert_eq!(Some(frame.data.len()), frame.size().rgba_len());
        self.frames.lock().push(frame.sequence);
    }
}

#[derive(Default)]
struct RecordingSinkFactory {
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
    late: Arc<AtomicUsize>,
}

struct RecordingSink {
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
    late: Arc<AtomicUsize>,
}

impl AudioSink for RecordingSink {
    fn write(&mut self, buffer: &AudioBuffer) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            self.late.fetch_add(1, Ordering::SeqCst);
        }
        self.written.lock().push(buffer.payload().to_vec());
        Ok(())
    }

    fn description(&self) -> String {
        "recording".to_string()
    }
}

impl AudioSinkFactory for RecordingSinkFactory {
    fn open(&self, _config: &AudioSinkConfig) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(RecordingSink {
            written: self.written.clone(),
            closed: self.closed.clone(),
            late: self.late.clone(),
        }))
    }
}

fn session_with(engine: Arc<ScriptedEngine>, config: RelayConfig) -> (EngineHandle, Arc<RecordingSinkFactory>) {
    let factory = Arc::new(RecordingSinkFactory::default());
    let session = EngineHandle::with_sink_factory(engine, config, factory.clone()).unwrap();
    (session, factory)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

fn wait_for_event(events: &Receiver<PlaybackEvent>, timeout: Duration, wanted: impl Fn(&PlaybackEvent) -> bool) -> Vec<PlaybackEvent> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(remaining) {
            Ok(event) => {
                let done = wanted(&event);
                seen.push(event);
                if done {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    seen
}

#[test]
fn test_operations_before_init_are_invalid_state() {
    let engine = Arc::new(ScriptedEngine::default());
    let (session, _) = session_with(engine.clone(), RelayConfig::default());

    assert_eq!(session.state(), LifecycleState::Uninitialized);
    assert!(matches!(
        session.read_media("file:///a.mkv"),
        Err(PlayerError::InvalidState { operation: "read_media", .. })
    ));
    assert!(matches!(
        session.get_thumbnail("/a.mkv", 4, 4),
        Err(PlayerError::InvalidState { .. })
    ));
    // 构建信息与生命周期无关
    assert_eq!(session.version(), "3.0.20");
    assert_eq!(session.compiler(), "scripted");
    assert_eq!(session.changeset(), "abc123");
    assert!(engine.read.lock().is_empty());
}

#[test]
fn test_init_is_idempotent_and_destroy_is_final() {
    let engine = Arc::new(ScriptedEngine::default());
    let (session, _) = session_with(engine.clone(), RelayConfig::default());

    session.init().unwrap();
    session.init().unwrap();
    assert_eq!(engine.starts.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), LifecycleState::Initialized);

    session.destroy();
    session.destroy();
    assert_eq!(engine.stops.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), LifecycleState::Destroyed);

    assert!(matches!(session.init(), Err(PlayerError::InvalidState { .. })));
    assert!(matches!(session.read_media("a.mkv"), Err(PlayerError::InvalidState { .. })));
    assert!(session.set_surface(None).is_err());
}

#[test]
fn test_engine_start_failure_allows_retry() {
    let engine = Arc::new(ScriptedEngine {
        fail_starts: AtomicUsize::new(1),
        ..Default::default()
    });
    let (session, _) = session_with(engine.clone(), RelayConfig::default());

    assert!(matches!(session.init(), Err(PlayerError::EngineInit(_))));
    assert_eq!(session.state(), LifecycleState::Uninitialized);

    session.init().unwrap();
    assert_eq!(session.state(), LifecycleState::Initialized);
    session.destroy();
}

#[test]
fn test_read_media_validates_mrl() {
    let engine = Arc::new(ScriptedEngine::default());
    let (session, _) = session_with(engine.clone(), RelayConfig::default());
    session.init().unwrap();

    assert!(matches!(session.read_media(""), Err(PlayerError::InvalidArgument(_))));
    session.read_media("rtsp://camera/stream").unwrap();
    assert!(engine.read.lock()[0].is_network_stream());
    session.destroy();
}

#[test]
fn test_frames_reach_surface_set_before_init() {
    let engine = Arc::new(ScriptedEngine::default());
    let (session, _) = session_with(engine.clone(), RelayConfig::default());
    let surface = Arc::new(RecordingSurface::default());

    session.set_surface(Some(surface.clone())).unwrap();
    session.init().unwrap();

    let callbacks = engine.callbacks();
    callbacks.on_vout_size_changed(4, 2);
    assert_ne!(callbacks.on_frame_ready(vec![1; 32]), FrameDelivery::Discarded);
    assert!(wait_until(Duration::from_secs(2), || surface.frames.lock().len() == 1));

    // 尺寸不变：不再触发 mode change
    callbacks.on_frame_ready(vec![2; 32]);
    assert!(wait_until(Duration::from_secs(2), || surface.frames.lock().len() == 2));

    callbacks.on_frame_ready_sized(vec![3; 8 * 4 * 4], 8, 4);
    assert!(wait_until(Duration::from_secs(2), || surface.frames.lock().len() == 3));

    assert_eq!(*surface.modes.lock(), vec![FrameSize::new(4, 2), FrameSize::new(8, 4)]);
    assert_eq!(session.stats().frames_rendered, 3);
    session.destroy();
}

#[test]
fn test_audio_buffers_played_in_order() {
    let engine = Arc::new(ScriptedEngine::default());
    let (session, factory) = session_with(engine.clone(), RelayConfig::default());
    session.init().unwrap();

    let callbacks = engine.callbacks();
    callbacks.on_audio_sink_open(8000, 1, 80).unwrap();
    assert_eq!(session.sink_state(), SinkState::Open);

    for tag in 0..5u8 {
        callbacks.on_audio_buffer_ready(vec![tag; 160], 160, 80).unwrap();
    }
    callbacks.on_audio_sink_close();

    let expected: Vec<Vec<u8>> = (0..5u8).map(|tag| vec![tag; 160]).collect();
    assert_eq!(*factory.written.lock(), expected);
    assert_eq!(session.sink_state(), SinkState::Closed);
    // 5 个缓冲 * 80 采样 @ 8000 Hz
    assert_eq!(session.audio_position_ms(), 50);
    session.destroy();
}

#[test]
fn test_callbacks_rejected_after_destroy() {
    let engine = Arc::new(ScriptedEngine::default());
    let (session, factory) = session_with(engine.clone(), RelayConfig::default());
    let surface = Arc::new(RecordingSurface::default());
    session.set_surface(Some(surface.clone())).unwrap();
    session.init().unwrap();

    let callbacks = engine.callbacks();
    callbacks.on_audio_sink_open(8000, 1, 80).unwrap();
    session.destroy();

    callbacks.on_vout_size_changed(4, 2);
    assert_eq!(callbacks.on_frame_ready_sized(vec![0; 32], 4, 2), FrameDelivery::Discarded);
    assert!(matches!(
        callbacks.on_audio_buffer_ready(vec![0; 160], 160, 80),
        Err(PlayerError::InvalidState { .. })
    ));
    assert!(callbacks.on_audio_sink_open(8000, 1, 80).is_err());
    callbacks.on_audio_sink_close();

    thread::sleep(Duration::from_millis(50));
    assert!(surface.frames.lock().is_empty());
    assert!(surface.modes.lock().is_empty());
    assert!(factory.written.lock().is_empty());
}

#[test]
fn test_no_output_callbacks_after_destroy_returns() {
    let engine = Arc::new(ScriptedEngine::default());
    let (session, factory) = session_with(engine.clone(), RelayConfig::default());
    let surface = Arc::new(RecordingSurface::default());
    session.set_surface(Some(surface.clone())).unwrap();
    session.init().unwrap();

    // 引擎的生产线程在 destroy 之后仍然继续交付
    let callbacks = engine.callbacks();
    let producer = thread::spawn(move || {
        let _ = callbacks.on_audio_sink_open(8000, 1, 80);
        let started = Instant::now();
        let mut index = 0u8;
        while started.elapsed() < Duration::from_millis(400) {
            callbacks.on_frame_ready_sized(vec![index; 16 * 16 * 4], 16, 16);
            let _ = callbacks.on_audio_buffer_ready(vec![index; 160], 160, 80);
            index = index.wrapping_add(1);
            thread::sleep(Duration::from_millis(1));
        }
    });

    assert!(wait_until(Duration::from_secs(2), || !surface.frames.lock().is_empty()));
    session.destroy();
    surface.closed.store(true, Ordering::SeqCst);
    factory.closed.store(true, Ordering::SeqCst);

    producer.join().unwrap();
    thread::sleep(Duration::from_millis(50));

    assert_eq!(surface.late.load(Ordering::SeqCst), 0);
    assert_eq!(factory.late.load(Ordering::SeqCst), 0);
    assert_eq!(session.sink_state(), SinkState::Closed);
}

#[test]
fn test_thumbnail_size_and_timeout() {
    let engine = Arc::new(ScriptedEngine {
        thumbnail_len: 4 * 2 * 4,
        ..Default::default()
    });
    let (session, _) = session_with(engine, RelayConfig::default());
    session.init().unwrap();

    assert_eq!(session.get_thumbnail("/a.mkv", 4, 2).unwrap().map(|t| t.len()), Some(32));
    // 引擎返回的大小与请求不符
    assert_eq!(session.get_thumbnail("/a.mkv", 8, 8).unwrap(), None);
    assert_eq!(session.get_thumbnail("/a.mkv", 0, 2).unwrap(), None);
    session.destroy();

    let slow = Arc::new(ScriptedEngine {
        thumbnail_len: 4 * 2 * 4,
        thumbnail_delay: Duration::from_millis(500),
        ..Default::default()
    });
    let config = RelayConfig {
        thumbnail: ThumbnailConfig {
            timeout_ms: 50,
            ..Default::default()
        },
        ..Default::default()
    };
    let (session, _) = session_with(slow, config);
    session.init().unwrap();

    let started = Instant::now();
    assert_eq!(session.get_thumbnail("/a.mkv", 4, 2).unwrap(), None);
    assert!(started.elapsed() < Duration::from_millis(400));
    session.destroy();
}

#[test]
fn test_thumbnail_with_overflowing_size_is_none() {
    let engine = Arc::new(ScriptedEngine {
        thumbnail_len: 32,
        ..Default::default()
    });
    let (session, _) = session_with(engine.clone(), RelayConfig::default());
    session.init().unwrap();

    assert_eq!(session.get_thumbnail("/nonexistent", u32::MAX, u32::MAX).unwrap(), None);
    assert_eq!(session.get_thumbnail("/nonexistent", 65536, 65536).unwrap(), None);
    assert_eq!(engine.thumbnails.load(Ordering::SeqCst), 0);
    session.destroy();
}

#[test]
fn test_timed_out_thumbnails_are_capped() {
    let engine = Arc::new(ScriptedEngine {
        thumbnail_len: 4 * 2 * 4,
        thumbnail_delay: Duration::from_millis(300),
        ..Default::default()
    });
    let config = RelayConfig {
        thumbnail: ThumbnailConfig {
            timeout_ms: 20,
            max_in_flight: 1,
        },
        ..Default::default()
    };
    let (session, _) = session_with(engine.clone(), config);
    session.init().unwrap();

    // 第一个请求超时，但引擎仍在生成
    assert_eq!(session.get_thumbnail("/a.mkv", 4, 2).unwrap(), None);
    assert!(wait_until(Duration::from_secs(1), || engine.thumbnails.load(Ordering::SeqCst) == 1));

    // 名额被占用，直接放弃，不再启动新线程
    let started = Instant::now();
    assert_eq!(session.get_thumbnail("/b.mkv", 4, 2).unwrap(), None);
    assert!(started.elapsed() < Duration::from_millis(20));
    assert_eq!(engine.thumbnails.load(Ordering::SeqCst), 1);

    // 引擎返回后名额归还
    thread::sleep(Duration::from_millis(400));
    assert_eq!(session.get_thumbnail("/c.mkv", 4, 2).unwrap(), None);
    assert_eq!(engine.thumbnails.load(Ordering::SeqCst), 2);
    session.destroy();
}

#[test]
fn test_synthetic_engine_plays_to_end() {
    let session = EngineHandle::with_sink_factory(
        Arc::new(SyntheticEngine::new()),
        RelayConfig::default(),
        Arc::new(NullAudioSinkFactory),
    )
    .unwrap();
    let surface = Arc::new(RecordingSurface::default());
    session.set_surface(Some(surface.clone())).unwrap();
    session.init().unwrap();

    let events = session.events();
    session
        .read_media("synthetic://32x16?fps=50&seconds=0.3&rate=8000&channels=1&buffer=160")
        .unwrap();

    let seen = wait_for_event(&events, Duration::from_secs(3), |e| *e == PlaybackEvent::EndReached);
    assert!(matches!(seen.first(), Some(PlaybackEvent::Opening { .. })));
    assert_eq!(seen.last(), Some(&PlaybackEvent::EndReached));

    assert!(wait_until(Duration::from_secs(2), || !surface.frames.lock().is_empty()));
    assert_eq!(*surface.modes.lock(), vec![FrameSize::new(32, 16)]);
    assert!(session.stats().audio_buffers_played > 0);
    session.destroy();
}

#[test]
fn test_synthetic_engine_reports_unsupported_source() {
    let session = EngineHandle::with_sink_factory(
        Arc::new(SyntheticEngine::new()),
        RelayConfig::default(),
        Arc::new(NullAudioSinkFactory),
    )
    .unwrap();
    session.init().unwrap();

    let events = session.events();
    session.read_media("/videos/missing.mkv").unwrap();

    let seen = wait_for_event(&events, Duration::from_secs(2), |e| {
        matches!(e, PlaybackEvent::EncounteredError { .. })
    });
    assert!(matches!(seen.last(), Some(PlaybackEvent::EncounteredError { .. })));
    session.destroy();
}

#[test]
fn test_synthetic_engine_reports_unplayable_parameters() {
    let session = EngineHandle::with_sink_factory(
        Arc::new(SyntheticEngine::new()),
        RelayConfig::default(),
        Arc::new(NullAudioSinkFactory),
    )
    .unwrap();
    session.init().unwrap();
    let events = session.events();

    for mrl in [
        "synthetic://32x16?fps=50&seconds=0.2&rate=0",
        "synthetic://32x16?seconds=inf",
    ] {
        session.read_media(mrl).unwrap();
        let seen = wait_for_event(&events, Duration::from_secs(2), |e| {
            matches!(e, PlaybackEvent::EncounteredError { .. })
        });
        assert!(
            matches!(seen.last(), Some(PlaybackEvent::EncounteredError { .. })),
            "{}: {:?}",
            mrl,
            seen
        );
        assert!(!seen.contains(&PlaybackEvent::Playing));
    }

    assert_eq!(session.sink_state(), SinkState::Closed);
    session.destroy();
}
