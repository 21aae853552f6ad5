use crate::core::{BuildInfo, FrameSize, MediaSource, PlaybackEvent, PlayerError, Result};
use crate::player::engine::{EngineCallbacks, NativeEngine, MAX_THUMBNAIL_BYTES};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::f32::consts::TAU;
use std::fs;
use std::process;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 测试源参数：`synthetic://640x360?fps=25&seconds=5&rate=48000&channels=2&buffer=1024`
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSpec {
    pub size: FrameSize,
    pub fps: u32,
    /// 播放时长（秒），0 表示一直播放
    pub seconds: f32,
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_samples: u32,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            size: FrameSize::new(320, 240),
            fps: 25,
            seconds: 5.0,
            sample_rate: 48000,
            channels: 2,
            buffer_samples: 1024,
        }
    }
}

impl SyntheticSpec {
    /// `seconds` 的上限（一天）
    pub const MAX_SECONDS: f32 = 86_400.0;

    pub fn parse(spec: &str) -> Result<Self> {
        let mut parsed = SyntheticSpec::default();
        let (size_part, query) = match spec.split_once('?') {
            Some((size, query)) => (size, Some(query)),
            None => (spec, None),
        };

        if !size_part.is_empty() {
            let (w, h) = size_part
                .split_once('x')
                .ok_or_else(|| PlayerError::InvalidArgument(format!("无效的尺寸: {}", size_part)))?;
            let width = Self::parse_field("width", w)?;
            let height = Self::parse_field("height", h)?;
            parsed.size = FrameSize::new(width, height);
        }

        for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| PlayerError::InvalidArgument(format!("无效的参数: {}", pair)))?;
            match key {
                "fps" => parsed.fps = Self::parse_field(key, value)?,
                "seconds" => parsed.seconds = Self::parse_field(key, value)?,
                "rate" => parsed.sample_rate = Self::parse_field(key, value)?,
                "channels" => parsed.channels = Self::parse_field(key, value)?,
                "buffer" => parsed.buffer_samples = Self::parse_field(key, value)?,
                _ => warn!("忽略未知参数: {}", key),
            }
        }

        if parsed.size.width == 0 || parsed.size.height == 0 || parsed.fps == 0 {
            return Err(PlayerError::InvalidArgument(format!("无效的测试源: {}", spec)));
        }
        if parsed.sample_rate == 0 || parsed.channels == 0 || parsed.buffer_samples == 0 {
            return Err(PlayerError::InvalidArgument(format!(
                "rate / channels / buffer 必须大于 0: {}",
                spec
            )));
        }
        if !parsed.seconds.is_finite() || !(0.0..=Self::MAX_SECONDS).contains(&parsed.seconds) {
            return Err(PlayerError::InvalidArgument(format!(
                "seconds 必须在 0-{} 之间: {}",
                Self::MAX_SECONDS,
                parsed.seconds
            )));
        }
        Ok(parsed)
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps as f64)
    }

    fn audio_interval(&self) -> Duration {
        Duration::from_secs_f64(self.buffer_samples as f64 / self.sample_rate as f64)
    }

    /// 播放时长，None 表示一直播放
    fn duration(&self) -> Option<Duration> {
        (self.seconds > 0.0).then(|| Duration::from_secs_f32(self.seconds))
    }

    fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
        value
            .parse()
            .map_err(|_| PlayerError::InvalidArgument(format!("无效的 {}: {}", name, value)))
    }
}

/// 生成 RGBA 测试图样：渐变背景 + 随帧移动的竖条
pub fn test_pattern(size: FrameSize, index: u64) -> Vec<u8> {
    let width = size.width.max(1);
    let height = size.height.max(1);
    let bar_width = (width / 16).max(1);
    let bar_x = ((index * 8) % width as u64) as u32;

    let mut pixels: Vec<[u8; 4]> = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        for x in 0..width {
            if x >= bar_x && x < bar_x + bar_width {
                pixels.push([255, 255, 255, 255]);
            } else {
                let r = (x * 255 / width) as u8;
                let g = (y * 255 / height) as u8;
                let b = (index % 256) as u8;
                pixels.push([r, g, b, 255]);
            }
        }
    }
    bytemuck::cast_slice(&pixels).to_vec()
}

/// 生成一段 440Hz 正弦 PCM（S16 交错），返回下一段的起始相位
fn sine_buffer(spec: &SyntheticSpec, phase: f32) -> (Vec<u8>, f32) {
    let step = TAU * 440.0 / spec.sample_rate as f32;
    let mut samples: Vec<i16> =
        Vec::with_capacity(spec.buffer_samples as usize * spec.channels as usize);
    let mut phase = phase;
    for _ in 0..spec.buffer_samples {
        let value = (phase.sin() * i16::MAX as f32 * 0.25) as i16;
        for _ in 0..spec.channels {
            samples.push(value);
        }
        phase = (phase + step) % TAU;
    }
    (bytemuck::cast_slice(&samples).to_vec(), phase)
}

/// 生产线程命令
enum ProducerCommand {
    Stop,
}

struct ProducerThread {
    command_tx: Sender<ProducerCommand>,
    thread_handle: JoinHandle<()>,
}

impl ProducerThread {
    fn stop(self) {
        let _ = self.command_tx.send(ProducerCommand::Stop);
        if self.thread_handle.join().is_err() {
            warn!("{} ⚠ 测试源线程异常退出", log_ctx());
        }
    }
}

struct EngineInner {
    callbacks: Option<EngineCallbacks>,
    producer: Option<ProducerThread>,
}

/// 测试引擎 - 在独立线程中按实时节拍产生测试图样和正弦音
pub struct SyntheticEngine {
    build_info: BuildInfo,
    inner: Mutex<EngineInner>,
}

impl SyntheticEngine {
    pub fn new() -> Self {
        Self::with_build_info(BuildInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            compiler: format!("rustc ({}-{})", std::env::consts::ARCH, std::env::consts::OS),
            changeset: option_env!("MEDIA_RELAY_CHANGESET")
                .unwrap_or("unknown")
                .to_string(),
        })
    }

    /// 使用外部（例如原生库）提供的构建信息
    pub fn with_build_info(build_info: BuildInfo) -> Self {
        Self {
            build_info,
            inner: Mutex::new(EngineInner {
                callbacks: None,
                producer: None,
            }),
        }
    }

    /// 生产循环（在独立线程中运行）
    fn produce_loop(
        spec: SyntheticSpec,
        mrl: String,
        callbacks: EngineCallbacks,
        command_rx: Receiver<ProducerCommand>,
    ) {
        info!("{} 🎬 测试源线程启动: {} {:?}", log_ctx(), mrl, spec);

        callbacks.report_event(PlaybackEvent::Opening { mrl: mrl.clone() });
        callbacks.on_vout_size_changed(spec.size.width, spec.size.height);

        let mut audio_enabled = match callbacks.on_audio_sink_open(
            spec.sample_rate,
            spec.channels,
            spec.buffer_samples,
        ) {
            Ok(()) => true,
            Err(e) => {
                error!("{} ❌ 打开音频输出失败，仅播放视频: {}", log_ctx(), e);
                false
            }
        };
        callbacks.report_event(PlaybackEvent::Playing);

        let frame_interval = spec.frame_interval();
        let audio_interval = spec.audio_interval();
        let duration = spec.duration();

        let started = Instant::now();
        let mut next_frame = started;
        let mut next_audio = started;
        let mut frame_index: u64 = 0;
        let mut audio_count: u64 = 0;
        let mut phase = 0.0f32;
        let mut stopped = false;

        loop {
            let now = Instant::now();
            if duration.map_or(false, |d| now.duration_since(started) >= d) {
                break;
            }

            if now >= next_frame {
                let frame = test_pattern(spec.size, frame_index);
                callbacks.on_frame_ready(frame);
                frame_index += 1;
                next_frame += frame_interval;
                continue;
            }

            if audio_enabled && now >= next_audio {
                let (pcm, next_phase) = sine_buffer(&spec, phase);
                phase = next_phase;
                let size = pcm.len();
                if let Err(e) =
                    callbacks.on_audio_buffer_ready(pcm, size, spec.buffer_samples as usize)
                {
                    warn!("{} ⚠ 音频缓冲交付失败，停止音频: {}", log_ctx(), e);
                    audio_enabled = false;
                }
                audio_count += 1;
                next_audio += audio_interval;
                continue;
            }

            let wake_at = if audio_enabled {
                next_frame.min(next_audio)
            } else {
                next_frame
            };
            // 等待下一个节拍，同时响应停止命令
            match command_rx.recv_timeout(wake_at.saturating_duration_since(now)) {
                Ok(ProducerCommand::Stop) | Err(RecvTimeoutError::Disconnected) => {
                    stopped = true;
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        if audio_enabled {
            callbacks.on_audio_sink_close();
        }
        if !stopped {
            callbacks.report_event(PlaybackEvent::EndReached);
        }

        info!(
            "{} 🛑 测试源线程退出（{} 帧，{} 个音频缓冲）",
            log_ctx(),
            frame_index,
            audio_count
        );
    }
}

impl Default for SyntheticEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeEngine for SyntheticEngine {
    fn start(&self, callbacks: EngineCallbacks) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.callbacks.is_some() {
            return Err(PlayerError::EngineInit("引擎已启动".to_string()));
        }
        inner.callbacks = Some(callbacks);
        info!("测试引擎已启动");
        Ok(())
    }

    fn stop(&self) {
        let mut inner = self.inner.lock();
        if let Some(producer) = inner.producer.take() {
            producer.stop();
        }
        inner.callbacks = None;
        info!("测试引擎已停止");
    }

    fn read_media(&self, source: &MediaSource) {
        let mut inner = self.inner.lock();
        let callbacks = match inner.callbacks.clone() {
            Some(callbacks) => callbacks,
            None => {
                warn!("测试引擎未启动，忽略 {}", source.mrl());
                return;
            }
        };

        // 同时只播放一个源
        if let Some(producer) = inner.producer.take() {
            producer.stop();
        }

        let spec = match source {
            MediaSource::Synthetic(spec) => SyntheticSpec::parse(spec),
            other => Err(PlayerError::Other(format!(
                "测试引擎只支持 synthetic:// 源: {}",
                other.mrl()
            ))),
        };
        let spec = match spec {
            Ok(spec) => spec,
            Err(e) => {
                callbacks.report_event(PlaybackEvent::EncounteredError {
                    mrl: source.mrl(),
                    reason: e.to_string(),
                });
                return;
            }
        };

        let (command_tx, command_rx) = unbounded();
        let mrl = source.mrl();
        let thread_callbacks = callbacks.clone();
        let spawned = thread::Builder::new()
            .name("synthetic-producer".to_string())
            .spawn(move || Self::produce_loop(spec, mrl, thread_callbacks, command_rx));

        match spawned {
            Ok(thread_handle) => {
                inner.producer = Some(ProducerThread {
                    command_tx,
                    thread_handle,
                });
            }
            Err(e) => callbacks.report_event(PlaybackEvent::EncounteredError {
                mrl: source.mrl(),
                reason: format!("无法启动测试源线程: {}", e),
            }),
        }
    }

    fn thumbnail(&self, path: &str, width: u32, height: u32) -> Option<Vec<u8>> {
        let size = FrameSize::new(width, height);
        if size.rgba_len().map_or(true, |len| len > MAX_THUMBNAIL_BYTES) {
            return None;
        }
        if path.starts_with("synthetic://") {
            return Some(test_pattern(size, 0));
        }
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => Some(test_pattern(size, meta.len())),
            Ok(_) => None,
            Err(e) => {
                debug!("无法读取 {}: {}", path, e);
                None
            }
        }
    }

    fn build_info(&self) -> BuildInfo {
        self.build_info.clone()
    }

    fn description(&self) -> String {
        "synthetic engine".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spec() {
        let spec = SyntheticSpec::parse("640x360?fps=30&seconds=1.5&rate=44100&channels=1").unwrap();
        assert_eq!(spec.size, FrameSize::new(640, 360));
        assert_eq!(spec.fps, 30);
        assert_eq!(spec.seconds, 1.5);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.buffer_samples, 1024);

        assert_eq!(SyntheticSpec::parse("").unwrap(), SyntheticSpec::default());
        assert!(SyntheticSpec::parse("640").is_err());
        assert!(SyntheticSpec::parse("0x10").is_err());
        assert!(SyntheticSpec::parse("8x8?fps=abc").is_err());
    }

    #[test]
    fn test_parse_rejects_unplayable_parameters() {
        for spec in [
            "32x16?rate=0",
            "32x16?buffer=0",
            "32x16?channels=0",
            "32x16?seconds=inf",
            "32x16?seconds=NaN",
            "32x16?seconds=-1",
            "32x16?seconds=1e9",
        ] {
            assert!(
                matches!(SyntheticSpec::parse(spec), Err(PlayerError::InvalidArgument(_))),
                "{} 应被拒绝",
                spec
            );
        }

        let spec = SyntheticSpec::parse("32x16?seconds=0&rate=8000&buffer=80").unwrap();
        assert_eq!(spec.duration(), None);
        assert_eq!(spec.audio_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_pattern_size() {
        let size = FrameSize::new(16, 9);
        assert_eq!(Some(test_pattern(size, 3).len()), size.rgba_len());
    }

    #[test]
    fn test_sine_buffer_size() {
        let spec = SyntheticSpec {
            channels: 2,
            buffer_samples: 256,
            ..Default::default()
        };
        let (pcm, phase) = sine_buffer(&spec, 0.0);
        assert_eq!(pcm.len(), 256 * 2 * 2);
        assert!(phase > 0.0 && phase < TAU);
    }

    #[test]
    fn test_thumbnail() {
        let engine = SyntheticEngine::new();
        assert_eq!(engine.thumbnail("synthetic://", 8, 4).map(|t| t.len()), Some(128));
        assert!(engine.thumbnail("/definitely/not/here.mkv", 8, 4).is_none());
        assert!(engine.thumbnail("synthetic://", u32::MAX, u32::MAX).is_none());
    }
}
