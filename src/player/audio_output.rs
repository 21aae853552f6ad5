use crate::core::{AudioBuffer, AudioSinkConfig, Result};
use log::info;
use std::thread;
use std::time::{Duration, Instant};

/// 音频输出设备
///
/// 在音频输出线程上创建和使用，不要求 `Send`。
/// `write` 按设备消耗速度阻塞，这就是输出线程的实时节拍。
pub trait AudioSink {
    /// 写入一个 PCM 缓冲（S16LE 交错）
    fn write(&mut self, buffer: &AudioBuffer) -> Result<()>;

    /// 等待已写入的数据播放完
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn description(&self) -> String;
}

/// 音频输出工厂，在输出线程中调用 `open`
pub trait AudioSinkFactory: Send + Sync {
    /// 参数不被设备支持时返回 `PlayerError::AudioConfig`
    fn open(&self, config: &AudioSinkConfig) -> Result<Box<dyn AudioSink>>;
}

/// 空输出 - 按采样率节拍消耗数据但不发声（无声卡环境、演示用）
pub struct NullAudioSink {
    config: AudioSinkConfig,
    started_at: Option<Instant>,
    frames_written: u64,
}

impl NullAudioSink {
    pub fn new(config: AudioSinkConfig) -> Self {
        Self {
            config,
            started_at: None,
            frames_written: 0,
        }
    }

    /// 已写入数据对应的播放结束时刻
    fn deadline(&self, started_at: Instant) -> Instant {
        let micros = self.frames_written * 1_000_000 / self.config.sample_rate as u64;
        started_at + Duration::from_micros(micros)
    }
}

impl AudioSink for NullAudioSink {
    fn write(&mut self, buffer: &AudioBuffer) -> Result<()> {
        let started_at = *self.started_at.get_or_insert_with(Instant::now);

        // 最多领先一个设备缓冲
        let lead = self.config.buffer_duration();
        let deadline = self.deadline(started_at);
        let now = Instant::now();
        if deadline > now + lead {
            thread::sleep(deadline - now - lead);
        }

        let frames = buffer.size / self.config.frame_bytes();
        self.frames_written += frames as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(started_at) = self.started_at {
            let deadline = self.deadline(started_at);
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            }
        }
        Ok(())
    }

    fn description(&self) -> String {
        format!("null ({})", self.config)
    }
}

pub struct NullAudioSinkFactory;

impl AudioSinkFactory for NullAudioSinkFactory {
    fn open(&self, config: &AudioSinkConfig) -> Result<Box<dyn AudioSink>> {
        info!("打开空音频输出: {}", config);
        Ok(Box::new(NullAudioSink::new(*config)))
    }
}

#[cfg(feature = "cpal-output")]
pub use self::device::{CpalAudioSink, CpalAudioSinkFactory};

#[cfg(feature = "cpal-output")]
mod device {
    use super::{AudioSink, AudioSinkFactory};
    use crate::core::{AudioBuffer, AudioSinkConfig, PlayerError, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
    use crossbeam::queue::SegQueue;
    use log::{debug, error, info};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    /// 音频输出 - 使用 cpal 播放音频
    pub struct CpalAudioSink {
        config: AudioSinkConfig,
        _stream: Stream,
        buffer: Arc<SegQueue<f32>>,
        high_water: usize,  // 队列中允许积压的采样数
    }

    impl CpalAudioSink {
        pub fn open(config: &AudioSinkConfig) -> Result<Self> {
            info!("初始化音频输出: {}", config);

            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;

            debug!("使用音频设备: {}", device.name().unwrap_or_default());

            let stream_config = StreamConfig {
                channels: config.channels,
                sample_rate: cpal::SampleRate(config.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            // 参数固定，设备不支持时直接报错，由引擎换参数重新打开
            let supported_configs = device
                .supported_output_configs()
                .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?;
            let is_supported = supported_configs
                .into_iter()
                .any(|supported| Self::is_config_compatible(&stream_config, &supported));
            if !is_supported {
                return Err(PlayerError::AudioConfig(format!(
                    "音频设备不支持 {} Hz, {} 声道",
                    config.sample_rate, config.channels
                )));
            }

            let buffer = Arc::new(SegQueue::new());
            let stream = Self::build_stream(&device, &stream_config, buffer.clone())?;

            Ok(Self {
                config: *config,
                _stream: stream,
                buffer,
                high_water: config.buffer_size_samples as usize * config.channels as usize * 2,
            })
        }

        /// 检查配置是否兼容
        fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
            let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
                && config.sample_rate.0 <= supported.max_sample_rate().0;

            let channels_match = config.channels == supported.channels();

            rate_in_range && channels_match
        }

        fn build_stream(
            device: &Device,
            config: &StreamConfig,
            buffer: Arc<SegQueue<f32>>,
        ) -> Result<Stream> {
            let stream = device
                .build_output_stream(
                    config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for sample in data.iter_mut() {
                            *sample = buffer.pop().unwrap_or(0.0);
                        }
                    },
                    move |err| {
                        error!("音频流错误: {}", err);
                    },
                    None,
                )
                .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

            stream
                .play()
                .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

            info!("音频输出已启动");
            Ok(stream)
        }
    }

    impl AudioSink for CpalAudioSink {
        fn write(&mut self, buffer: &AudioBuffer) -> Result<()> {
            // 设备侧积压过多时等待消耗
            while self.buffer.len() > self.high_water {
                thread::sleep(Duration::from_millis(2));
            }

            for chunk in buffer.payload().chunks_exact(2) {
                let sample: i16 = bytemuck::pod_read_unaligned(chunk);
                self.buffer.push(sample as f32 / i16::MAX as f32);
            }
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            let deadline = Instant::now() + self.config.buffer_duration() * 4;
            while !self.buffer.is_empty() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(2));
            }
            Ok(())
        }

        fn description(&self) -> String {
            format!("cpal ({})", self.config)
        }
    }

    impl Drop for CpalAudioSink {
        fn drop(&mut self) {
            while self.buffer.pop().is_some() {}
            info!("音频输出已停止");
        }
    }

    pub struct CpalAudioSinkFactory;

    impl AudioSinkFactory for CpalAudioSinkFactory {
        fn open(&self, config: &AudioSinkConfig) -> Result<Box<dyn AudioSink>> {
            Ok(Box::new(CpalAudioSink::open(config)?))
        }
    }
}
