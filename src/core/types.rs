use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::error::{PlayerError, Result};

/// 媒体源类型（由 MRL 字符串解析）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// 本地文件路径
    LocalFile(PathBuf),

    /// 网络流 URL
    NetworkStream {
        url: String,
        protocol: StreamProtocol,
    },

    /// 引擎内置测试图样，例如 `synthetic://640x360?fps=25`
    Synthetic(String),
}

impl MediaSource {
    /// 从 MRL 字符串解析媒体源
    ///
    /// 只做语法层面的检查：空字符串直接拒绝，其余错误由引擎异步上报
    pub fn from_mrl(mrl: &str) -> Result<Self> {
        let mrl = mrl.trim();
        if mrl.is_empty() {
            return Err(PlayerError::InvalidArgument("MRL 为空".to_string()));
        }

        let source = if let Some(rest) = mrl.strip_prefix("synthetic://") {
            MediaSource::Synthetic(rest.to_string())
        } else if let Some(path) = mrl.strip_prefix("file://") {
            MediaSource::LocalFile(PathBuf::from(path))
        } else if mrl.starts_with("rtsp://") {
            MediaSource::NetworkStream {
                url: mrl.to_string(),
                protocol: StreamProtocol::RTSP,
            }
        } else if mrl.starts_with("rtmp://") {
            MediaSource::NetworkStream {
                url: mrl.to_string(),
                protocol: StreamProtocol::RTMP,
            }
        } else if mrl.ends_with(".m3u8") || mrl.contains("/hls/") {
            MediaSource::NetworkStream {
                url: mrl.to_string(),
                protocol: StreamProtocol::HLS,
            }
        } else if mrl.starts_with("http://") || mrl.starts_with("https://") {
            MediaSource::NetworkStream {
                url: mrl.to_string(),
                protocol: StreamProtocol::HTTP,
            }
        } else {
            // 默认当作本地文件
            MediaSource::LocalFile(PathBuf::from(mrl))
        };

        Ok(source)
    }

    /// 判断是否为网络流
    pub fn is_network_stream(&self) -> bool {
        matches!(self, MediaSource::NetworkStream { .. })
    }

    /// 还原为 MRL 字符串（用于日志和事件）
    pub fn mrl(&self) -> String {
        match self {
            MediaSource::LocalFile(path) => path.to_string_lossy().to_string(),
            MediaSource::NetworkStream { url, .. } => url.clone(),
            MediaSource::Synthetic(spec) => format!("synthetic://{}", spec),
        }
    }
}

/// 流媒体协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    /// RTSP - 实时流协议（监控摄像头）
    RTSP,
    /// RTMP - 实时消息协议（直播流）
    RTMP,
    /// HLS - HTTP Live Streaming
    HLS,
    /// HTTP - 普通 HTTP 流
    HTTP,
}

impl StreamProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::RTSP => "RTSP",
            StreamProtocol::RTMP => "RTMP",
            StreamProtocol::HLS => "HLS",
            StreamProtocol::HTTP => "HTTP",
        }
    }
}

/// 视频尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// RGBA 图像的字节数，超出 usize 时返回 None
    pub fn rgba_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(4)
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// 视频帧数据（所有权从引擎线程转移给转发层）
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Vec<u8>,      // RGBA 像素
    pub width: u32,
    pub height: u32,
    pub sequence: u64,      // 转发层分配的递增序号
}

impl VideoFrame {
    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

/// PCM 音频缓冲（S16LE 交错）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    pub data: Vec<u8>,
    pub size: usize,         // 有效字节数
    pub sample_count: usize, // 每声道采样数
}

impl AudioBuffer {
    /// 创建音频缓冲，size 超出数据长度时截断
    pub fn new(data: Vec<u8>, size: usize, sample_count: usize) -> Self {
        let size = size.min(data.len());
        Self {
            data,
            size,
            sample_count,
        }
    }

    /// 有效的 PCM 字节
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.size]
    }
}

/// 音频输出参数，打开后不可修改；参数变化时重新打开输出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSinkConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_size_samples: u32,
}

impl AudioSinkConfig {
    pub const MIN_SAMPLE_RATE: u32 = 8_000;
    pub const MAX_SAMPLE_RATE: u32 = 192_000;
    pub const MAX_CHANNELS: u16 = 8;
    pub const MAX_BUFFER_SAMPLES: u32 = 65_536;

    pub fn new(sample_rate: u32, channels: u16, buffer_size_samples: u32) -> Self {
        Self {
            sample_rate,
            channels,
            buffer_size_samples,
        }
    }

    /// 检查参数组合是否可用
    pub fn validate(&self) -> Result<()> {
        if !(Self::MIN_SAMPLE_RATE..=Self::MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(PlayerError::AudioConfig(format!(
                "不支持的采样率 {} Hz（范围 {}-{}）",
                self.sample_rate,
                Self::MIN_SAMPLE_RATE,
                Self::MAX_SAMPLE_RATE
            )));
        }
        if self.channels == 0 || self.channels > Self::MAX_CHANNELS {
            return Err(PlayerError::AudioConfig(format!(
                "不支持的声道数 {}（范围 1-{}）",
                self.channels,
                Self::MAX_CHANNELS
            )));
        }
        if self.buffer_size_samples == 0 || self.buffer_size_samples > Self::MAX_BUFFER_SAMPLES {
            return Err(PlayerError::AudioConfig(format!(
                "不支持的缓冲大小 {} 采样（范围 1-{}）",
                self.buffer_size_samples,
                Self::MAX_BUFFER_SAMPLES
            )));
        }
        Ok(())
    }

    /// 一个采样帧（所有声道）的字节数
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * 2
    }

    /// 一个输出缓冲对应的播放时长
    pub fn buffer_duration(&self) -> Duration {
        Duration::from_micros(self.buffer_size_samples as u64 * 1_000_000 / self.sample_rate as u64)
    }
}

impl fmt::Display for AudioSinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} 声道, {} 采样/缓冲",
            self.sample_rate, self.channels, self.buffer_size_samples
        )
    }
}

/// 会话生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Destroyed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// 音频输出状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkState {
    Closed,
    Open,
    /// 消费线程已开始读取队列
    Playing,
}

impl fmt::Display for SinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SinkState::Closed => "closed",
            SinkState::Open => "open",
            SinkState::Playing => "playing",
        };
        f.write_str(name)
    }
}

/// 引擎构建信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub version: String,
    pub compiler: String,
    pub changeset: String,
}

/// 引擎通过回调路径异步上报的播放事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Opening { mrl: String },
    Playing,
    EndReached,
    EncounteredError { mrl: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_source_from_mrl() {
        assert_eq!(
            MediaSource::from_mrl("rtsp://cam/1").unwrap(),
            MediaSource::NetworkStream {
                url: "rtsp://cam/1".to_string(),
                protocol: StreamProtocol::RTSP,
            }
        );
        assert_eq!(
            MediaSource::from_mrl("file:///sdcard/a.mkv").unwrap(),
            MediaSource::LocalFile(PathBuf::from("/sdcard/a.mkv"))
        );
        assert_eq!(
            MediaSource::from_mrl("synthetic://320x240").unwrap(),
            MediaSource::Synthetic("320x240".to_string())
        );
        assert!(MediaSource::from_mrl("http://host/live/hls/x").unwrap().is_network_stream());
        assert!(matches!(
            MediaSource::from_mrl("   "),
            Err(PlayerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_sink_config_validate() {
        assert!(AudioSinkConfig::new(44100, 2, 1024).validate().is_ok());
        assert!(matches!(
            AudioSinkConfig::new(1000, 2, 1024).validate(),
            Err(PlayerError::AudioConfig(_))
        ));
        assert!(AudioSinkConfig::new(48000, 0, 1024).validate().is_err());
        assert!(AudioSinkConfig::new(48000, 2, 0).validate().is_err());
    }

    #[test]
    fn test_sink_config_sizes() {
        let config = AudioSinkConfig::new(48000, 2, 480);
        assert_eq!(config.frame_bytes(), 4);
        assert_eq!(config.buffer_duration(), Duration::from_millis(10));
    }

    #[test]
    fn test_rgba_len_overflow() {
        assert_eq!(FrameSize::new(4, 2).rgba_len(), Some(32));
        assert_eq!(FrameSize::new(u32::MAX, u32::MAX).rgba_len(), None);
    }

    #[test]
    fn test_audio_buffer_clamps_size() {
        let buffer = AudioBuffer::new(vec![0u8; 8], 16, 2);
        assert_eq!(buffer.size, 8);
        assert_eq!(buffer.payload().len(), 8);
    }
}
