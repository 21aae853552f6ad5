//! 转发层运行参数
//!
//! 所有字段都有默认值，JSON 文件里只需写要覆盖的部分。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::error::{PlayerError, Result};

/// 音频队列满时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// 等待超时后丢弃该缓冲并记录丢弃事件
    Drop,
    /// 持续背压，直到有空位或输出被关闭
    Block,
}

/// 关闭音频输出时队列中剩余缓冲的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClosePolicy {
    /// 播放完剩余缓冲再释放设备
    Drain,
    /// 直接丢弃剩余缓冲
    Discard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioRelayConfig {
    /// 队列容量（缓冲个数）
    pub queue_capacity: usize,
    /// 队列满时生产者最多等待的时间（毫秒）
    pub backpressure_timeout_ms: u64,
    pub overflow_policy: OverflowPolicy,
    pub close_policy: ClosePolicy,
    /// 消费线程等待超过 缓冲时长 × 该倍数 仍无数据时记为欠载
    pub underrun_grace: f32,
}

impl Default for AudioRelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            backpressure_timeout_ms: 200,
            overflow_policy: OverflowPolicy::Drop,
            close_policy: ClosePolicy::Drain,
            underrun_grace: 2.0,
        }
    }
}

impl AudioRelayConfig {
    pub const MAX_UNDERRUN_GRACE: f32 = 100.0;

    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoRelayConfig {
    /// 渲染线程空闲时的唤醒间隔（毫秒）
    pub render_poll_ms: u64,
}

impl Default for VideoRelayConfig {
    fn default() -> Self {
        Self { render_poll_ms: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub timeout_ms: u64,
    /// 同时运行的缩略图线程上限（包括已超时但引擎尚未返回的）
    pub max_in_flight: usize,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            max_in_flight: 4,
        }
    }
}

/// 完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub audio: AudioRelayConfig,
    pub video: VideoRelayConfig,
    pub thumbnail: ThumbnailConfig,
}

impl RelayConfig {
    /// 从 JSON 文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(&path)?;
        let config: RelayConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        log::info!("已加载配置: {:?}", path.as_ref());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.queue_capacity == 0 {
            return Err(PlayerError::InvalidArgument(
                "audio.queue_capacity 必须大于 0".to_string(),
            ));
        }
        if self.audio.backpressure_timeout_ms == 0 {
            return Err(PlayerError::InvalidArgument(
                "audio.backpressure_timeout_ms 必须大于 0".to_string(),
            ));
        }
        let grace = self.audio.underrun_grace;
        if !grace.is_finite() || grace <= 0.0 || grace > AudioRelayConfig::MAX_UNDERRUN_GRACE {
            return Err(PlayerError::InvalidArgument(format!(
                "audio.underrun_grace 必须在 (0, {}] 之间: {}",
                AudioRelayConfig::MAX_UNDERRUN_GRACE,
                grace
            )));
        }
        if self.thumbnail.max_in_flight == 0 {
            return Err(PlayerError::InvalidArgument(
                "thumbnail.max_in_flight 必须大于 0".to_string(),
            ));
        }
        if self.video.render_poll_ms == 0 || self.thumbnail.timeout_ms == 0 {
            return Err(PlayerError::InvalidArgument(
                "video.render_poll_ms / thumbnail.timeout_ms 必须大于 0".to_string(),
            ));
        }
        Ok(())
    }
}
