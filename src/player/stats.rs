use crate::core::FrameSize;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// 转发层的质量事件，只记录，不作为错误抛给生产者
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEvent {
    /// 新帧覆盖了未消费的旧帧，或没有渲染目标
    FrameDropped { sequence: u64 },
    FrameRendered { sequence: u64 },
    ModeChanged(FrameSize),
    AudioBufferQueued,
    AudioBufferPlayed { sample_count: usize },
    /// 队列满且等待超时，缓冲被丢弃
    AudioBufferDropped,
    /// 输出设备等不到数据
    AudioUnderrun,
}

/// 统计快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_rendered: u64,
    pub frames_dropped: u64,
    pub mode_changes: u64,
    pub audio_buffers_queued: u64,
    pub audio_buffers_played: u64,
    pub audio_buffers_dropped: u64,
    pub audio_underruns: u64,
}

/// 生产者与消费者共享的计数器
#[derive(Debug, Default)]
pub struct RelayStats {
    frames_received: AtomicU64,
    frames_rendered: AtomicU64,
    frames_dropped: AtomicU64,
    mode_changes: AtomicU64,
    audio_buffers_queued: AtomicU64,
    audio_buffers_played: AtomicU64,
    audio_buffers_dropped: AtomicU64,
    audio_underruns: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(&self, event: RelayEvent) {
        match event {
            RelayEvent::FrameDropped { sequence } => {
                let total = self.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                // 丢帧不算错误
                if total <= 5 || total % 100 == 0 {
                    debug!("🗑 丢弃视频帧 #{}（累计 {}）", sequence, total);
                }
            }
            RelayEvent::FrameRendered { .. } => {
                self.frames_rendered.fetch_add(1, Ordering::Relaxed);
            }
            RelayEvent::ModeChanged(size) => {
                self.mode_changes.fetch_add(1, Ordering::Relaxed);
                info!("📐 视频尺寸变化: {}", size);
            }
            RelayEvent::AudioBufferQueued => {
                self.audio_buffers_queued.fetch_add(1, Ordering::Relaxed);
            }
            RelayEvent::AudioBufferPlayed { .. } => {
                self.audio_buffers_played.fetch_add(1, Ordering::Relaxed);
            }
            RelayEvent::AudioBufferDropped => {
                let total = self.audio_buffers_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("⚠️  音频队列已满，丢弃缓冲（累计 {}）", total);
            }
            RelayEvent::AudioUnderrun => {
                let total = self.audio_underruns.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("⚠️  音频欠载（累计 {}）", total);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            mode_changes: self.mode_changes.load(Ordering::Relaxed),
            audio_buffers_queued: self.audio_buffers_queued.load(Ordering::Relaxed),
            audio_buffers_played: self.audio_buffers_played.load(Ordering::Relaxed),
            audio_buffers_dropped: self.audio_buffers_dropped.load(Ordering::Relaxed),
            audio_underruns: self.audio_underruns.load(Ordering::Relaxed),
        }
    }
}
