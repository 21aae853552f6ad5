use parking_lot::Mutex;
use std::sync::Arc;

/// 音频时钟 - 按交给输出设备的采样帧数推算播放位置
#[derive(Clone)]
pub struct AudioClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    sample_rate: u32,
    frames_played: u64,   // 已交给输出设备的采样帧数
}

impl AudioClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                sample_rate: 0,
                frames_played: 0,
            })),
        }
    }

    /// 输出（重新）打开时重置
    pub fn reset(&self, sample_rate: u32) {
        let mut inner = self.inner.lock();
        inner.sample_rate = sample_rate;
        inner.frames_played = 0;
    }

    /// 记录已播放的采样帧
    pub fn advance(&self, frames: u64) {
        self.inner.lock().frames_played += frames;
    }

    pub fn frames_played(&self) -> u64 {
        self.inner.lock().frames_played
    }

    /// 当前播放位置（毫秒）
    pub fn position_ms(&self) -> i64 {
        let inner = self.inner.lock();
        if inner.sample_rate == 0 {
            return 0;
        }
        (inner.frames_played * 1000 / inner.sample_rate as u64) as i64
    }
}

impl Default for AudioClock {
    fn default() -> Self {
        Self::new()
    }
}
