use crate::core::{FrameSize, VideoFrame};
use crate::player::stats::{RelayEvent, RelayStats};
use crate::renderer::surface::SurfaceHandle;
use log::{debug, info};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// 单帧交付结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDelivery {
    /// 放入空槽位
    Stored,
    /// 覆盖了尚未渲染的旧帧
    Replaced,
    /// 没有渲染目标或已停止，直接丢弃
    Discarded,
}

/// 视频帧转发 - 单槽位，新帧覆盖旧帧（latest-wins）
///
/// 生产者（引擎线程）只会短暂持有槽位锁，永远不会等待绘制完成。
/// 消费者回调（`on_mode_change` / `draw`）在 `delivery` 锁内执行，
/// 更换 surface 和停止时借助这把锁等待正在进行的绘制结束。
#[derive(Clone)]
pub struct VideoFrameRelay {
    shared: Arc<Shared>,
}

struct Shared {
    slot: Mutex<Slot>,
    work_ready: Condvar,
    delivery: Mutex<()>,
    stats: Arc<RelayStats>,
}

struct Slot {
    pending: Option<VideoFrame>,
    surface: Option<SurfaceHandle>,
    announced_size: Option<FrameSize>,  // 引擎最近一次声明的尺寸
    signaled_size: Option<FrameSize>,   // 已通知当前 surface 的尺寸
    next_sequence: u64,
    accepting: bool,
}

impl Slot {
    /// 当前 surface 需要知道的新尺寸
    fn target_size(&self) -> Option<FrameSize> {
        self.pending
            .as_ref()
            .map(|frame| frame.size())
            .or(self.announced_size)
    }

    fn has_work(&self) -> bool {
        if !self.accepting || self.surface.is_none() {
            return false;
        }
        self.pending.is_some() || self.target_size() != self.signaled_size
    }
}

impl VideoFrameRelay {
    pub fn new(stats: Arc<RelayStats>) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    pending: None,
                    surface: None,
                    announced_size: None,
                    signaled_size: None,
                    next_sequence: 0,
                    accepting: true,
                }),
                work_ready: Condvar::new(),
                delivery: Mutex::new(()),
                stats,
            }),
        }
    }

    /// 引擎声明新的输出尺寸
    pub fn on_vout_size_changed(&self, width: u32, height: u32) {
        let size = FrameSize::new(width, height);
        let mut slot = self.shared.slot.lock();
        if !slot.accepting || slot.announced_size == Some(size) {
            return;
        }
        debug!("引擎声明视频尺寸: {}", size);
        slot.announced_size = Some(size);
        let wake = slot.has_work();
        drop(slot);
        if wake {
            self.shared.work_ready.notify_one();
        }
    }

    /// 引擎交付一帧（带尺寸）
    pub fn on_frame_ready(&self, data: Vec<u8>, width: u32, height: u32) -> FrameDelivery {
        self.shared.stats.frame_received();

        let mut slot = self.shared.slot.lock();
        let sequence = slot.next_sequence;
        slot.next_sequence += 1;

        if !slot.accepting {
            return FrameDelivery::Discarded;
        }

        slot.announced_size = Some(FrameSize::new(width, height));

        if slot.surface.is_none() {
            drop(slot);
            self.shared.stats.record(RelayEvent::FrameDropped { sequence });
            return FrameDelivery::Discarded;
        }

        let frame = VideoFrame {
            data,
            width,
            height,
            sequence,
        };
        let replaced = slot.pending.replace(frame);
        drop(slot);

        // 通知渲染线程，不等待绘制
        self.shared.work_ready.notify_one();

        match replaced {
            Some(old) => {
                self.shared
                    .stats
                    .record(RelayEvent::FrameDropped { sequence: old.sequence });
                FrameDelivery::Replaced
            }
            None => FrameDelivery::Stored,
        }
    }

    /// 引擎交付一帧（沿用最近声明的尺寸）
    pub fn on_frame_ready_current_size(&self, data: Vec<u8>) -> FrameDelivery {
        let size = self.shared.slot.lock().announced_size;
        match size {
            Some(size) => self.on_frame_ready(data, size.width, size.height),
            None => {
                debug!("尚未收到视频尺寸，丢弃帧");
                self.shared.stats.frame_received();
                FrameDelivery::Discarded
            }
        }
    }

    /// 更换渲染目标；旧 surface 上未绘制的帧被丢弃，返回后不会再向旧 surface 绘制
    pub fn set_surface(&self, surface: Option<SurfaceHandle>) {
        let _delivery = self.shared.delivery.lock();
        let mut slot = self.shared.slot.lock();

        if let Some(frame) = slot.pending.take() {
            self.shared
                .stats
                .record(RelayEvent::FrameDropped { sequence: frame.sequence });
        }

        match &surface {
            Some(s) => info!("🖼 绑定渲染目标: {}", s.description()),
            None => info!("🖼 解除渲染目标"),
        }
        slot.surface = surface;
        // 新 surface 需要重新收到当前尺寸
        slot.signaled_size = None;

        let wake = slot.has_work();
        drop(slot);
        if wake {
            self.shared.work_ready.notify_one();
        }
    }

    /// 丢弃槽位中未渲染的帧
    pub fn discard_pending(&self) {
        let frame = self.shared.slot.lock().pending.take();
        if let Some(frame) = frame {
            self.shared
                .stats
                .record(RelayEvent::FrameDropped { sequence: frame.sequence });
        }
    }

    pub fn has_surface(&self) -> bool {
        self.shared.slot.lock().surface.is_some()
    }

    /// 等待可渲染的工作，返回 false 表示超时或已停止
    pub fn wait_for_work(&self, timeout: Duration) -> bool {
        let mut slot = self.shared.slot.lock();
        if slot.has_work() {
            return true;
        }
        if !slot.accepting {
            return false;
        }
        self.shared.work_ready.wait_for(&mut slot, timeout);
        slot.has_work()
    }

    /// 消费者：处理尺寸变化并绘制槽位中的最新帧
    ///
    /// 返回 true 表示调用了 surface 回调
    pub fn render_pending(&self) -> bool {
        let _delivery = self.shared.delivery.lock();

        let (surface, mode_change, frame) = {
            let mut slot = self.shared.slot.lock();
            if !slot.accepting {
                return false;
            }
            let surface = match slot.surface.clone() {
                Some(surface) => surface,
                None => return false,
            };

            let frame = slot.pending.take();
            let target = frame.as_ref().map(|f| f.size()).or(slot.announced_size);
            let mode_change = match target {
                Some(size) if slot.signaled_size != Some(size) => {
                    slot.signaled_size = Some(size);
                    Some(size)
                }
                _ => None,
            };

            if frame.is_none() && mode_change.is_none() {
                return false;
            }
            (surface, mode_change, frame)
        };

        if let Some(size) = mode_change {
            self.shared.stats.record(RelayEvent::ModeChanged(size));
            surface.on_mode_change(size);
        }
        if let Some(frame) = frame {
            surface.draw(&frame);
            self.shared
                .stats
                .record(RelayEvent::FrameRendered { sequence: frame.sequence });
        }
        true
    }

    /// 停止转发：丢弃槽位中的帧，等待正在进行的绘制结束
    ///
    /// 返回后不会再有任何 surface 回调
    pub fn quiesce(&self) {
        {
            let mut slot = self.shared.slot.lock();
            if !slot.accepting {
                return;
            }
            slot.accepting = false;
            if let Some(frame) = slot.pending.take() {
                self.shared
                    .stats
                    .record(RelayEvent::FrameDropped { sequence: frame.sequence });
            }
        }

        // 等待渲染线程退出临界区
        drop(self.shared.delivery.lock());
        self.shared.work_ready.notify_all();

        let mut slot = self.shared.slot.lock();
        slot.surface = None;
        debug!("视频转发已停止");
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.slot.lock().accepting
    }
}
