use crate::core::{
    AudioBuffer, AudioClock, AudioRelayConfig, AudioSinkConfig, ClosePolicy, OverflowPolicy,
    PlayerError, Result, SinkState,
};
use crate::player::audio_output::{AudioSink, AudioSinkFactory};
use crate::player::stats::{RelayEvent, RelayStats};
use crossbeam::atomic::AtomicCell;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 单个缓冲的交付结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioDelivery {
    Queued,
    /// 队列满且等待超时（仅 `OverflowPolicy::Drop`）
    Dropped,
}

/// 音频缓冲转发 - 有界 FIFO，顺序严格保持
///
/// 生产者（引擎线程）把缓冲送入有界通道，输出线程按设备节拍取出并写入 sink。
/// 队列满时的行为由 `OverflowPolicy` 决定：
/// - `Drop`：最多等待 `backpressure_timeout_ms`，然后丢弃该缓冲并记录事件；
/// - `Block`：一直背压，直到有空位或输出被关闭。
pub struct AudioBufferRelay {
    config: AudioRelayConfig,
    factory: Arc<dyn AudioSinkFactory>,
    stats: Arc<RelayStats>,
    clock: AudioClock,
    state: Arc<AtomicCell<SinkState>>,
    inner: Mutex<Option<OpenSink>>,
    shutting_down: AtomicBool,  // 会话销毁中，不再打开新输出
}

/// 已打开的输出
struct OpenSink {
    config: AudioSinkConfig,
    sender: Sender<AudioBuffer>,
    closing: Arc<AtomicBool>,
    discard: Arc<AtomicBool>,
    thread_handle: JoinHandle<()>,
}

/// 输出线程持有的上下文
struct OutputWorker {
    config: AudioSinkConfig,
    receiver: Receiver<AudioBuffer>,
    state: Arc<AtomicCell<SinkState>>,
    closing: Arc<AtomicBool>,
    discard: Arc<AtomicBool>,
    stats: Arc<RelayStats>,
    clock: AudioClock,
    starve_after: Duration,
}

impl AudioBufferRelay {
    pub fn new(
        config: AudioRelayConfig,
        factory: Arc<dyn AudioSinkFactory>,
        stats: Arc<RelayStats>,
        clock: AudioClock,
    ) -> Self {
        Self {
            config,
            factory,
            stats,
            clock,
            state: Arc::new(AtomicCell::new(SinkState::Closed)),
            inner: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SinkState {
        self.state.load()
    }

    /// 当前输出参数
    pub fn sink_config(&self) -> Option<AudioSinkConfig> {
        self.inner.lock().as_ref().map(|open| open.config)
    }

    /// 队列中等待播放的缓冲数
    pub fn queued(&self) -> usize {
        self.inner.lock().as_ref().map_or(0, |open| open.sender.len())
    }

    /// 打开音频输出
    ///
    /// 参数与当前输出相同时什么都不做；参数不同则按关闭策略关闭旧输出后重新打开。
    pub fn open_sink(&self, sink_config: AudioSinkConfig) -> Result<()> {
        sink_config.validate()?;

        let mut inner = self.inner.lock();
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(PlayerError::invalid_state("on_audio_sink_open", "shutting down"));
        }
        if let Some(open) = inner.as_ref() {
            if open.config == sink_config {
                debug!("音频输出参数未变化，忽略重复打开: {}", sink_config);
                return Ok(());
            }
        }
        if let Some(open) = inner.take() {
            info!(
                "{} 🔁 音频参数变化，重新打开输出: {} -> {}",
                log_ctx(),
                open.config,
                sink_config
            );
            self.shutdown_sink(open, self.config.close_policy);
        }

        let open = self.spawn_output(sink_config)?;
        self.clock.reset(sink_config.sample_rate);
        self.state.store(SinkState::Open);
        *inner = Some(open);

        info!("{} 🔊 音频输出已打开: {}", log_ctx(), sink_config);
        Ok(())
    }

    /// 启动输出线程，并等待 sink 在该线程上打开的结果
    fn spawn_output(&self, sink_config: AudioSinkConfig) -> Result<OpenSink> {
        let (sender, receiver) = bounded::<AudioBuffer>(self.config.queue_capacity);
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

        let closing = Arc::new(AtomicBool::new(false));
        let discard = Arc::new(AtomicBool::new(false));
        let grace = self.config.underrun_grace as f64;
        let starve_after =
            Duration::try_from_secs_f64(sink_config.buffer_duration().as_secs_f64() * grace)
                .map_err(|e| {
                    PlayerError::InvalidArgument(format!("audio.underrun_grace 无效 ({}): {}", grace, e))
                })?
                .max(Duration::from_millis(1));

        let worker = OutputWorker {
            config: sink_config,
            receiver,
            state: self.state.clone(),
            closing: closing.clone(),
            discard: discard.clone(),
            stats: self.stats.clone(),
            clock: self.clock.clone(),
            starve_after,
        };
        let factory = self.factory.clone();

        let thread_handle = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match factory.open(&worker.config) {
                Ok(sink) => {
                    let _ = ready_tx.send(Ok(()));
                    worker.run(sink);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(OpenSink {
                config: sink_config,
                sender,
                closing,
                discard,
                thread_handle,
            }),
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                error!("{} ❌ 打开音频输出失败: {}", log_ctx(), e);
                Err(e)
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(PlayerError::AudioError("音频输出线程启动失败".to_string()))
            }
        }
    }

    /// 引擎交付一个 PCM 缓冲
    pub fn on_buffer_ready(&self, data: Vec<u8>, size: usize, sample_count: usize) -> Result<AudioDelivery> {
        self.push(AudioBuffer::new(data, size, sample_count))
    }

    /// 按到达顺序入队
    pub fn push(&self, buffer: AudioBuffer) -> Result<AudioDelivery> {
        // 只在锁内克隆发送端，等待发生在锁外
        let (sender, closing) = match self.inner.lock().as_ref() {
            Some(open) => (open.sender.clone(), open.closing.clone()),
            None => return Err(PlayerError::invalid_state("on_buffer_ready", SinkState::Closed)),
        };

        let timeout = self.config.backpressure_timeout();
        let mut buffer = buffer;
        loop {
            match sender.send_timeout(buffer, timeout) {
                Ok(()) => {
                    self.stats.record(RelayEvent::AudioBufferQueued);
                    return Ok(AudioDelivery::Queued);
                }
                Err(SendTimeoutError::Timeout(returned)) => {
                    if closing.load(Ordering::Acquire) {
                        return Err(PlayerError::invalid_state("on_buffer_ready", SinkState::Closed));
                    }
                    match self.config.overflow_policy {
                        OverflowPolicy::Drop => {
                            self.stats.record(RelayEvent::AudioBufferDropped);
                            return Ok(AudioDelivery::Dropped);
                        }
                        OverflowPolicy::Block => {
                            debug!("音频队列已满，继续等待输出线程消耗");
                            buffer = returned;
                        }
                    }
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(PlayerError::AudioError("音频输出线程已退出".to_string()));
                }
            }
        }
    }

    /// 关闭输出，剩余缓冲按配置的关闭策略处理
    pub fn close_sink(&self) {
        self.close_with(self.config.close_policy);
    }

    /// 立即关闭并丢弃剩余缓冲；返回后不会再写入 sink
    pub fn shutdown(&self) {
        self.close_with(ClosePolicy::Discard);
    }

    /// 标记转发正在关闭：被背压阻塞的生产者在下一次超时后返回，剩余缓冲不再写入，
    /// 之后的 `open_sink` 都会被拒绝
    pub fn begin_shutdown(&self) {
        let inner = self.inner.lock();
        self.shutting_down.store(true, Ordering::Release);
        if let Some(open) = inner.as_ref() {
            open.closing.store(true, Ordering::Release);
            open.discard.store(true, Ordering::Release);
        }
    }

    fn close_with(&self, policy: ClosePolicy) {
        let open = self.inner.lock().take();
        match open {
            Some(open) => self.shutdown_sink(open, policy),
            None => debug!("音频输出未打开，忽略关闭"),
        }
    }

    fn shutdown_sink(&self, open: OpenSink, policy: ClosePolicy) {
        info!("{} 🛑 关闭音频输出（{:?}，队列剩余 {}）", log_ctx(), policy, open.sender.len());

        open.closing.store(true, Ordering::Release);
        if policy == ClosePolicy::Discard {
            open.discard.store(true, Ordering::Release);
        }

        // drop 发送端，输出线程处理完剩余缓冲后退出
        drop(open.sender);
        if open.thread_handle.join().is_err() {
            warn!("{} ⚠ 音频输出线程异常退出", log_ctx());
        }

        self.state.store(SinkState::Closed);
    }
}

impl Drop for AudioBufferRelay {
    fn drop(&mut self) {
        if self.inner.get_mut().is_some() {
            warn!("{} ⚠ AudioBufferRelay 被 drop 时输出仍打开，正在关闭", log_ctx());
            self.shutdown();
        }
    }
}

impl OutputWorker {
    /// 输出循环（在独立线程中运行）
    fn run(self, mut sink: Box<dyn AudioSink>) {
        info!("{} 🎵 音频输出线程启动: {}", log_ctx(), sink.description());

        let mut starved = false;
        let mut played: u64 = 0;

        loop {
            match self.receiver.recv_timeout(self.starve_after) {
                Ok(buffer) => {
                    if self.discard.load(Ordering::Acquire) {
                        continue;
                    }
                    // 开始读取队列即进入 Playing
                    let _ = self.state.compare_exchange(SinkState::Open, SinkState::Playing);
                    starved = false;

                    match sink.write(&buffer) {
                        Ok(()) => {
                            played += 1;
                            self.clock
                                .advance((buffer.size / self.config.frame_bytes()) as u64);
                            self.stats.record(RelayEvent::AudioBufferPlayed {
                                sample_count: buffer.sample_count,
                            });
                        }
                        Err(e) => {
                            // 写入错误不影响生产者，继续处理后续缓冲
                            warn!("{} ⚠ 写入音频缓冲失败: {}", log_ctx(), e);
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    let playing = self.state.load() == SinkState::Playing;
                    if playing && !starved && !self.closing.load(Ordering::Acquire) {
                        starved = true;
                        self.stats.record(RelayEvent::AudioUnderrun);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if !self.discard.load(Ordering::Acquire) {
            if let Err(e) = sink.flush() {
                warn!("{} ⚠ 音频输出 flush 失败: {}", log_ctx(), e);
            }
        }
        drop(sink);

        info!("{} 🛑 音频输出线程退出（共播放 {} 个缓冲）", log_ctx(), played);
    }
}
