use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use media_relay::core::{FrameSize, PlaybackEvent, RelayConfig, VideoFrame};
use media_relay::player::{EngineHandle, NativeLibrary, SyntheticEngine};
use media_relay::renderer::VideoSurface;

/// 通过转发层播放测试源
#[derive(Parser, Debug)]
#[command(name = "media_relay", version, about = "原生媒体引擎转发层演示")]
struct Args {
    /// 要播放的 MRL
    #[arg(long, default_value = "synthetic://320x240?fps=25&seconds=3")]
    mrl: String,

    /// 最长运行时间（秒）
    #[arg(long, default_value_t = 5.0)]
    seconds: f32,

    /// JSON 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 原生引擎库路径（提供构建信息）
    #[arg(long)]
    library: Option<PathBuf>,

    /// 生成该文件的缩略图
    #[arg(long)]
    thumbnail: Option<String>,

    /// 缩略图尺寸，例如 160x90
    #[arg(long, default_value = "160x90")]
    size: String,
}

/// 只记录日志的渲染目标
struct LoggingSurface {
    frames: AtomicU64,
    current_size: Mutex<Option<FrameSize>>,
}

impl VideoSurface for LoggingSurface {
    fn on_mode_change(&self, size: FrameSize) {
        info!("🖥 渲染目标重建: {}", size);
        *self.current_size.lock() = Some(size);
    }

    fn draw(&self, frame: &VideoFrame) {
        let count = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if count <= 3 || count % 25 == 0 {
            info!("🖼 绘制第 {} 帧（#{}，{} 字节）", count, frame.sequence, frame.data.len());
        }
    }

    fn description(&self) -> String {
        "logging surface".to_string()
    }
}

/// 原生库加载失败时无法建立任何会话，报告后退出进程
fn load_library_or_exit(path: &Path) -> NativeLibrary {
    match NativeLibrary::load(path) {
        Ok(library) => library,
        Err(e) => {
            error!("❌ 无法加载原生库: {}", e);
            std::process::exit(1);
        }
    }
}

fn parse_size(size: &str) -> Result<(u32, u32)> {
    let (w, h) = size
        .split_once('x')
        .with_context(|| format!("无效的尺寸: {}", size))?;
    Ok((w.parse()?, h.parse()?))
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    info!("🎬 media_relay 启动");

    let config = match &args.config {
        Some(path) => RelayConfig::load_from_file(path)?,
        None => RelayConfig::default(),
    };

    let library = args.library.as_deref().map(load_library_or_exit);
    let engine = match &library {
        Some(library) => SyntheticEngine::with_build_info(library.build_info()?),
        None => SyntheticEngine::new(),
    };

    let session = EngineHandle::new(Arc::new(engine), config)?;
    info!(
        "引擎版本: {}，编译器: {}，变更集: {}",
        session.version(),
        session.compiler(),
        session.changeset()
    );

    let surface = Arc::new(LoggingSurface {
        frames: AtomicU64::new(0),
        current_size: Mutex::new(None),
    });
    session.set_surface(Some(surface.clone()))?;
    session.init()?;

    if let Some(path) = &args.thumbnail {
        let (width, height) = parse_size(&args.size)?;
        match session.get_thumbnail(path, width, height)? {
            Some(data) => info!("🖼 缩略图 {}x{}: {} 字节", width, height, data.len()),
            None => warn!("⚠️  无法生成缩略图: {}", path),
        }
    }

    session.read_media(&args.mrl)?;

    let events = session.events();
    let deadline = Instant::now() + Duration::from_secs_f32(args.seconds.max(0.0));
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(remaining) {
            Ok(PlaybackEvent::EndReached) => {
                info!("📄 播放结束");
                break;
            }
            Ok(PlaybackEvent::EncounteredError { mrl, reason }) => {
                error!("❌ 播放失败 {}: {}", mrl, reason);
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    info!("音频位置: {}ms", session.audio_position_ms());
    session.destroy();

    let stats = session.stats();
    info!(
        "📊 统计: {}",
        serde_json::to_string(&stats).unwrap_or_else(|_| format!("{:?}", stats))
    );
    info!(
        "最终画面尺寸: {:?}，绘制 {} 帧",
        *surface.current_size.lock(),
        surface.frames.load(Ordering::Relaxed)
    );

    Ok(())
}
