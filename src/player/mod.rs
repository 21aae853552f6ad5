// 播放器核心模块：引擎接口、会话、音频转发与输出

pub mod engine;
pub mod session;
pub mod audio_relay;
pub mod audio_output;
pub mod native_library;
pub mod synthetic_engine;
pub mod stats;

pub use engine::{EngineCallbacks, NativeEngine};
pub use session::{default_sink_factory, EngineHandle};
pub use audio_relay::{AudioBufferRelay, AudioDelivery};
pub use audio_output::{AudioSink, AudioSinkFactory, NullAudioSink, NullAudioSinkFactory};
#[cfg(feature = "cpal-output")]
pub use audio_output::{CpalAudioSink, CpalAudioSinkFactory};
pub use native_library::NativeLibrary;
pub use synthetic_engine::{SyntheticEngine, SyntheticSpec};
pub use stats::{RelayEvent, RelayStats, StatsSnapshot};
