use thiserror::Error;

use super::types::LifecycleState;

#[derive(Error, Debug)]
pub enum PlayerError {
    /// 原生引擎启动失败，会话不可用，需要重新 init
    #[error("引擎初始化失败: {0}")]
    EngineInit(String),

    /// 生命周期顺序错误（调用方的编程错误）
    #[error("非法状态: {operation} 不能在 {state} 状态下调用")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// 不支持的音频输出参数，可换参数重试
    #[error("音频参数错误: {0}")]
    AudioConfig(String),

    #[error("原生库加载失败: {0}")]
    LibraryLoad(String),

    #[error("参数错误: {0}")]
    InvalidArgument(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    ConfigError(#[from] serde_json::Error),

    #[error("其他错误: {0}")]
    Other(String),

    #[error("Anyhow 错误: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl PlayerError {
    pub fn invalid_state(operation: &'static str, state: impl ToString) -> Self {
        PlayerError::InvalidState {
            operation,
            state: state.to_string(),
        }
    }

    /// 生命周期版本的便捷构造
    pub fn lifecycle(operation: &'static str, state: LifecycleState) -> Self {
        Self::invalid_state(operation, state)
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
