//! 调度 worker 专用错误类型
//!
//! 在共享库 DispatchError 基础上定义处理管道特有的错误变体，
//! 由 `is_retryable` 决定处理器重试包装是否再次尝试。

use dispatch_shared::error::DispatchError;

/// 处理管道错误
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// 信封或类别负载不是合法 JSON，重试无意义
    #[error("解码失败: {what} - {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("不支持的通知类别: {0}")]
    UnsupportedCategory(String),

    /// 调用成功但返回的结果不是成功标记
    #[error("供应商拒绝: {provider} - {message}")]
    ProviderRejected {
        provider: &'static str,
        message: String,
    },

    #[error("供应商未配置: {what}")]
    ProviderNotConfigured { what: String },

    /// 网关已受理，但追踪记录未能写入池 topic；再次尝试会重复下发短信
    #[error("短信池发布失败: msgid={message_id} - {reason}")]
    PoolPublishFailed { message_id: String, reason: String },

    /// 透传共享库错误，避免在每个 match 分支手动转换
    #[error(transparent)]
    Shared(#[from] DispatchError),
}

impl WorkerError {
    pub fn decode(what: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            what,
            reason: err.to_string(),
        }
    }

    /// 是否值得在重试包装内再次尝试
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Decode { .. }
            | Self::UnsupportedCategory(_)
            | Self::ProviderNotConfigured { .. }
            | Self::PoolPublishFailed { .. } => false,
            Self::ProviderRejected { .. } => true,
            Self::Shared(e) => e.is_retryable(),
        }
    }
}
