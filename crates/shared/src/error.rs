//! 统一错误处理模块
//!
//! 定义调度系统中各 crate 共享的基础设施错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum DispatchError {
    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    #[error("消息发布超时: topic={topic} timeout_ms={timeout_ms}")]
    PublishTimeout { topic: String, timeout_ms: u64 },

    // ==================== 序列化错误 ====================
    #[error("序列化失败: {0}")]
    Serialization(String),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(String),

    // ==================== 外部服务错误 ====================
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("外部服务超时: {service}")]
    ExternalServiceTimeout { service: String },

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, DispatchError>;

impl DispatchError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::PublishTimeout { .. } => "PUBLISH_TIMEOUT",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::ExternalServiceTimeout { .. } => "EXTERNAL_SERVICE_TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// Broker 与外部服务的故障视为瞬时故障；序列化和配置问题重试也不会成功。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Kafka(_)
                | Self::PublishTimeout { .. }
                | Self::ExternalService { .. }
                | Self::ExternalServiceTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = DispatchError::PublishTimeout {
            topic: "cns_trc_sms".to_string(),
            timeout_ms: 5000,
        };
        assert_eq!(err.code(), "PUBLISH_TIMEOUT");
        assert_eq!(
            err.to_string(),
            "消息发布超时: topic=cns_trc_sms timeout_ms=5000"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(DispatchError::Kafka("broker down".to_string()).is_retryable());
        assert!(
            DispatchError::ExternalService {
                service: "sms".to_string(),
                message: "502".to_string(),
            }
            .is_retryable()
        );

        assert!(!DispatchError::Serialization("bad json".to_string()).is_retryable());
        assert!(!DispatchError::Config("missing brokers".to_string()).is_retryable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: DispatchError = json_err.into();
        assert_eq!(err.code(), "SERIALIZATION_ERROR");
    }
}
