//! 类别分发
//!
//! 类别名在边界处解析为封闭枚举，之后按枚举穷举匹配到处理器。
//! 每次处理器调用都包在同一重试策略内。

use std::fmt;
use std::str::FromStr;

use dispatch_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::WorkerError;
use crate::handler::CategoryHandlers;
use crate::metadata::MessageMetadata;
use crate::model::ConsumedEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Email,
    Sms,
    Push,
    InApp,
}

impl Category {
    pub const ALL: [Category; 4] = [Self::Email, Self::Sms, Self::Push, Self::InApp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Push => "push",
            Self::InApp => "inapp",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 只接受完全一致的小写类别名
impl FromStr for Category {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| WorkerError::UnsupportedCategory(s.to_string()))
    }
}

pub struct Dispatcher {
    handlers: CategoryHandlers,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(handlers: CategoryHandlers, retry: RetryPolicy) -> Self {
        Self { handlers, retry }
    }

    /// 调用该类别的处理器，重试用尽后返回最后一次的错误
    pub async fn dispatch(
        &self,
        meta: &MessageMetadata,
        envelope: &ConsumedEnvelope,
        category: Category,
    ) -> Result<(), WorkerError> {
        let handlers = &self.handlers;
        let is_retryable = |e: &WorkerError| e.is_retryable();

        match category {
            Category::Email => {
                retry_with_policy(&self.retry, "handle_email", is_retryable, move || {
                    handlers.handle_email(meta, envelope)
                })
                .await
            }
            Category::Sms => {
                retry_with_policy(&self.retry, "handle_sms", is_retryable, move || {
                    handlers.handle_sms(meta, envelope)
                })
                .await
            }
            Category::Push => {
                retry_with_policy(&self.retry, "handle_push", is_retryable, move || {
                    handlers.handle_push(meta, envelope)
                })
                .await
            }
            Category::InApp => {
                retry_with_policy(&self.retry, "handle_in_app", is_retryable, move || {
                    handlers.handle_in_app(meta, envelope)
                })
                .await
            }
        }
    }
}
