//! 类别处理器
//!
//! 四个处理器共享同一流程：解码负载 -> 置为 created 并发布状态信封 -> 调用供应商。
//! 任一步失败都以错误返回，由调度器的重试包装决定是否再来一次。

mod email;
mod in_app;
mod push;
mod sms;

use std::sync::Arc;

use dispatch_shared::config::OneSignalProviderConfig;
use dispatch_shared::observability::metrics::record_provider_request;
use dispatch_shared::retry::RetryPolicy;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::WorkerError;
use crate::metadata::MessageMetadata;
use crate::model::{ConsumedEnvelope, ProviderReply, PublishedEnvelope};
use crate::producer::EnvelopePublisher;
use crate::provider::DeliveryProvider;
use crate::topology::{Channel, PriorityTier, TopicKind};

pub use email::inject_webhook;

/// 处理器在启动时确定的参数
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub priority: PriorityTier,
    /// 本实例部署的渠道；信封未携带渠道时用于查找 OneSignal 应用
    pub deployment_channel: Channel,
    pub email_webhook: String,
    pub email_reply_config: String,
    pub onesignal: OneSignalProviderConfig,
    /// 短信池 topic 发布的重试策略；网关已受理后只重试这一步
    pub pool_retry: RetryPolicy,
}

pub struct CategoryHandlers {
    publisher: Arc<dyn EnvelopePublisher>,
    provider: Arc<dyn DeliveryProvider>,
    settings: HandlerSettings,
}

impl CategoryHandlers {
    pub fn new(
        publisher: Arc<dyn EnvelopePublisher>,
        provider: Arc<dyn DeliveryProvider>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            publisher,
            provider,
            settings,
        }
    }

    /// 把负载写入信封后发布到该类别的状态 topic
    async fn publish_status<T: Serialize>(
        &self,
        kind: TopicKind,
        meta: &MessageMetadata,
        envelope: &mut PublishedEnvelope,
        payload: &T,
    ) -> Result<(), WorkerError> {
        envelope.set_payload(payload)?;
        self.publisher.publish(kind, meta, envelope).await
    }

    /// 信封渠道优先，其次是部署渠道
    fn onesignal_app_id(&self, envelope_channel: &str) -> Result<String, WorkerError> {
        let onesignal = &self.settings.onesignal;
        onesignal
            .app_id_for(envelope_channel)
            .or_else(|| onesignal.app_id_for(self.settings.deployment_channel.as_str()))
            .map(String::from)
            .ok_or_else(|| WorkerError::ProviderNotConfigured {
                what: format!("渠道 {envelope_channel} 的 OneSignal app id"),
            })
    }
}

fn decode_payload<T: DeserializeOwned>(
    envelope: &ConsumedEnvelope,
    what: &'static str,
) -> Result<T, WorkerError> {
    envelope
        .decode_payload()
        .map_err(|e| WorkerError::decode(what, e))
}

/// 校验网关返回的成功标记并记录供应商指标
fn accept_reply(
    provider: &'static str,
    result: Result<ProviderReply, WorkerError>,
    success_token: &str,
) -> Result<ProviderReply, WorkerError> {
    let outcome = result.and_then(|reply| {
        if reply.is_success(success_token) {
            Ok(reply)
        } else {
            warn!(provider, message = %reply.message, code = %reply.code, "供应商返回非成功标记");
            Err(WorkerError::ProviderRejected {
                provider,
                message: reply.message,
            })
        }
    });
    record_provider_request(provider, outcome.is_ok());
    outcome
}
