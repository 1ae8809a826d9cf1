//! 推送处理器
//!
//! 高优先级走 OneSignal（按渠道区分应用），普通优先级走 FCM 多播。

use dispatch_shared::observability::metrics::record_provider_request;
use tracing::info;

use super::{CategoryHandlers, decode_payload};
use crate::error::WorkerError;
use crate::metadata::MessageMetadata;
use crate::model::{
    ConsumedEnvelope, FcmPushResponse, OneSignalResponse, PublishedEnvelope, Push, STATUS_CREATED,
};
use crate::provider::{FCM_SERVICE, ONESIGNAL_SERVICE};
use crate::topology::{PriorityTier, TopicKind};

/// FCM 没有任何一个设备成功即视为失败
pub(super) fn accept_fcm(
    result: Result<FcmPushResponse, WorkerError>,
) -> Result<String, WorkerError> {
    let outcome = result.and_then(|res| {
        if res.success == 0 && res.failure > 0 {
            Err(WorkerError::ProviderRejected {
                provider: FCM_SERVICE,
                message: format!("全部 {} 个设备投递失败", res.failure),
            })
        } else {
            Ok(res.message_id())
        }
    });
    record_provider_request(FCM_SERVICE, outcome.is_ok());
    outcome
}

/// OneSignal 返回空 id 表示通知未创建
pub(super) fn accept_onesignal(
    result: Result<OneSignalResponse, WorkerError>,
) -> Result<String, WorkerError> {
    let outcome = result.and_then(|res| {
        if res.id.is_empty() {
            Err(WorkerError::ProviderRejected {
                provider: ONESIGNAL_SERVICE,
                message: res
                    .errors
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "通知未创建".to_string()),
            })
        } else {
            Ok(res.id)
        }
    });
    record_provider_request(ONESIGNAL_SERVICE, outcome.is_ok());
    outcome
}

impl CategoryHandlers {
    pub async fn handle_push(
        &self,
        meta: &MessageMetadata,
        envelope: &ConsumedEnvelope,
    ) -> Result<(), WorkerError> {
        let mut push: Push = decode_payload(envelope, "推送负载")?;
        push.status = STATUS_CREATED.to_string();

        let mut published = PublishedEnvelope::from(envelope);
        self.publish_status(TopicKind::Push, meta, &mut published, &push)
            .await?;

        let (provider, message_id) = match self.settings.priority {
            PriorityTier::High => {
                let app_id = self.onesignal_app_id(&envelope.channel_name)?;
                let result = self.provider.send_onesignal_push(&app_id, &push).await;
                (ONESIGNAL_SERVICE, accept_onesignal(result)?)
            }
            PriorityTier::Normal => {
                let result = self.provider.send_fcm_push(&push).await;
                (FCM_SERVICE, accept_fcm(result)?)
            }
        };

        info!(
            activity = "send_push",
            provider,
            message_id = %message_id,
            devices = push.player_ids.len(),
            elapsed_ms = meta.elapsed_ms(),
            "推送发送成功"
        );
        Ok(())
    }
}
