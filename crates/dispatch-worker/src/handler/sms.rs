//! 短信处理器
//!
//! 两阶段状态：发送前以 created 发布到短信 topic，网关受理后以 on process
//! 携带网关 msgid 发布到池 topic，供异步回执追踪。

use dispatch_shared::retry::retry_with_policy;
use tracing::info;

use super::{CategoryHandlers, accept_reply, decode_payload};
use crate::error::WorkerError;
use crate::metadata::MessageMetadata;
use crate::model::{
    ConsumedEnvelope, PublishedEnvelope, SMS_SUCCESS_TOKEN, STATUS_CREATED, STATUS_ON_PROCESS, Sms,
    SmsResponseCode,
};
use crate::provider::SMS_SERVICE;
use crate::topology::TopicKind;

impl CategoryHandlers {
    pub async fn handle_sms(
        &self,
        meta: &MessageMetadata,
        envelope: &ConsumedEnvelope,
    ) -> Result<(), WorkerError> {
        let mut sms: Sms = decode_payload(envelope, "短信负载")?;
        sms.status = STATUS_CREATED.to_string();

        let mut published = PublishedEnvelope::from(envelope);
        self.publish_status(TopicKind::Sms, meta, &mut published, &sms)
            .await?;

        let result = self.provider.send_sms(&sms).await;
        let reply = accept_reply(SMS_SERVICE, result, SMS_SUCCESS_TOKEN)?;

        let code: SmsResponseCode = serde_json::from_str(&reply.code)
            .map_err(|e| WorkerError::decode("短信网关 kode", e))?;

        sms.status = STATUS_ON_PROCESS.to_string();
        sms.message_id = code.msgid;
        published.set_payload(&sms)?;

        let publisher = &self.publisher;
        let pooled = &published;
        retry_with_policy(
            &self.settings.pool_retry,
            "publish_sms_pool",
            |e: &WorkerError| e.is_retryable(),
            move || publisher.publish(TopicKind::SmsPool, meta, pooled),
        )
        .await
        .map_err(|e| WorkerError::PoolPublishFailed {
            message_id: sms.message_id.clone(),
            reason: e.to_string(),
        })?;

        info!(
            activity = "send_sms",
            msisdn = %sms.recipient_phone_number,
            message_id = %sms.message_id,
            elapsed_ms = meta.elapsed_ms(),
            "短信已受理"
        );
        Ok(())
    }
}
