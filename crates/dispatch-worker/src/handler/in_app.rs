use tracing::info;

use super::push::accept_onesignal;
use super::{CategoryHandlers, decode_payload};
use crate::error::WorkerError;
use crate::metadata::MessageMetadata;
use crate::model::{ConsumedEnvelope, InApp, PublishedEnvelope, STATUS_CREATED};
use crate::topology::TopicKind;

impl CategoryHandlers {
    /// 站内信经 OneSignal 投递，不区分优先级
    pub async fn handle_in_app(
        &self,
        meta: &MessageMetadata,
        envelope: &ConsumedEnvelope,
    ) -> Result<(), WorkerError> {
        let mut in_app: InApp = decode_payload(envelope, "站内信负载")?;
        in_app.status = STATUS_CREATED.to_string();

        let mut published = PublishedEnvelope::from(envelope);
        self.publish_status(TopicKind::InApp, meta, &mut published, &in_app)
            .await?;

        let app_id = self.onesignal_app_id(&envelope.channel_name)?;
        let result = self.provider.send_in_app(&app_id, &in_app).await;
        let notification_id = accept_onesignal(result)?;

        info!(
            activity = "send_in_app",
            notification_id = %notification_id,
            segments = ?in_app.segments,
            elapsed_ms = meta.elapsed_ms(),
            "站内信发送成功"
        );
        Ok(())
    }
}
