use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dispatch_shared::error::DispatchError;
use tracing::info;

use super::{CategoryHandlers, accept_reply, decode_payload};
use crate::error::WorkerError;
use crate::metadata::MessageMetadata;
use crate::model::{
    ConsumedEnvelope, EMAIL_SUCCESS_TOKEN, Email, PublishedEnvelope, STATUS_CREATED,
};
use crate::provider::EMAIL_SERVICE;
use crate::topology::TopicKind;

/// 在 HTML 正文末尾追加 1x1 打开追踪图片
///
/// 图片地址为 webhook 基址拼接 `data=` 与邮件 JSON 的 URL 安全 base64。
/// webhook 为空时不做修改。
pub fn inject_webhook(webhook: &str, email: &mut Email) -> Result<(), WorkerError> {
    if webhook.is_empty() {
        return Ok(());
    }

    let raw = serde_json::to_vec(email).map_err(DispatchError::from)?;
    let encoded = URL_SAFE_NO_PAD.encode(raw);
    email.content_html.push_str(&format!(
        r#"<img src="{webhook}data={encoded}" alt="" width="1" height="1">"#
    ));
    Ok(())
}

impl CategoryHandlers {
    pub async fn handle_email(
        &self,
        meta: &MessageMetadata,
        envelope: &ConsumedEnvelope,
    ) -> Result<(), WorkerError> {
        let mut email: Email = decode_payload(envelope, "邮件负载")?;
        email.status = STATUS_CREATED.to_string();

        let mut published = PublishedEnvelope::from(envelope);
        self.publish_status(TopicKind::Email, meta, &mut published, &email)
            .await?;

        inject_webhook(&self.settings.email_webhook, &mut email)?;

        let result = self
            .provider
            .send_email(&self.settings.email_reply_config, &email)
            .await;
        let reply = accept_reply(EMAIL_SERVICE, result, EMAIL_SUCCESS_TOKEN)?;

        info!(
            activity = "send_email",
            to = ?email.recipient_to,
            code = %reply.code,
            elapsed_ms = meta.elapsed_ms(),
            "邮件发送成功"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::super::test_support::*;
    use super::*;
    use crate::model::ProviderReply;
    use crate::provider::MockDeliveryProvider;
    use crate::topology::PriorityTier;

    fn email_json() -> serde_json::Value {
        json!({
            "recipient_to": ["a@x.id"],
            "subject": "Tagihan",
            "content": "plain",
            "is_html": true,
            "content_html": "<p>halo</p>",
            "is_attach": false
        })
    }

    #[test]
    fn test_inject_webhook_appends_tracking_pixel() {
        let mut email = Email {
            content_html: "<p>halo</p>".into(),
            ..Default::default()
        };
        let before = serde_json::to_vec(&email).unwrap();

        inject_webhook("https://track.example/open?", &mut email).unwrap();

        let expected = format!(
            r#"<p>halo</p><img src="https://track.example/open?data={}" alt="" width="1" height="1">"#,
            URL_SAFE_NO_PAD.encode(before)
        );
        assert_eq!(email.content_html, expected);
    }

    #[test]
    fn test_inject_webhook_skipped_when_unset() {
        let mut email = Email {
            content_html: "<p>halo</p>".into(),
            ..Default::default()
        };
        inject_webhook("", &mut email).unwrap();
        assert_eq!(email.content_html, "<p>halo</p>");
    }

    #[tokio::test]
    async fn test_email_publishes_created_then_sends_with_pixel() {
        let publisher = Arc::new(RecordingPublisher::default());
        let mut provider = MockDeliveryProvider::new();
        provider
            .expect_send_email()
            .withf(|cfg, email| {
                cfg.eq_ignore_ascii_case("noreply")
                    && email
                        .content_html
                        .contains(r#"<img src="https://track.example/open?data="#)
            })
            .times(1)
            .returning(|_, _| {
                Ok(ProviderReply {
                    message: "sukses".into(),
                    code: "00".into(),
                })
            });
        let handlers = handlers(publisher.clone(), provider, PriorityTier::Normal);

        handlers
            .handle_email(&meta(), &envelope("email", "jmo", email_json()))
            .await
            .unwrap();

        assert_eq!(publisher.kinds(), vec![TopicKind::Email]);
        let published: Email = publisher.payload(0);
        assert_eq!(published.status, STATUS_CREATED);
        // 发布的状态不含追踪图片
        assert_eq!(published.content_html, "<p>halo</p>");
    }

    #[tokio::test]
    async fn test_email_wrong_token_is_rejected() {
        let publisher = Arc::new(RecordingPublisher::default());
        let mut provider = MockDeliveryProvider::new();
        provider.expect_send_email().times(1).returning(|_, _| {
            Ok(ProviderReply {
                message: "Gagal".into(),
                code: "99".into(),
            })
        });
        let handlers = handlers(publisher, provider, PriorityTier::Normal);

        let err = handlers
            .handle_email(&meta(), &envelope("email", "jmo", email_json()))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::ProviderRejected { provider: "email", .. }));
    }

    #[tokio::test]
    async fn test_email_publish_failure_skips_provider() {
        let publisher = Arc::new(RecordingPublisher {
            fail_kind: Some(TopicKind::Email),
            ..Default::default()
        });
        let mut provider = MockDeliveryProvider::new();
        provider.expect_send_email().never();
        let handlers = handlers(publisher, provider, PriorityTier::Normal);

        let err = handlers
            .handle_email(&meta(), &envelope("email", "jmo", email_json()))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
