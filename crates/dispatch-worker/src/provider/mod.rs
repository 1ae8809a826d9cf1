//! 外部投递供应商
//!
//! 邮件与短信走 SOAP 网关，推送走 FCM legacy 接口或 OneSignal，站内信复用 OneSignal。
//! 处理器只依赖 [`DeliveryProvider`]，测试中替换为 mock。

pub mod push;
pub mod soap;

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dispatch_shared::config::ProviderConfig;
use dispatch_shared::error::DispatchError;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::WorkerError;
use crate::model::{Email, FcmPushResponse, InApp, OneSignalResponse, ProviderReply, Push, Sms};

pub const EMAIL_SERVICE: &str = "email";
pub const SMS_SERVICE: &str = "sms";
pub const FCM_SERVICE: &str = "fcm";
pub const ONESIGNAL_SERVICE: &str = "onesignal";

/// 投递供应商接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// 发送邮件，`reply_config` 为网关侧的发件配置名
    async fn send_email(&self, reply_config: &str, email: &Email)
    -> Result<ProviderReply, WorkerError>;

    async fn send_sms(&self, sms: &Sms) -> Result<ProviderReply, WorkerError>;

    async fn send_fcm_push(&self, push: &Push) -> Result<FcmPushResponse, WorkerError>;

    async fn send_onesignal_push(
        &self,
        app_id: &str,
        push: &Push,
    ) -> Result<OneSignalResponse, WorkerError>;

    async fn send_in_app(&self, app_id: &str, in_app: &InApp)
    -> Result<OneSignalResponse, WorkerError>;
}

/// 基于 reqwest 的实现，所有供应商共用一个连接池
pub struct HttpDeliveryProvider {
    client: Client,
    config: ProviderConfig,
}

impl HttpDeliveryProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, WorkerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| DispatchError::Config(format!("HTTP 客户端创建失败: {e}")))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// 下载附件并编码为 base64，超过大小上限视为失败
    async fn download_attachment(&self, url: &str) -> Result<String, DispatchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error("attachment", e))?;

        if !response.status().is_success() {
            return Err(DispatchError::ExternalService {
                service: "attachment".to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let limit = self.config.attachment_max_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(too_large(limit));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error("attachment", e))?;
        if bytes.len() as u64 > limit {
            return Err(too_large(limit));
        }

        Ok(STANDARD.encode(&bytes))
    }

    /// 逐个下载附件；失败的附件记日志后跳过，不影响邮件本身
    ///
    /// 是否下载只看附件列表，`is_attach` 原样透传给网关。
    async fn collect_attachments(&self, email: &Email) -> Vec<String> {
        let mut encoded = Vec::with_capacity(email.attachment.len());
        for url in &email.attachment {
            match self.download_attachment(url).await {
                Ok(content) => encoded.push(content),
                Err(e) => warn!(url = %url, error = %e, "附件下载失败，已跳过"),
            }
        }
        encoded
    }
}

fn too_large(limit: u64) -> DispatchError {
    DispatchError::ExternalService {
        service: "attachment".to_string(),
        message: format!("附件超过 {limit} 字节上限"),
    }
}

/// reqwest 错误按是否超时映射
pub(crate) fn transport_error(service: &str, err: reqwest::Error) -> DispatchError {
    if err.is_timeout() {
        DispatchError::ExternalServiceTimeout {
            service: service.to_string(),
        }
    } else {
        DispatchError::ExternalService {
            service: service.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl DeliveryProvider for HttpDeliveryProvider {
    async fn send_email(
        &self,
        reply_config: &str,
        email: &Email,
    ) -> Result<ProviderReply, WorkerError> {
        let attachments = self.collect_attachments(email).await;
        let body = soap::build_email_envelope(reply_config, &self.config.email.from, email, &attachments);
        debug!(to = ?email.recipient_to, attachments = attachments.len(), "调用邮件网关");

        Ok(self
            .post_soap(EMAIL_SERVICE, &self.config.email.url, body)
            .await?)
    }

    async fn send_sms(&self, sms: &Sms) -> Result<ProviderReply, WorkerError> {
        let sms_config = &self.config.sms;
        let body = soap::build_sms_envelope(&sms_config.username, &sms_config.password, sms);
        debug!(msisdn = %sms.recipient_phone_number, "调用短信网关");

        Ok(self.post_soap(SMS_SERVICE, &sms_config.url, body).await?)
    }

    async fn send_fcm_push(&self, push: &Push) -> Result<FcmPushResponse, WorkerError> {
        Ok(self.post_fcm(push).await?)
    }

    async fn send_onesignal_push(
        &self,
        app_id: &str,
        push: &Push,
    ) -> Result<OneSignalResponse, WorkerError> {
        let body = push::onesignal_push_body(app_id, push);
        Ok(self.post_onesignal(&body).await?)
    }

    async fn send_in_app(
        &self,
        app_id: &str,
        in_app: &InApp,
    ) -> Result<OneSignalResponse, WorkerError> {
        let body = push::onesignal_in_app_body(app_id, in_app);
        Ok(self.post_onesignal(&body).await?)
    }
}
