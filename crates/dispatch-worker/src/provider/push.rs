//! FCM 与 OneSignal 请求体

use dispatch_shared::error::DispatchError;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{FCM_SERVICE, HttpDeliveryProvider, ONESIGNAL_SERVICE, transport_error};
use crate::model::{FcmPushResponse, InApp, OneSignalResponse, Push};

/// FCM 消息最长保留 28 天
const FCM_TIME_TO_LIVE_SECS: u64 = 2_419_200;

pub fn fcm_body(push: &Push) -> Value {
    json!({
        "registration_ids": push.player_ids,
        "data": push.data,
        "priority": "normal",
        "content_available": true,
        "time_to_live": FCM_TIME_TO_LIVE_SECS,
        "notification": {
            "title": push.heading,
            "body": push.content,
            "image": push.picture_url,
        },
    })
}

pub fn onesignal_push_body(app_id: &str, push: &Push) -> Value {
    json!({
        "app_id": app_id,
        "include_player_ids": push.player_ids,
        "headings": { "en": push.heading },
        "contents": { "en": push.content },
        "big_picture": push.picture_url,
        "isIos": push.is_ios,
        "data": push.data,
    })
}

/// 站内信没有指定设备时按分群投递
pub fn onesignal_in_app_body(app_id: &str, in_app: &InApp) -> Value {
    let mut body = json!({
        "app_id": app_id,
        "headings": { "en": in_app.heading },
        "contents": { "en": in_app.content },
        "big_picture": in_app.picture_url,
        "isIos": in_app.is_ios,
    });
    if in_app.player_ids.is_empty() {
        body["included_segments"] = json!(in_app.segments);
    } else {
        body["include_player_ids"] = json!(in_app.player_ids);
    }
    body
}

impl HttpDeliveryProvider {
    pub(super) async fn post_fcm(&self, push: &Push) -> Result<FcmPushResponse, DispatchError> {
        let fcm = &self.config.fcm;
        let request = self
            .client
            .post(&fcm.url)
            .header(AUTHORIZATION, format!("key={}", fcm.api_key))
            .json(&fcm_body(push));
        self.send_json(FCM_SERVICE, request).await
    }

    pub(super) async fn post_onesignal(
        &self,
        body: &Value,
    ) -> Result<OneSignalResponse, DispatchError> {
        let onesignal = &self.config.onesignal;
        let request = self
            .client
            .post(&onesignal.url)
            .header(AUTHORIZATION, format!("Basic {}", onesignal.api_key))
            .json(body);
        self.send_json(ONESIGNAL_SERVICE, request).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        service: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, DispatchError> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(service, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(service, e))?;

        if status != StatusCode::OK {
            return Err(DispatchError::ExternalService {
                service: service.to_string(),
                message: format!("HTTP {status}: {text}"),
            });
        }

        serde_json::from_str(&text).map_err(|e| DispatchError::ExternalService {
            service: service.to_string(),
            message: format!("响应解析失败: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push() -> Push {
        Push {
            player_ids: vec!["p1".into()],
            heading: "Promo".into(),
            content: "50% off".into(),
            picture_url: "https://img".into(),
            is_ios: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_fcm_body() {
        let body = fcm_body(&push());
        assert_eq!(body["registration_ids"], json!(["p1"]));
        assert_eq!(body["priority"], "normal");
        assert_eq!(body["time_to_live"], 2_419_200);
        assert_eq!(body["notification"]["title"], "Promo");
        assert_eq!(body["notification"]["image"], "https://img");
        assert!(body["data"].is_null());
    }

    #[test]
    fn test_onesignal_push_body() {
        let body = onesignal_push_body("app-jmo", &push());
        assert_eq!(body["app_id"], "app-jmo");
        assert_eq!(body["include_player_ids"], json!(["p1"]));
        assert_eq!(body["headings"]["en"], "Promo");
        assert_eq!(body["contents"]["en"], "50% off");
        assert_eq!(body["isIos"], true);
    }

    #[test]
    fn test_in_app_body_targets_segments_without_players() {
        let in_app = InApp {
            segments: vec!["Subscribed Users".into()],
            heading: "Info".into(),
            ..Default::default()
        };
        let body = onesignal_in_app_body("app-jmo", &in_app);
        assert_eq!(body["included_segments"], json!(["Subscribed Users"]));
        assert!(body.get("include_player_ids").is_none());

        let in_app = InApp {
            player_ids: vec!["p1".into()],
            ..in_app
        };
        let body = onesignal_in_app_body("app-jmo", &in_app);
        assert_eq!(body["include_player_ids"], json!(["p1"]));
        assert!(body.get("included_segments").is_none());
    }
}
