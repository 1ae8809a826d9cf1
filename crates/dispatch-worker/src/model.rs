//! 消息模型
//!
//! 入站信封、出站状态信封以及四种类别负载。字段名与上游系统的 JSON 约定一致。

use dispatch_shared::error::DispatchError;
use serde::{Deserialize, Serialize};

pub const STATUS_CREATED: &str = "created";
pub const STATUS_ON_PROCESS: &str = "on process";

/// 邮件网关的成功标记（比较时忽略大小写）
pub const EMAIL_SUCCESS_TOKEN: &str = "Sukses";
/// 短信网关的成功标记（比较时忽略大小写）
pub const SMS_SUCCESS_TOKEN: &str = "SUCCESS";

// ---------------------------------------------------------------------------
// 信封
// ---------------------------------------------------------------------------

/// 上游写入消费 topic 的信封，读取后不再修改
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumedEnvelope {
    pub type_id: String,
    pub type_name: String,
    pub category_name: String,
    pub channel_name: String,
    pub priority_order: i64,
    #[serde(rename = "hash")]
    pub content_hash: String,
    pub preference_url: String,
    #[serde(with = "payload_bytes")]
    pub data: Vec<u8>,
}

/// 回写到状态 topic 的信封
///
/// 每条入站消息对应一个实例；处理过程中只替换 `data`。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishedEnvelope {
    pub type_name: String,
    pub category_name: String,
    pub channel_name: String,
    pub priority_order: i64,
    pub preference_url: String,
    #[serde(with = "payload_bytes")]
    pub data: Vec<u8>,
}

impl From<&ConsumedEnvelope> for PublishedEnvelope {
    fn from(consumed: &ConsumedEnvelope) -> Self {
        Self {
            type_name: consumed.type_name.clone(),
            category_name: consumed.category_name.clone(),
            channel_name: consumed.channel_name.clone(),
            priority_order: consumed.priority_order,
            preference_url: consumed.preference_url.clone(),
            data: consumed.data.clone(),
        }
    }
}

impl PublishedEnvelope {
    /// 用序列化后的负载替换 `data`
    pub fn set_payload<T: Serialize>(&mut self, payload: &T) -> Result<(), DispatchError> {
        self.data = serde_json::to_vec(payload)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DispatchError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl ConsumedEnvelope {
    /// 将 `data` 解码为具体类别的负载
    pub fn decode_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }
}

/// `data` 字段的线上编码
///
/// 上游把字节切片编码为 base64 字符串；为兼容手工构造的消息，
/// 解码时也接受内联的 JSON 对象或数组。编码始终输出 base64。
mod payload_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(Vec::new()),
            Value::String(encoded) => STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom),
            inline @ (Value::Object(_) | Value::Array(_)) => {
                serde_json::to_vec(&inline).map_err(D::Error::custom)
            }
            other => Err(D::Error::custom(format!("data 字段类型不受支持: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// 类别负载
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Email {
    pub recipient_to: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recipient_cc: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recipient_bcc: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subject: String,
    #[serde(rename = "content", skip_serializing_if = "String::is_empty")]
    pub content_text: String,
    pub is_html: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content_html: String,
    pub is_attach: bool,
    /// 附件 URL 列表
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachment: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attach_name: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sms {
    pub recipient_phone_number: String,
    pub content: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Push {
    pub player_ids: Vec<String>,
    pub heading: String,
    pub content: String,
    pub picture_url: String,
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
    pub is_ios: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InApp {
    pub player_ids: Vec<String>,
    pub segments: Vec<String>,
    pub heading: String,
    pub content: String,
    pub picture_url: String,
    pub is_ios: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
}

// ---------------------------------------------------------------------------
// 供应商响应
// ---------------------------------------------------------------------------

/// 邮件/短信网关返回的 `msg` 与 `kode`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderReply {
    pub message: String,
    pub code: String,
}

impl ProviderReply {
    pub fn is_success(&self, token: &str) -> bool {
        self.message.trim().eq_ignore_ascii_case(token)
    }
}

/// 短信网关 `kode` 字段内嵌的 JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsResponseCode {
    pub acc: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub length: i64,
    #[serde(rename = "numSMS")]
    pub num_sms: i64,
    pub code: String,
    pub status: String,
    pub message: String,
    pub msgid: String,
}

/// FCM legacy 多播接口响应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FcmPushResponse {
    pub multicast_id: i64,
    pub success: i64,
    pub failure: i64,
    pub canonical_ids: i64,
    pub results: Vec<serde_json::Value>,
    pub message_id: i64,
    pub error: String,
}

impl FcmPushResponse {
    /// 优先取首个结果的 message_id，否则退回 multicast_id
    pub fn message_id(&self) -> String {
        self.results
            .iter()
            .find_map(|r| r.get("message_id").and_then(|v| v.as_str()))
            .map(String::from)
            .unwrap_or_else(|| {
                if self.message_id != 0 {
                    self.message_id.to_string()
                } else {
                    self.multicast_id.to_string()
                }
            })
    }
}

/// OneSignal 创建通知接口响应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OneSignalResponse {
    pub id: String,
    pub recipients: i64,
    pub errors: Option<serde_json::Value>,
}
