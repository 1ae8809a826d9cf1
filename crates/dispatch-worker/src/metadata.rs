//! 单条消息的处理元数据
//!
//! 拉取消息时创建，显式传递给解码、分发、处理器与发布，处理结束即丢弃。

use std::time::Instant;

use chrono::{DateTime, Utc};
use dispatch_shared::kafka::ConsumerMessage;
use dispatch_shared::observability::tracing::{extract_from_headers, trace_id_of};
use tracing::Span;
use uuid::Uuid;

/// 上游写入业务 trace id 的消息头
pub const TRACE_ID_HEADER: &str = "trace_id";

#[derive(Debug, Clone)]
pub struct MessageMetadata {
    pub trace_id: String,
    pub transaction_id: String,
    pub topic: String,
    pub received_at: DateTime<Utc>,
    started: Instant,
}

impl MessageMetadata {
    /// 创建元数据；缺少上游 trace id 时新生成一个
    pub fn new(topic: &str, trace_id: Option<&str>) -> Self {
        Self {
            trace_id: trace_id
                .map(String::from)
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            transaction_id: Uuid::now_v7().to_string(),
            topic: topic.to_string(),
            received_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// 从消息头恢复 trace id
    ///
    /// 依次取 `trace_id` 头、W3C traceparent 中的 trace id，都没有则生成。
    pub fn from_message(msg: &ConsumerMessage) -> Self {
        let propagated = msg.header(TRACE_ID_HEADER).map(String::from).or_else(|| {
            let context = extract_from_headers(&msg.headers);
            trace_id_of(&context)
        });
        Self::new(&msg.topic, propagated.as_deref())
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// 消息处理 span，span 内的日志自动带上 trace/transaction/topic
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "dispatch.message",
            trace_id = %self.trace_id,
            transaction_id = %self.transaction_id,
            topic = %self.topic,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn message(headers: HashMap<String, String>) -> ConsumerMessage {
        ConsumerMessage {
            topic: "cns_dsp_jmo_email_reg".to_string(),
            partition: 0,
            offset: 7,
            key: None,
            payload: Vec::new(),
            timestamp: None,
            headers,
        }
    }

    #[test]
    fn test_trace_id_from_header() {
        let meta = MessageMetadata::from_message(&message(HashMap::from([(
            TRACE_ID_HEADER.to_string(),
            "upstream-trace".to_string(),
        )])));
        assert_eq!(meta.trace_id, "upstream-trace");
        assert_eq!(meta.topic, "cns_dsp_jmo_email_reg");
    }

    #[test]
    fn test_trace_id_falls_back_to_traceparent() {
        let meta = MessageMetadata::from_message(&message(HashMap::from([(
            "traceparent".to_string(),
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".to_string(),
        )])));
        assert_eq!(meta.trace_id, "0af7651916cd43dd8448eb211c80319c");
    }

    #[test]
    fn test_trace_id_generated_when_absent() {
        let a = MessageMetadata::from_message(&message(HashMap::new()));
        let b = MessageMetadata::from_message(&message(HashMap::new()));
        assert!(!a.trace_id.is_empty());
        assert_ne!(a.trace_id, b.trace_id);
    }

    #[test]
    fn test_transaction_id_is_fresh_per_message() {
        let a = MessageMetadata::new("t", Some("same"));
        let b = MessageMetadata::new("t", Some("same"));
        assert_eq!(a.trace_id, b.trace_id);
        assert_ne!(a.transaction_id, b.transaction_id);
    }
}
