//! 生产者注册表
//!
//! 每个生产端类别持有一个发布句柄，启动时构建，之后只读共享给所有 worker。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dispatch_shared::config::KafkaConfig;
use dispatch_shared::kafka::KafkaProducer;
use dispatch_shared::observability::metrics::record_kafka_publish;
use dispatch_shared::observability::tracing::inject_to_headers;
use tracing::{error, info, warn};

use crate::error::WorkerError;
use crate::metadata::{MessageMetadata, TRACE_ID_HEADER};
use crate::model::PublishedEnvelope;
use crate::topology::{ProducerTopicMap, TopicKind};

/// 状态信封发布器，处理器只依赖这个接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnvelopePublisher: Send + Sync {
    /// 发布到该类别对应的生产 topic；类别未映射时不做任何事
    async fn publish(
        &self,
        kind: TopicKind,
        meta: &MessageMetadata,
        envelope: &PublishedEnvelope,
    ) -> Result<(), WorkerError>;
}

struct TopicProducer {
    topic: String,
    producer: KafkaProducer,
}

/// 基于 Kafka 的注册表
pub struct ProducerRegistry {
    producers: HashMap<TopicKind, TopicProducer>,
}

impl ProducerRegistry {
    /// 为映射中的每个类别创建一个生产者
    pub fn new(config: &KafkaConfig, topic_map: &ProducerTopicMap) -> Result<Self, WorkerError> {
        let mut producers = HashMap::with_capacity(topic_map.len());
        for (kind, topic) in topic_map {
            producers.insert(
                *kind,
                TopicProducer {
                    topic: topic.clone(),
                    producer: KafkaProducer::new(config)?,
                },
            );
        }

        info!(kinds = producers.len(), "生产者注册表已构建");
        Ok(Self { producers })
    }

    pub fn topic_for(&self, kind: TopicKind) -> Option<&str> {
        self.producers.get(&kind).map(|p| p.topic.as_str())
    }

    /// 刷出所有生产者的待发消息，关闭时调用一次
    pub fn close(&self) {
        for (kind, entry) in &self.producers {
            let timeout = entry.producer.publish_timeout().max(Duration::from_secs(1));
            match entry.producer.flush(timeout) {
                Ok(()) => info!(kind = %kind, topic = %entry.topic, "生产者已关闭"),
                Err(e) => error!(kind = %kind, topic = %entry.topic, error = %e, "关闭生产者失败"),
            }
        }
    }
}

#[async_trait]
impl EnvelopePublisher for ProducerRegistry {
    async fn publish(
        &self,
        kind: TopicKind,
        meta: &MessageMetadata,
        envelope: &PublishedEnvelope,
    ) -> Result<(), WorkerError> {
        let Some(entry) = self.producers.get(&kind) else {
            warn!(kind = %kind, "该类别没有配置生产 topic，跳过发布");
            return Ok(());
        };

        let payload = envelope.to_bytes()?;

        let mut headers = HashMap::new();
        inject_to_headers(&mut headers);
        headers.insert(TRACE_ID_HEADER.to_string(), meta.trace_id.clone());

        match entry.producer.send(&entry.topic, None, &payload, &headers).await {
            Ok((partition, offset)) => {
                record_kafka_publish(kind.as_str(), true);
                info!(
                    kind = %kind,
                    publish_topic = %entry.topic,
                    partition,
                    offset,
                    elapsed_ms = meta.elapsed_ms(),
                    "状态消息发布成功"
                );
                Ok(())
            }
            Err(e) => {
                record_kafka_publish(kind.as_str(), false);
                error!(
                    kind = %kind,
                    publish_topic = %entry.topic,
                    elapsed_ms = meta.elapsed_ms(),
                    error = %e,
                    "状态消息发布失败"
                );
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unmapped_kind_is_noop() {
        let registry = ProducerRegistry {
            producers: HashMap::new(),
        };
        let meta = MessageMetadata::new("cns_dsp_jmo_sms_reg", Some("t-1"));

        registry
            .publish(TopicKind::SmsPool, &meta, &PublishedEnvelope::default())
            .await
            .unwrap();
        assert!(registry.topic_for(TopicKind::SmsPool).is_none());
    }

    #[test]
    fn test_registry_builds_one_producer_per_kind() {
        // rdkafka 创建生产者时不连接 broker
        let map = ProducerTopicMap::from([
            (TopicKind::Sms, "cns_trc_sms".to_string()),
            (TopicKind::SmsPool, "cns_trc_sms_pool".to_string()),
        ]);
        let registry = ProducerRegistry::new(&KafkaConfig::default(), &map).unwrap();

        assert_eq!(registry.topic_for(TopicKind::Sms), Some("cns_trc_sms"));
        assert_eq!(registry.topic_for(TopicKind::SmsPool), Some("cns_trc_sms_pool"));
        assert!(registry.topic_for(TopicKind::Email).is_none());
    }
}
