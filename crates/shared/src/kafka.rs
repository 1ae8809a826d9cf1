//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为调度服务需要的三个抽象：
//! 带超时与 header 的生产者、手动提交位点的单 topic 读取器，以及启动时的 topic 创建。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::KafkaConfig;
use crate::error::DispatchError;

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    /// 读取指定 header，空值视为缺失
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// 将 JSON 格式负载反序列化为目标类型
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, DispatchError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| DispatchError::Serialization(format!("负载反序列化失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 每次发送都受 `publish_timeout` 约束：即使 broker 迟迟不确认，
/// 调用方最多等待这么久就会拿到 `PublishTimeout`。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    publish_timeout: Duration,
}

impl KafkaProducer {
    /// 根据配置创建连接生产端 broker 的生产者
    pub fn new(config: &KafkaConfig) -> Result<Self, DispatchError> {
        let publish_timeout = Duration::from_millis(config.publish_timeout_ms);

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.producer_brokers)
            .set("message.timeout.ms", config.publish_timeout_ms.to_string())
            .set("compression.type", "snappy")
            .set("acks", "all")
            .create()
            .map_err(|e| DispatchError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.producer_brokers, "Kafka 生产者已初始化");
        Ok(Self {
            producer,
            publish_timeout,
        })
    }

    pub fn publish_timeout(&self) -> Duration {
        self.publish_timeout
    }

    /// 发送原始字节消息，附带 header
    pub async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<(i32, i64), DispatchError> {
        let mut owned_headers = OwnedHeaders::new_with_capacity(headers.len());
        for (name, value) in headers {
            owned_headers = owned_headers.insert(Header {
                key: name.as_str(),
                value: Some(value.as_bytes()),
            });
        }

        let mut record = FutureRecord::<str, [u8]>::to(topic)
            .payload(payload)
            .headers(owned_headers);
        if let Some(key) = key {
            record = record.key(key);
        }

        let delivery = tokio::time::timeout(
            self.publish_timeout,
            self.producer.send(record, self.publish_timeout),
        )
        .await
        .map_err(|_| DispatchError::PublishTimeout {
            topic: topic.to_string(),
            timeout_ms: self.publish_timeout.as_millis() as u64,
        })?
        .map_err(|(e, _)| DispatchError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 刷出本地队列中尚未投递的消息
    pub fn flush(&self, timeout: Duration) -> Result<(), DispatchError> {
        use rdkafka::producer::Producer;

        self.producer
            .flush(timeout)
            .map_err(|e| DispatchError::Kafka(format!("刷新生产者失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// MessageReader / KafkaReader
// ---------------------------------------------------------------------------

/// 单 topic 消息读取器
///
/// worker 独占一个读取器；位点只在调用 `commit` 后前移。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageReader: Send + Sync {
    /// 阻塞直到拿到下一条消息
    async fn fetch(&self) -> Result<ConsumerMessage, DispatchError>;

    /// 提交该消息的位点（即 offset + 1）
    async fn commit(&self, msg: &ConsumerMessage) -> Result<(), DispatchError>;
}

/// 基于 `StreamConsumer` 的读取器，关闭自动提交
pub struct KafkaReader {
    consumer: StreamConsumer,
}

impl KafkaReader {
    /// 创建读取器并订阅单个 topic
    ///
    /// 同一 topic 的所有 worker 共享 `group_id`，由 broker 在组内分配分区。
    pub fn new(config: &KafkaConfig, topic: &str) -> Result<Self, DispatchError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.consumer_brokers)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .create()
            .map_err(|e| DispatchError::Kafka(format!("创建消费者失败: {e}")))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| DispatchError::Kafka(format!("订阅 topic 失败: {e}")))?;

        debug!(brokers = %config.consumer_brokers, group_id = %config.group_id, topic, "Kafka 读取器已订阅");
        Ok(Self { consumer })
    }
}

#[async_trait]
impl MessageReader for KafkaReader {
    async fn fetch(&self) -> Result<ConsumerMessage, DispatchError> {
        let msg = self
            .consumer
            .recv()
            .await
            .map_err(|e| DispatchError::Kafka(format!("接收消息失败: {e}")))?;
        Ok(ConsumerMessage::from_borrowed(&msg))
    }

    async fn commit(&self, msg: &ConsumerMessage) -> Result<(), DispatchError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&msg.topic, msg.partition, Offset::Offset(msg.offset + 1))
            .map_err(|e| DispatchError::Kafka(format!("构造提交位点失败: {e}")))?;

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| DispatchError::Kafka(format!("提交位点失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Topic 创建
// ---------------------------------------------------------------------------

/// 在生产端 broker 上创建 topic，已存在的 topic 不视为错误
pub async fn create_topics(
    brokers: &str,
    topics: &[String],
    partitions: i32,
    replication_factor: i32,
) -> Result<(), DispatchError> {
    if topics.is_empty() {
        return Ok(());
    }

    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .create()
        .map_err(|e| DispatchError::Kafka(format!("创建 admin 客户端失败: {e}")))?;

    let new_topics: Vec<NewTopic<'_>> = topics
        .iter()
        .map(|t| NewTopic::new(t, partitions, TopicReplication::Fixed(replication_factor)))
        .collect();
    let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(10)));

    let results = admin
        .create_topics(&new_topics, &opts)
        .await
        .map_err(|e| DispatchError::Kafka(format!("创建 topic 失败: {e}")))?;

    for result in results {
        match result {
            Ok(topic) => info!(topic = %topic, partitions, "topic 已创建"),
            Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                debug!(topic = %topic, "topic 已存在")
            }
            Err((topic, code)) => {
                warn!(topic = %topic, code = ?code, "topic 创建失败");
                return Err(DispatchError::Kafka(format!("创建 topic {topic} 失败: {code}")));
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
