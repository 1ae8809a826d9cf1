//! 消费 worker 池
//!
//! 每个消费 topic 启动 `pool_size` 个独立 worker，各自持有读取器，
//! 顺序完成 拉取 -> 解码 -> 分发 -> 提交。无论处理结果如何都提交位点，
//! 因此从 broker 视角是至多一次投递。

use std::sync::Arc;
use std::time::Duration;

use dispatch_shared::config::KafkaConfig;
use dispatch_shared::kafka::{ConsumerMessage, KafkaReader, MessageReader};
use dispatch_shared::observability::metrics::{
    record_dispatch, record_kafka_commit, record_kafka_consume,
};
use dispatch_shared::observability::tracing::set_parent_from_headers;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, warn};

use crate::dispatcher::{Category, Dispatcher};
use crate::error::WorkerError;
use crate::metadata::MessageMetadata;
use crate::model::ConsumedEnvelope;

/// 拉取出错后的等待时间，避免 broker 不可达时空转
const FETCH_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// 单条消息的终态，每种终态都会提交位点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Dispatched(Category),
    HandlerFailed(Category),
    DecodeFailed,
    UnsupportedCategory,
}

impl ProcessOutcome {
    pub fn category_label(&self) -> &'static str {
        match self {
            Self::Dispatched(c) | Self::HandlerFailed(c) => c.as_str(),
            Self::DecodeFailed | Self::UnsupportedCategory => "unknown",
        }
    }

    pub fn outcome_label(&self) -> &'static str {
        match self {
            Self::Dispatched(_) => "success",
            Self::HandlerFailed(_) => "handler_error",
            Self::DecodeFailed => "decode_error",
            Self::UnsupportedCategory => "unsupported",
        }
    }
}

/// 处理一条消息，错误在此处吸收并记录
pub async fn process_message(dispatcher: &Dispatcher, msg: &ConsumerMessage) -> ProcessOutcome {
    let meta = MessageMetadata::from_message(msg);
    let span = meta.span();
    set_parent_from_headers(&span, &msg.headers);

    async {
        let envelope: ConsumedEnvelope = match msg.deserialize_payload() {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(
                    activity = "decode_envelope",
                    partition = msg.partition,
                    offset = msg.offset,
                    elapsed_ms = meta.elapsed_ms(),
                    error = %e,
                    "信封解码失败，消息丢弃"
                );
                return ProcessOutcome::DecodeFailed;
            }
        };

        info!(
            activity = "receive",
            category = %envelope.category_name,
            channel = %envelope.channel_name,
            type_name = %envelope.type_name,
            partition = msg.partition,
            offset = msg.offset,
            "收到通知请求"
        );

        let category: Category = match envelope.category_name.parse() {
            Ok(category) => category,
            Err(e) => {
                warn!(activity = "route", error = %e, "不支持的通知类别，消息丢弃");
                return ProcessOutcome::UnsupportedCategory;
            }
        };

        match dispatcher.dispatch(&meta, &envelope, category).await {
            Ok(()) => {
                info!(
                    activity = "dispatch",
                    category = %category,
                    elapsed_ms = meta.elapsed_ms(),
                    "通知处理完成"
                );
                ProcessOutcome::Dispatched(category)
            }
            Err(e) => {
                error!(
                    activity = "dispatch",
                    category = %category,
                    elapsed_ms = meta.elapsed_ms(),
                    error = %e,
                    "通知处理失败"
                );
                ProcessOutcome::HandlerFailed(category)
            }
        }
    }
    .instrument(span)
    .await
}

/// worker 主循环，收到关闭信号后在下一轮循环开始前退出
///
/// 正在处理的消息不会被中断；阻塞在拉取上时关闭信号会立即生效。
pub async fn run_worker<R: MessageReader>(
    worker_id: usize,
    reader: R,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(worker_id, "消费 worker 已启动");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let msg = tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() {
                    // 发送端已丢弃，视为关闭
                    break;
                }
                continue;
            }

            fetched = reader.fetch() => fetched,
        };

        let msg = match msg {
            Ok(msg) => {
                record_kafka_consume(true);
                msg
            }
            Err(e) => {
                record_kafka_consume(false);
                error!(worker_id, error = %e, "拉取消息失败");
                tokio::time::sleep(FETCH_ERROR_BACKOFF).await;
                continue;
            }
        };

        let started = std::time::Instant::now();
        let outcome = process_message(&dispatcher, &msg).await;

        match reader.commit(&msg).await {
            Ok(()) => record_kafka_commit(true),
            Err(e) => {
                record_kafka_commit(false);
                error!(
                    worker_id,
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    error = %e,
                    "提交位点失败"
                );
            }
        }

        record_dispatch(
            outcome.category_label(),
            outcome.outcome_label(),
            started.elapsed().as_secs_f64(),
        );
    }

    info!(worker_id, "消费 worker 已退出");
}

pub fn spawn_worker<R: MessageReader + 'static>(
    worker_id: usize,
    reader: R,
    dispatcher: Arc<Dispatcher>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_worker(worker_id, reader, dispatcher, shutdown))
}

/// 为一个消费 topic 启动 worker 池，每个 worker 独立订阅
pub fn spawn_pool(
    config: &KafkaConfig,
    topic: &str,
    dispatcher: Arc<Dispatcher>,
    shutdown: &watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>, WorkerError> {
    let pool_size = config.pool_size.max(1);
    let mut handles = Vec::with_capacity(pool_size);

    for worker_id in 0..pool_size {
        let reader = KafkaReader::new(config, topic)?;
        handles.push(spawn_worker(
            worker_id,
            reader,
            dispatcher.clone(),
            shutdown.clone(),
        ));
    }

    info!(topic, pool_size, "worker 池已启动");
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use dispatch_shared::error::DispatchError;
    use dispatch_shared::retry::RetryPolicy;
    use serde_json::json;

    use super::*;
    use crate::handler::test_support::*;
    use crate::model::ProviderReply;
    use crate::provider::MockDeliveryProvider;
    use crate::topology::PriorityTier;

    mockall::mock! {
        Reader {}

        #[async_trait]
        impl MessageReader for Reader {
            async fn fetch(&self) -> Result<ConsumerMessage, DispatchError>;
            async fn commit(&self, msg: &ConsumerMessage) -> Result<(), DispatchError>;
        }
    }

    fn message(payload: Vec<u8>) -> ConsumerMessage {
        ConsumerMessage {
            topic: "cns_dsp_jmo_sms_reg".to_string(),
            partition: 0,
            offset: 41,
            key: None,
            payload,
            timestamp: None,
            headers: HashMap::new(),
        }
    }

    fn dispatcher(provider: MockDeliveryProvider) -> Dispatcher {
        Dispatcher::new(
            handlers(
                Arc::new(RecordingPublisher::default()),
                provider,
                PriorityTier::Normal,
            ),
            RetryPolicy::no_retry(),
        )
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(ProcessOutcome::Dispatched(Category::Sms).category_label(), "sms");
        assert_eq!(ProcessOutcome::DecodeFailed.category_label(), "unknown");
        assert_eq!(
            ProcessOutcome::HandlerFailed(Category::Push).outcome_label(),
            "handler_error"
        );
    }

    #[tokio::test]
    async fn test_process_malformed_envelope() {
        let outcome = process_message(
            &dispatcher(MockDeliveryProvider::new()),
            &message(b"not json".to_vec()),
        )
        .await;
        assert_eq!(outcome, ProcessOutcome::DecodeFailed);
    }

    #[tokio::test]
    async fn test_process_unsupported_category() {
        let raw = json!({"category_name": "fax", "data": {}}).to_string();
        let outcome = process_message(
            &dispatcher(MockDeliveryProvider::new()),
            &message(raw.into_bytes()),
        )
        .await;
        assert_eq!(outcome, ProcessOutcome::UnsupportedCategory);
    }

    #[tokio::test]
    async fn test_process_dispatches_sms() {
        let mut provider = MockDeliveryProvider::new();
        provider.expect_send_sms().times(1).returning(|_| {
            Ok(ProviderReply {
                message: "SUCCESS".into(),
                code: r#"{"msgid":"A"}"#.into(),
            })
        });
        let raw = json!({
            "category_name": "sms",
            "channel_name": "jmo",
            "data": {"recipient_phone_number": "628", "content": "x"}
        })
        .to_string();

        let outcome = process_message(&dispatcher(provider), &message(raw.into_bytes())).await;
        assert_eq!(outcome, ProcessOutcome::Dispatched(Category::Sms));
    }

    #[tokio::test]
    async fn test_worker_commits_once_then_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let mut reader = MockReader::new();
        let mut seq = mockall::Sequence::new();

        reader
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(message(b"garbage".to_vec())));
        reader
            .expect_commit()
            .withf(|msg| msg.offset == 41)
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| {
                // 提交后触发关闭，下一轮循环开始时退出
                tx.send(true).unwrap();
                Ok(())
            });

        run_worker(
            0,
            reader,
            Arc::new(dispatcher(MockDeliveryProvider::new())),
            rx,
        )
        .await;
    }

    #[tokio::test]
    async fn test_worker_fetch_error_does_not_commit() {
        let (tx, rx) = watch::channel(false);
        let mut reader = MockReader::new();

        reader.expect_fetch().times(1).returning(move || {
            tx.send(true).unwrap();
            Err(DispatchError::Kafka("broker 不可达".into()))
        });
        reader.expect_commit().never();

        run_worker(
            0,
            reader,
            Arc::new(dispatcher(MockDeliveryProvider::new())),
            rx,
        )
        .await;
    }
}
