//! 组装根
//!
//! 启动时建 topic、构建拓扑与生产者注册表、装配处理器，然后为每个消费 topic
//! 启动 worker 池；收到关闭信号后等待所有 worker 退出并刷出生产者。

use std::sync::Arc;

use dispatch_shared::config::AppConfig;
use dispatch_shared::kafka::create_topics;
use dispatch_shared::retry::RetryPolicy;
use tokio::sync::watch;
use tracing::{error, info};

use crate::dispatcher::Dispatcher;
use crate::error::WorkerError;
use crate::handler::{CategoryHandlers, HandlerSettings};
use crate::producer::ProducerRegistry;
use crate::provider::HttpDeliveryProvider;
use crate::topology::{
    Channel, PriorityTier, build_consumer_topic_list, build_producer_topic_map,
};
use crate::worker::spawn_pool;

pub struct DispatchServer {
    config: AppConfig,
    channel: Channel,
    priority: PriorityTier,
}

impl DispatchServer {
    pub fn new(config: AppConfig, channel: Channel, priority: PriorityTier) -> Self {
        Self {
            config,
            channel,
            priority,
        }
    }

    /// 消费 topic 列表，只依赖配置与命令行参数
    pub fn consumer_topics(&self) -> Vec<String> {
        build_consumer_topic_list(
            &self.config.topics.consumer_templates(),
            self.channel.as_str(),
            self.priority.as_str(),
            &self.config.topics,
        )
    }

    fn handler_settings(&self) -> HandlerSettings {
        let provider = &self.config.provider;
        HandlerSettings {
            priority: self.priority,
            deployment_channel: self.channel,
            email_webhook: provider.email.webhook.clone(),
            email_reply_config: provider.email.reply_config.clone(),
            onesignal: provider.onesignal.clone(),
            pool_retry: RetryPolicy::from_config(&self.config.retry),
        }
    }

    /// 运行直到关闭信号；启动阶段的任何失败都直接返回
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        let kafka = &self.config.kafka;

        let producer_topics = self.config.topics.producer_topics();
        create_topics(
            &kafka.producer_brokers,
            &producer_topics,
            kafka.partitions,
            kafka.replication_factor,
        )
        .await?;

        let topic_map = build_producer_topic_map(&producer_topics);
        let registry = Arc::new(ProducerRegistry::new(kafka, &topic_map)?);
        let provider = Arc::new(HttpDeliveryProvider::new(&self.config.provider)?);

        let handlers = CategoryHandlers::new(registry.clone(), provider, self.handler_settings());
        let dispatcher = Arc::new(Dispatcher::new(
            handlers,
            RetryPolicy::from_config(&self.config.retry),
        ));

        let consumer_topics = self.consumer_topics();
        info!(
            channel = %self.channel,
            priority = %self.priority,
            consumer_topics = ?consumer_topics,
            producer_kinds = topic_map.len(),
            pool_size = kafka.pool_size,
            "调度服务启动"
        );

        let mut handles = Vec::new();
        for topic in &consumer_topics {
            handles.extend(spawn_pool(kafka, topic, dispatcher.clone(), &shutdown)?);
        }

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "worker 任务异常退出");
            }
        }

        registry.close();
        info!("调度服务已停止");
        Ok(())
    }
}
