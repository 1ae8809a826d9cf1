//! 多渠道通知调度 worker
//!
//! 从 Kafka 消费通知请求，按类别（邮件、短信、推送、站内信）分发给处理器，
//! 调用外部供应商投递，并把状态信封回写到追踪 topic。

pub mod cli;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod metadata;
pub mod model;
pub mod producer;
pub mod provider;
pub mod server;
pub mod topology;
pub mod worker;
