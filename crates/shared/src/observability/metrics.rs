//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use std::net::SocketAddr;

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health`。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_dispatch_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn register_dispatch_metrics(service_name: &str) {
    metrics::describe_counter!(
        "kafka_consume_total",
        "Kafka fetch attempts by status"
    );
    metrics::describe_counter!(
        "kafka_publish_total",
        "Kafka status publishes by topic kind and status"
    );
    metrics::describe_counter!("kafka_commit_total", "Kafka offset commits by status");
    metrics::describe_counter!(
        "dispatch_messages_total",
        "Processed notification messages by category and outcome"
    );
    metrics::describe_histogram!(
        "dispatch_duration_seconds",
        "Time from fetch to commit per message"
    );
    metrics::describe_counter!(
        "provider_requests_total",
        "Delivery provider calls by provider and status"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("指标服务监听于 {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("指标服务异常退出: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 指标记录函数
// ============================================================================

fn status_label(success: bool) -> &'static str {
    if success { "success" } else { "error" }
}

/// 记录一次拉取结果
#[inline]
pub fn record_kafka_consume(success: bool) {
    metrics::counter!("kafka_consume_total", "status" => status_label(success)).increment(1);
}

/// 记录一次状态发布结果
#[inline]
pub fn record_kafka_publish(topic_kind: &str, success: bool) {
    metrics::counter!(
        "kafka_publish_total",
        "topic_kind" => topic_kind.to_string(),
        "status" => status_label(success)
    )
    .increment(1);
}

/// 记录一次位点提交结果
#[inline]
pub fn record_kafka_commit(success: bool) {
    metrics::counter!("kafka_commit_total", "status" => status_label(success)).increment(1);
}

/// 记录一条消息的处理结果与耗时
#[inline]
pub fn record_dispatch(category: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "dispatch_messages_total",
        "category" => category.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "dispatch_duration_seconds",
        "category" => category.to_string()
    )
    .record(duration_secs);
}

/// 记录一次供应商调用
#[inline]
pub fn record_provider_request(provider: &str, success: bool) {
    metrics::counter!(
        "provider_requests_total",
        "provider" => provider.to_string(),
        "status" => status_label(success)
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 未安装 recorder 时调用是空操作
        record_kafka_consume(true);
        record_kafka_consume(false);
        record_kafka_publish("sms_pool", true);
        record_kafka_commit(false);
        record_dispatch("email", "dispatched", 0.2);
        record_provider_request("onesignal", true);
    }

    #[test]
    fn test_status_label() {
        assert_eq!(status_label(true), "success");
        assert_eq!(status_label(false), "error");
    }
}
