//! 可观测性模块集成测试
//!
//! 测试 metrics 记录与经由 Kafka 消息头的追踪上下文传播。

use std::collections::HashMap;

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use dispatch_shared::observability::metrics::{
        record_dispatch, record_kafka_commit, record_kafka_consume, record_kafka_publish,
        record_provider_request,
    };

    #[test]
    fn test_record_pipeline_metrics() {
        record_kafka_consume(true);
        record_kafka_consume(false);

        for kind in ["email", "sms", "sms_pool", "inapp", "push"] {
            record_kafka_publish(kind, true);
        }
        record_kafka_publish("sms_pool", false);

        record_kafka_commit(true);
        record_kafka_commit(false);
    }

    #[test]
    fn test_record_dispatch_outcomes() {
        record_dispatch("email", "success", 0.12);
        record_dispatch("sms", "handler_error", 1.5);
        record_dispatch("unknown", "unsupported", 0.001);
        record_dispatch("unknown", "decode_error", 0.0);
    }

    #[test]
    fn test_record_provider_requests() {
        record_provider_request("email", true);
        record_provider_request("sms", false);
        record_provider_request("fcm", true);
        record_provider_request("onesignal", false);
    }
}

// ============================================================================
// 追踪上下文传播测试
// ============================================================================

mod tracing_tests {
    use super::*;
    use dispatch_shared::observability::tracing::{
        extract_from_headers, inject_to_headers, set_parent_from_headers, trace_id_of,
    };
    use opentelemetry::trace::TraceContextExt;

    #[test]
    fn test_extract_from_valid_traceparent() {
        let headers = HashMap::from([(
            "traceparent".to_string(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
        )]);

        let context = extract_from_headers(&headers);
        let span_context = context.span().span_context().clone();

        assert!(span_context.is_valid());
        assert_eq!(span_context.span_id().to_string(), "00f067aa0ba902b7");
        assert_eq!(
            trace_id_of(&context).as_deref(),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );
    }

    #[test]
    fn test_extract_from_malformed_traceparent() {
        let test_cases = [
            "",
            "00",
            "00-0af7651916cd43dd8448eb211c80319c",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331",
            "00-invalid-b7ad6b7169203331-01",
        ];

        for invalid in test_cases {
            let headers = HashMap::from([("traceparent".to_string(), invalid.to_string())]);
            let context = extract_from_headers(&headers);
            assert!(
                trace_id_of(&context).is_none(),
                "traceparent {invalid:?} 不应解析出有效上下文"
            );
        }
    }

    #[test]
    fn test_business_trace_id_header_is_not_a_traceparent() {
        // 上游写入的 trace_id 头与 W3C 传播头互不干扰
        let headers = HashMap::from([("trace_id".to_string(), "upstream-1".to_string())]);
        let context = extract_from_headers(&headers);
        assert!(!context.has_active_span());
    }

    #[test]
    fn test_set_parent_without_upstream_is_safe() {
        let span = tracing::info_span!("dispatch.message");
        set_parent_from_headers(&span, &HashMap::new());

        let mut headers = HashMap::new();
        let _entered = span.enter();
        inject_to_headers(&mut headers);
        // 未安装 OpenTelemetry layer 时不会产生 traceparent
        assert!(!headers.contains_key("traceparent"));
    }
}
