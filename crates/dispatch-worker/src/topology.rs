//! Topic 拓扑
//!
//! 启动时一次性计算：生产端 topic 按子串归类到 [`TopicKind`]，
//! 消费端 topic 模板按渠道与优先级实例化。结果只读地传给各组件。

use std::collections::HashMap;
use std::fmt;

use dispatch_shared::config::TopicsConfig;
use tracing::{debug, warn};

pub const CHANNEL_PLACEHOLDER: &str = "<channel>";
pub const PRIORITY_PLACEHOLDER: &str = "<priority>";

/// 生产端 topic 的归类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Email,
    SmsPool,
    Sms,
    InApp,
    Push,
}

impl TopicKind {
    /// 子串匹配的检查顺序
    ///
    /// `sms_pool` 必须先于 `sms`，否则池 topic 会被误归为普通短信 topic。
    pub const PRECEDENCE: [TopicKind; 5] = [
        TopicKind::Email,
        TopicKind::SmsPool,
        TopicKind::Sms,
        TopicKind::InApp,
        TopicKind::Push,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::SmsPool => "sms_pool",
            Self::Sms => "sms",
            Self::InApp => "inapp",
            Self::Push => "push",
        }
    }

    /// 按优先顺序找到第一个被包含的类别名
    pub fn classify(topic: &str) -> Option<Self> {
        Self::PRECEDENCE
            .into_iter()
            .find(|kind| topic.contains(kind.as_str()))
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ProducerTopicMap = HashMap<TopicKind, String>;

/// 构建 类别 -> 生产端 topic 映射，无法归类的 topic 被忽略
pub fn build_producer_topic_map(topics: &[String]) -> ProducerTopicMap {
    let mut map = ProducerTopicMap::new();
    for topic in topics {
        match TopicKind::classify(topic) {
            Some(kind) => {
                if let Some(previous) = map.insert(kind, topic.clone()) {
                    warn!(kind = %kind, previous = %previous, topic = %topic, "同一类别配置了多个生产 topic，后者生效");
                }
            }
            None => debug!(topic = %topic, "生产 topic 无法归类，已忽略"),
        }
    }
    map
}

/// 部署渠道（产品线）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Channel {
    Jmo,
    Smile,
    Sipp,
    Sidia,
    Perisai,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jmo => "jmo",
            Self::Smile => "smile",
            Self::Sipp => "sipp",
            Self::Sidia => "sidia",
            Self::Perisai => "perisai",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 优先级档位，同时决定消费 topic 与推送供应商
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum PriorityTier {
    High,
    Normal,
}

impl PriorityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 将命令行优先级映射为 topic 命名中的优先级代码
///
/// `"high"` -> 高优先级代码，`"normal"` -> 普通优先级代码，其他值无法解析。
pub fn resolve_priority_code<'a>(priority: &str, topics: &'a TopicsConfig) -> Option<&'a str> {
    match priority {
        "high" => Some(topics.priority_high_code.as_str()),
        "normal" => Some(topics.priority_normal_code.as_str()),
        _ => None,
    }
}

/// 实例化消费 topic 模板
///
/// 优先级无法解析时原样返回模板，不做任何替换（包括渠道）。
pub fn build_consumer_topic_list(
    templates: &[String],
    channel: &str,
    priority: &str,
    topics: &TopicsConfig,
) -> Vec<String> {
    let Some(code) = resolve_priority_code(priority, topics) else {
        warn!(priority, "无法解析的优先级，消费 topic 模板保持原样");
        return templates.to_vec();
    };

    templates
        .iter()
        .map(|t| {
            t.replace(CHANNEL_PLACEHOLDER, channel)
                .replace(PRIORITY_PLACEHOLDER, code)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sms_pool_wins_over_sms() {
        assert_eq!(TopicKind::classify("cns_trc_sms_pool"), Some(TopicKind::SmsPool));
        assert_eq!(TopicKind::classify("sms_pool_sms"), Some(TopicKind::SmsPool));
        assert_eq!(TopicKind::classify("cns_trc_sms"), Some(TopicKind::Sms));
    }

    #[test]
    fn test_email_has_highest_precedence() {
        assert_eq!(TopicKind::classify("email_sms_pool"), Some(TopicKind::Email));
        assert_eq!(TopicKind::classify("inapp_push"), Some(TopicKind::InApp));
        assert_eq!(TopicKind::classify("cns_trc_fax"), None);
    }

    #[test]
    fn test_build_producer_topic_map_one_entry_per_kind() {
        let topics = strings(&[
            "cns_trc_email",
            "cns_trc_sms",
            "cns_trc_inapp",
            "cns_trc_push",
            "cns_trc_sms_pool",
            "cns_trc_unknown",
        ]);
        let map = build_producer_topic_map(&topics);

        assert_eq!(map.len(), 5);
        assert_eq!(map[&TopicKind::Email], "cns_trc_email");
        assert_eq!(map[&TopicKind::Sms], "cns_trc_sms");
        assert_eq!(map[&TopicKind::SmsPool], "cns_trc_sms_pool");
        assert_eq!(map[&TopicKind::InApp], "cns_trc_inapp");
        assert_eq!(map[&TopicKind::Push], "cns_trc_push");
    }

    #[test]
    fn test_build_producer_topic_map_from_default_config() {
        let map = build_producer_topic_map(&TopicsConfig::default().producer_topics());
        assert_eq!(map.len(), 5);
        assert_eq!(map[&TopicKind::SmsPool], "cns_trc_sms_pool");
    }

    #[test]
    fn test_consumer_templates_high() {
        let cfg = TopicsConfig::default();
        let topics =
            build_consumer_topic_list(&strings(&["x_<channel>_<priority>"]), "jmo", "high", &cfg);
        assert_eq!(topics, vec!["x_jmo_high"]);
    }

    #[test]
    fn test_consumer_templates_normal_uses_reg_code() {
        let cfg = TopicsConfig::default();
        let topics = build_consumer_topic_list(&cfg.consumer_templates(), "smile", "normal", &cfg);
        assert_eq!(
            topics,
            vec![
                "cns_dsp_smile_email_reg",
                "cns_dsp_smile_sms_reg",
                "cns_dsp_smile_inapp_reg",
                "cns_dsp_smile_push_reg",
            ]
        );
    }

    #[test]
    fn test_unresolved_priority_leaves_templates_verbatim() {
        let cfg = TopicsConfig::default();
        let templates = strings(&["x_<channel>_<priority>", "plain"]);
        let topics = build_consumer_topic_list(&templates, "jmo", "urgent", &cfg);
        assert_eq!(topics, templates);

        // 大小写不同同样视为无法解析
        let topics = build_consumer_topic_list(&templates, "jmo", "HIGH", &cfg);
        assert_eq!(topics, templates);
    }

    #[test]
    fn test_custom_priority_codes() {
        let cfg = TopicsConfig {
            priority_high_code: "p1".into(),
            priority_normal_code: "p2".into(),
            ..TopicsConfig::default()
        };
        assert_eq!(resolve_priority_code("high", &cfg), Some("p1"));
        assert_eq!(resolve_priority_code("normal", &cfg), Some("p2"));
        assert_eq!(resolve_priority_code("reg", &cfg), None);
    }

    #[test]
    fn test_channel_and_priority_names() {
        assert_eq!(Channel::Perisai.to_string(), "perisai");
        assert_eq!(PriorityTier::Normal.as_str(), "normal");
    }
}
