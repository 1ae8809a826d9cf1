//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use std::collections::HashMap;
use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::observability::ObservabilityConfig;

/// 项目元信息
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub service_name: String,
    pub version: String,
    pub environment: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            service_name: "cns-dispatch".to_string(),
            version: "v1.0.0".to_string(),
            environment: "dev".to_string(),
        }
    }
}

/// Kafka 配置
///
/// 生产端与消费端可以指向不同的 broker 集群。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub producer_brokers: String,
    pub consumer_brokers: String,
    pub group_id: String,
    /// 每个消费 topic 启动的 worker 数
    pub pool_size: usize,
    /// 启动时创建 topic 使用的分区数
    pub partitions: i32,
    pub replication_factor: i32,
    pub auto_offset_reset: String,
    pub session_timeout_ms: u64,
    /// 单次发布的超时时间，与调用方生命周期无关
    pub publish_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            producer_brokers: "localhost:29092".to_string(),
            consumer_brokers: "localhost:29093".to_string(),
            group_id: "cns_dispatch_consumer".to_string(),
            pool_size: 10,
            partitions: 10,
            replication_factor: 1,
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 6000,
            publish_timeout_ms: 5000,
        }
    }
}

/// Topic 拓扑配置
///
/// 生产端与消费端 topic 均以逗号分隔；消费端 topic 为模板，
/// 包含 `<channel>` 与 `<priority>` 占位符。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub producer: String,
    pub consumer: String,
    pub priority_high_code: String,
    pub priority_normal_code: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            producer: "cns_trc_email,cns_trc_sms,cns_trc_inapp,cns_trc_push,cns_trc_sms_pool"
                .to_string(),
            consumer: "cns_dsp_<channel>_email_<priority>,cns_dsp_<channel>_sms_<priority>,\
                       cns_dsp_<channel>_inapp_<priority>,cns_dsp_<channel>_push_<priority>"
                .to_string(),
            priority_high_code: "high".to_string(),
            priority_normal_code: "reg".to_string(),
        }
    }
}

impl TopicsConfig {
    /// 生产端 topic 列表
    pub fn producer_topics(&self) -> Vec<String> {
        split_list(&self.producer)
    }

    /// 消费端 topic 模板列表
    pub fn consumer_templates(&self) -> Vec<String> {
        split_list(&self.consumer)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// 处理器重试配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 总尝试次数（含首次执行），1 表示不重试
    pub attempts: u32,
    pub delay_ms: u64,
    /// 1.0 即固定间隔
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 300,
            multiplier: 1.0,
            max_delay_ms: 3000,
        }
    }
}

/// 邮件网关配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailProviderConfig {
    pub url: String,
    pub from: String,
    /// 打开追踪像素指向的 webhook 基地址
    pub webhook: String,
    pub reply_config: String,
}

impl Default for EmailProviderConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:2014/WSCom/services/Main".to_string(),
            from: "noreply@example.com".to_string(),
            webhook: "http://localhost:8080/api/v1/webhook/".to_string(),
            reply_config: "noreply".to_string(),
        }
    }
}

/// 短信网关配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmsProviderConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl Default for SmsProviderConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:2014/SmsApps/services/Main".to_string(),
            username: String::new(),
            password: String::new(),
        }
    }
}

/// FCM 推送配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FcmProviderConfig {
    pub url: String,
    pub api_key: String,
}

impl Default for FcmProviderConfig {
    fn default() -> Self {
        Self {
            url: "https://fcm.googleapis.com/fcm/send".to_string(),
            api_key: String::new(),
        }
    }
}

/// OneSignal 推送配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OneSignalProviderConfig {
    pub url: String,
    pub api_key: String,
    /// channel -> OneSignal app id
    pub app_ids: HashMap<String, String>,
}

impl Default for OneSignalProviderConfig {
    fn default() -> Self {
        Self {
            url: "https://onesignal.com/api/v1/notifications".to_string(),
            api_key: String::new(),
            app_ids: HashMap::new(),
        }
    }
}

impl OneSignalProviderConfig {
    /// 按渠道查找 app id，忽略大小写
    pub fn app_id_for(&self, channel: &str) -> Option<&str> {
        self.app_ids
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(channel))
            .map(|(_, id)| id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// 投递供应商配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub email: EmailProviderConfig,
    pub sms: SmsProviderConfig,
    pub fcm: FcmProviderConfig,
    pub onesignal: OneSignalProviderConfig,
    pub http_timeout_secs: u64,
    /// 单个邮件附件下载的字节上限
    pub attachment_max_bytes: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            email: EmailProviderConfig::default(),
            sms: SmsProviderConfig::default(),
            fcm: FcmProviderConfig::default(),
            onesignal: OneSignalProviderConfig::default(),
            http_timeout_secs: 10,
            attachment_max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub project: ProjectConfig,
    pub kafka: KafkaConfig,
    pub topics: TopicsConfig,
    pub retry: RetryConfig,
    pub provider: ProviderConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. 结构体默认值
    /// 2. config/default.toml（默认配置）
    /// 3. config/{environment}.toml（环境特定配置）
    /// 4. config/{service_name}.toml（服务特定配置）
    /// 5. 环境变量（DISPATCH 前缀，`__` 分隔，如 DISPATCH__KAFKA__POOL_SIZE -> kafka.pool_size）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        // .env 不存在是正常情况
        let _ = dotenvy::dotenv();

        let env = std::env::var("DISPATCH_ENV").unwrap_or_else(|_| "dev".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("project.service_name", service_name)?
            .set_default("project.environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("DISPATCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 启动前的基本校验，失败即为致命错误
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka.producer_brokers.trim().is_empty() {
            return Err(ConfigError::Message("kafka.producer_brokers 不能为空".into()));
        }
        if self.kafka.consumer_brokers.trim().is_empty() {
            return Err(ConfigError::Message("kafka.consumer_brokers 不能为空".into()));
        }
        if self.kafka.pool_size == 0 {
            return Err(ConfigError::Message("kafka.pool_size 必须大于 0".into()));
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Message("retry.attempts 必须大于 0".into()));
        }
        Ok(())
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.project.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.kafka.pool_size, 10);
        assert_eq!(config.kafka.partitions, 10);
        assert_eq!(config.kafka.group_id, "cns_dispatch_consumer");
        assert_eq!(config.topics.priority_normal_code, "reg");
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.provider.http_timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_topic_lists_are_split_and_trimmed() {
        let topics = TopicsConfig {
            producer: " cns_trc_email, cns_trc_sms ,,".to_string(),
            ..TopicsConfig::default()
        };
        assert_eq!(topics.producer_topics(), vec!["cns_trc_email", "cns_trc_sms"]);

        let templates = TopicsConfig::default().consumer_templates();
        assert_eq!(templates.len(), 4);
        assert_eq!(templates[0], "cns_dsp_<channel>_email_<priority>");
        assert_eq!(templates[3], "cns_dsp_<channel>_push_<priority>");
    }

    #[test]
    fn test_onesignal_app_id_lookup() {
        let cfg = OneSignalProviderConfig {
            app_ids: HashMap::from([
                ("jmo".to_string(), "app-jmo".to_string()),
                ("sipp".to_string(), String::new()),
            ]),
            ..Default::default()
        };
        assert_eq!(cfg.app_id_for("JMO"), Some("app-jmo"));
        // 空值等同于未配置
        assert_eq!(cfg.app_id_for("sipp"), None);
        assert_eq!(cfg.app_id_for("smile"), None);
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let mut config = AppConfig::default();
        config.kafka.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.retry.attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let raw = r#"
            [kafka]
            pool_size = 4

            [provider.onesignal.app_ids]
            jmo = "abc"
        "#;
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.kafka.pool_size, 4);
        // 未出现的字段保持默认值
        assert_eq!(config.kafka.partitions, 10);
        assert_eq!(config.provider.onesignal.app_id_for("jmo"), Some("abc"));
    }
}
