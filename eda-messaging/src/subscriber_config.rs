//! 订阅配置
//!
use bon::Builder;
use std::time::Duration;

pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_REDELIVER: u32 = 5;

/// 确认方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckType {
    /// 投递即确认，处理失败不会重投
    Auto,
    /// 按处理结果确认
    #[default]
    Manual,
}

#[derive(Debug, Clone, Builder)]
pub struct SubscriberConfig {
    /// 只处理这些消息名；为空表示全部
    #[builder(default)]
    message_filter: Vec<String>,
    /// 消费组：同组订阅者轮流分担同一主题的消息
    #[builder(into)]
    group_name: Option<String>,
    #[builder(default)]
    ack_type: AckType,
    /// 确认期限，超时未确认的消息会被重投
    #[builder(default = DEFAULT_ACK_WAIT)]
    ack_wait: Duration,
    /// 最大投递次数
    #[builder(default = DEFAULT_MAX_REDELIVER)]
    max_redeliver: u32,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SubscriberConfig {
    pub fn message_filter(&self) -> &[String] {
        &self.message_filter
    }

    pub fn group_name(&self) -> Option<&str> {
        self.group_name.as_deref()
    }

    pub fn ack_type(&self) -> AckType {
        self.ack_type
    }

    pub fn ack_wait(&self) -> Duration {
        self.ack_wait
    }

    pub fn max_redeliver(&self) -> u32 {
        self.max_redeliver
    }

    /// 消息名是否通过过滤
    pub fn accepts(&self, name: &str) -> bool {
        self.message_filter.is_empty() || self.message_filter.iter().any(|f| f == name)
    }
}
