//! 消息层统一错误定义
//!
use crate::reply_stream::ReplyMessage;
use eda_domain::error::DomainError;
use std::time::Duration;
use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("domain: {0}")]
    Domain(#[from] DomainError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // --- 类型注册表 ---
    #[error("invalid registry key: {key:?}")]
    InvalidKey { key: String },

    #[error("duplicate registry key: key={key}, registered={registered}, attempted={attempted}")]
    DuplicateKey {
        key: String,
        registered: &'static str,
        attempted: &'static str,
    },

    #[error("unknown type: key={key}")]
    UnknownType { key: String },

    #[error("type mismatch: key={key}, expected={expected}, found={found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("build failed: key={key}, reason={reason}")]
    BuildFailed { key: String, reason: String },

    // --- 订阅与传输 ---
    #[error("subscription invalid: topic={topic}")]
    SubscriptionInvalid { topic: String },

    #[error("transport: {reason}")]
    Transport { reason: String },

    // --- 消息解码 ---
    #[error("missing header: {header}")]
    MissingHeader { header: String },

    #[error("decode: {reason}")]
    Decode { reason: String },

    // --- 请求/应答 ---
    #[error("request failed with reply {}", .0.reply_name())]
    ReplyFailed(Box<ReplyMessage>),

    #[error("request timed out after {timeout:?}: topic={topic}")]
    RequestTimeout { topic: String, timeout: Duration },

    #[error("request cancelled: topic={topic}")]
    RequestCancelled { topic: String },

    // --- 配置 ---
    #[error("config: key={key}, reason={reason}")]
    Config { key: String, reason: String },
}

impl MessagingError {
    pub fn decode(reason: impl Into<String>) -> Self {
        MessagingError::Decode {
            reason: reason.into(),
        }
    }

    pub fn missing_header(header: &str) -> Self {
        MessagingError::MissingHeader {
            header: header.to_string(),
        }
    }

    /// 应答结果为 `FAILURE` 时返回失败应答
    pub fn failed_reply(&self) -> Option<&ReplyMessage> {
        match self {
            MessagingError::ReplyFailed(reply) => Some(reply),
            _ => None,
        }
    }

    pub fn is_unknown_type(&self) -> bool {
        matches!(self, MessagingError::UnknownType { .. })
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
