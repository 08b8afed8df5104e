//! 领域层统一错误定义
//!
//! 聚焦事件构造、元数据取值与事件分发等最小必要集合，
//! 便于在消息层统一转换为上层错误。
//!
use thiserror::Error;

/// 单个处理器的失败记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: String,
    pub event: String,
    pub reason: String,
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "handler={}, event={}, reason={}",
            self.handler, self.event, self.reason
        )
    }
}

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch { expected: String, found: String },

    // --- 事件与元数据 ---
    #[error("invalid event: {reason}")]
    InvalidEvent { reason: String },
    #[error("invalid metadata: key={key}, reason={reason}")]
    InvalidMetadata { key: String, reason: String },

    // --- 事件分发 ---
    #[error("event handler error: {0}")]
    HandlerFailure(HandlerFailure),
    #[error("event dispatch failed: {} handler(s) failed, first: {}", .failures.len(), first_failure(.failures))]
    Dispatch { failures: Vec<HandlerFailure> },
}

fn first_failure(failures: &[HandlerFailure]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

impl DomainError {
    pub fn invalid_event(reason: impl Into<String>) -> Self {
        DomainError::InvalidEvent {
            reason: reason.into(),
        }
    }

    /// 返回分发失败中记录的全部处理器失败
    pub fn handler_failures(&self) -> &[HandlerFailure] {
        match self {
            DomainError::Dispatch { failures } => failures,
            DomainError::HandlerFailure(failure) => std::slice::from_ref(failure),
            _ => &[],
        }
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;
