use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::payload::{Payload, downcast_payload};
use crate::error::{DomainError, DomainResult};
use crate::metadata::Metadata;

/// 可按名称路由的事件：事件名是分发的唯一路由键
pub trait NamedEvent: Send + Sync {
    fn event_name(&self) -> &str;
}

/// 领域事件
///
/// 事件名在构造后不可变且不能为空；元数据可随传播过程继续追加。
#[derive(Clone)]
pub struct DomainEvent {
    id: String,
    name: String,
    payload: Payload,
    metadata: Metadata,
    occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    /// 以具体载荷创建事件
    pub fn new<P>(name: impl Into<String>, payload: P) -> DomainResult<Self>
    where
        P: Any + Send + Sync,
    {
        Self::from_payload(name, Arc::new(payload))
    }

    /// 以已擦除类型的载荷创建事件
    pub fn from_payload(name: impl Into<String>, payload: Payload) -> DomainResult<Self> {
        Self::restore(
            uuid::Uuid::new_v4().to_string(),
            name,
            payload,
            Metadata::new(),
            Utc::now(),
        )
    }

    /// 按原始标识与时间重建事件（用于接收端解码）
    pub fn restore(
        id: impl Into<String>,
        name: impl Into<String>,
        payload: Payload,
        metadata: Metadata,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::invalid_event("event name must not be empty"));
        }

        Ok(Self {
            id: id.into(),
            name,
            payload,
            metadata,
            occurred_at,
        })
    }

    /// 合并元数据（键冲突时以传入值为准）
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.merge(metadata);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn payload_as<T: Any>(&self) -> DomainResult<&T> {
        downcast_payload(&self.payload)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl NamedEvent for DomainEvent {
    fn event_name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainEvent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("metadata", &self.metadata)
            .field("occurred_at", &self.occurred_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct StoreCreated {
        name: String,
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = DomainEvent::new("", StoreCreated { name: "x".into() }).unwrap_err();
        assert!(matches!(err, DomainError::InvalidEvent { .. }));

        let err = DomainEvent::new("   ", ()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidEvent { .. }));
    }

    #[test]
    fn payload_is_recoverable_by_type() {
        let event = DomainEvent::new(
            "stores.StoreCreated",
            StoreCreated {
                name: "corner".into(),
            },
        )
        .unwrap();

        assert_eq!(event.event_name(), "stores.StoreCreated");
        assert_eq!(event.payload_as::<StoreCreated>().unwrap().name, "corner");
        assert!(matches!(
            event.payload_as::<String>(),
            Err(DomainError::TypeMismatch { .. })
        ));
        assert!(!event.id().is_empty());
    }

    #[test]
    fn metadata_merges_last_write_wins() {
        let event = DomainEvent::new("e", ())
            .unwrap()
            .with_metadata(Metadata::new().with("x", "m1").with("a", 1))
            .with_metadata(Metadata::new().with("x", "m2").with("b", 2));

        assert_eq!(event.metadata().get_str("x"), Some("m2"));
        assert_eq!(event.metadata().get_i64("a"), Some(1));
        assert_eq!(event.metadata().get_i64("b"), Some(2));
    }
}
