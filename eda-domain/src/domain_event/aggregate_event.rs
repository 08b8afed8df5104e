use std::ops::Deref;

use super::event::{DomainEvent, NamedEvent};
use crate::error::{DomainError, DomainResult};

pub const AGGREGATE_NAME_KEY: &str = "aggregate-name";
pub const AGGREGATE_ID_KEY: &str = "aggregate-id";
pub const AGGREGATE_VERSION_KEY: &str = "aggregate-version";

/// 聚合事件：附带来源聚合的标识、类型名与版本号
///
/// 聚合信息同时写入事件元数据，跨进程传输后可由 `try_from_event` 还原。
#[derive(Debug, Clone)]
pub struct AggregateEvent {
    event: DomainEvent,
    aggregate_id: String,
    aggregate_name: String,
    aggregate_version: usize,
}

impl AggregateEvent {
    pub fn new(
        mut event: DomainEvent,
        aggregate_id: impl Into<String>,
        aggregate_name: impl Into<String>,
        aggregate_version: usize,
    ) -> Self {
        let aggregate_id = aggregate_id.into();
        let aggregate_name = aggregate_name.into();

        let metadata = event.metadata_mut();
        metadata.set(AGGREGATE_ID_KEY, aggregate_id.as_str());
        metadata.set(AGGREGATE_NAME_KEY, aggregate_name.as_str());
        metadata.set(AGGREGATE_VERSION_KEY, aggregate_version);

        Self {
            event,
            aggregate_id,
            aggregate_name,
            aggregate_version,
        }
    }

    /// 从携带聚合元数据的普通事件还原
    pub fn try_from_event(event: DomainEvent) -> DomainResult<Self> {
        let metadata = event.metadata();
        let aggregate_id = required_str(metadata.get_str(AGGREGATE_ID_KEY), AGGREGATE_ID_KEY)?;
        let aggregate_name =
            required_str(metadata.get_str(AGGREGATE_NAME_KEY), AGGREGATE_NAME_KEY)?;
        let aggregate_version = metadata
            .get_i64(AGGREGATE_VERSION_KEY)
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| DomainError::InvalidMetadata {
                key: AGGREGATE_VERSION_KEY.to_string(),
                reason: "missing or not a non-negative integer".to_string(),
            })?;

        Ok(Self {
            event,
            aggregate_id,
            aggregate_name,
            aggregate_version,
        })
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn aggregate_name(&self) -> &str {
        &self.aggregate_name
    }

    pub fn aggregate_version(&self) -> usize {
        self.aggregate_version
    }

    pub fn event(&self) -> &DomainEvent {
        &self.event
    }

    pub fn into_event(self) -> DomainEvent {
        self.event
    }
}

fn required_str(value: Option<&str>, key: &str) -> DomainResult<String> {
    value
        .map(ToString::to_string)
        .ok_or_else(|| DomainError::InvalidMetadata {
            key: key.to_string(),
            reason: "missing".to_string(),
        })
}

impl Deref for AggregateEvent {
    type Target = DomainEvent;

    fn deref(&self) -> &Self::Target {
        &self.event
    }
}

impl NamedEvent for AggregateEvent {
    fn event_name(&self) -> &str {
        self.event.event_name()
    }
}
