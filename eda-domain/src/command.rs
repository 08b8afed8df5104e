//! 命令（Command）
//!
//! 表达“意图”的请求消息，由远端处理后以应答（`Reply`）告知结果。
//! 与事件同构：名称即类型注册表中的键，载荷类型擦除，元数据携带关联信息。
//!
use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::domain_event::{Payload, downcast_payload};
use crate::error::{DomainError, DomainResult};
use crate::metadata::Metadata;

#[derive(Clone)]
pub struct Command {
    id: String,
    name: String,
    payload: Payload,
    metadata: Metadata,
    occurred_at: DateTime<Utc>,
}

impl Command {
    pub fn new<P>(name: impl Into<String>, payload: P) -> DomainResult<Self>
    where
        P: Any + Send + Sync,
    {
        Self::restore(
            uuid::Uuid::new_v4().to_string(),
            name,
            Arc::new(payload),
            Metadata::new(),
            Utc::now(),
        )
    }

    /// 按原始标识与时间重建命令（用于接收端解码）
    pub fn restore(
        id: impl Into<String>,
        name: impl Into<String>,
        payload: Payload,
        metadata: Metadata,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::invalid_event("command name must not be empty"));
        }

        Ok(Self {
            id: id.into(),
            name,
            payload,
            metadata,
            occurred_at,
        })
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.merge(metadata);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command_name(&self) -> &str {
        &self.name
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

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("metadata", &self.metadata)
            .field("occurred_at", &self.occurred_at)
            .finish_non_exhaustive()
    }
}
