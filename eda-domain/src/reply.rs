//! 应答（Reply）与应答结果（ReplyOutcome）
//!
//! 应答是命令处理后的回执。结果（成功/失败）不放在载荷中，而是作为
//! 传输元数据携带，基础设施无需解码载荷即可按结果分支。
//!
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::domain_event::{Payload, downcast_payload};
use crate::error::{DomainError, DomainResult};
use crate::metadata::Metadata;

/// 应答结果，线上取值严格为 `SUCCESS` 或 `FAILURE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplyOutcome {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
}

impl ReplyOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ReplyOutcome::Success => "SUCCESS",
            ReplyOutcome::Failure => "FAILURE",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ReplyOutcome::Success)
    }
}

impl fmt::Display for ReplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplyOutcome {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(ReplyOutcome::Success),
            "FAILURE" => Ok(ReplyOutcome::Failure),
            other => Err(DomainError::InvalidMetadata {
                key: "outcome".to_string(),
                reason: format!("unexpected outcome `{other}`"),
            }),
        }
    }
}

#[derive(Clone)]
pub struct Reply {
    id: String,
    name: String,
    payload: Option<Payload>,
    metadata: Metadata,
    occurred_at: DateTime<Utc>,
}

impl Reply {
    /// 携带载荷的应答
    pub fn new<P>(name: impl Into<String>, payload: P) -> DomainResult<Self>
    where
        P: Any + Send + Sync,
    {
        Self::from_payload(name, Some(Arc::new(payload)))
    }

    /// 不携带载荷的应答
    pub fn empty(name: impl Into<String>) -> DomainResult<Self> {
        Self::from_payload(name, None)
    }

    pub fn from_payload(name: impl Into<String>, payload: Option<Payload>) -> DomainResult<Self> {
        Self::restore(
            uuid::Uuid::new_v4().to_string(),
            name,
            payload,
            Metadata::new(),
            Utc::now(),
        )
    }

    /// 按原始标识与时间重建应答（用于接收端解码）
    pub fn restore(
        id: impl Into<String>,
        name: impl Into<String>,
        payload: Option<Payload>,
        metadata: Metadata,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::invalid_event("reply name must not be empty"));
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

    pub fn reply_name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn payload_as<T: Any>(&self) -> DomainResult<&T> {
        match &self.payload {
            Some(payload) => downcast_payload(payload),
            None => Err(DomainError::TypeMismatch {
                expected: std::any::type_name::<T>().to_string(),
                found: "none".to_string(),
            }),
        }
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

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("has_payload", &self.payload.is_some())
            .field("metadata", &self.metadata)
            .field("occurred_at", &self.occurred_at)
            .finish()
    }
}
