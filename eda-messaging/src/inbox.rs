//! 收件箱去重
//!
//! 至少一次投递意味着同一条消息可能到达多次。`inbox` 中间件在调用处理器前
//! 按消息 id 查询，已处理过的消息直接确认跳过；只有处理器成功返回后才登记。
//! 处理失败、超过确认期限被中止或被取消的消息都不会留下记录，重投时照常处理。
//!
use crate::error::MessagingResult;
use crate::message::{IncomingMessage, MessageHandler, RawMessage};
use crate::middleware::{Middleware, middleware_fn};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use eda_domain::eventing::HandlerContext;
use std::sync::Arc;

/// 已处理消息的存储
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// 消息是否已处理
    async fn exists(&self, id: &str) -> MessagingResult<bool>;

    /// 登记已处理的消息；已存在时返回 `false`
    async fn save(&self, msg: &RawMessage) -> MessagingResult<bool>;
}

/// 进程内收件箱
#[derive(Debug, Default)]
pub struct InMemoryInbox {
    received: DashMap<String, DateTime<Utc>>,
}

impl InMemoryInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.received.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.received.len()
    }

    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }
}

#[async_trait]
impl InboxStore for InMemoryInbox {
    async fn save(&self, msg: &RawMessage) -> MessagingResult<bool> {
        match self.received.entry(msg.id().to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(Utc::now());
                Ok(true)
            }
        }
    }

    async fn exists(&self, id: &str) -> MessagingResult<bool> {
        Ok(self.received.contains_key(id))
    }
}

/// 按消息 id 去重的中间件
pub fn inbox(store: Arc<dyn InboxStore>) -> Middleware {
    middleware_fn(move |next| {
        Arc::new(InboxHandler {
            store: store.clone(),
            next,
        })
    })
}

struct InboxHandler {
    store: Arc<dyn InboxStore>,
    next: Arc<dyn MessageHandler>,
}

#[async_trait]
impl MessageHandler for InboxHandler {
    async fn handle_message(
        &self,
        ctx: &HandlerContext,
        msg: &IncomingMessage,
    ) -> anyhow::Result<()> {
        if self.store.exists(msg.id()).await? {
            tracing::debug!(id = msg.id(), name = msg.name(), "duplicate message skipped");
            return Ok(());
        }

        self.next.handle_message(ctx, msg).await?;
        if !self.store.save(msg.raw()).await? {
            tracing::debug!(id = msg.id(), name = msg.name(), "message handled concurrently");
        }
        Ok(())
    }
}
