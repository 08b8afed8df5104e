//! 发件箱（Outbox）
//!
//! `OutboxStream` 包装一个消息流：发布时只把消息连同目标主题写入发件箱，
//! 与业务状态在同一存储里落地；`OutboxProcessor` 轮询未发布的消息，
//! 按写入顺序转发到真正的传输并标记为已发布。转发失败的消息保持待发布，
//! 下一轮重试，因此下游看到的是至少一次投递，配合 `inbox` 去重。
//!
use crate::error::MessagingResult;
use crate::message::{MessageHandler, RawMessage};
use crate::stream::MessageStream;
use crate::subscriber_config::SubscriberConfig;
use crate::subscription::Subscription;
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use eda_domain::eventing::HandlerContext;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(500);

/// 待发布消息的存储
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// 写入待发布消息；同 id 已存在时返回 `false`
    async fn save(&self, msg: &RawMessage) -> MessagingResult<bool>;

    /// 按写入顺序取出至多 `limit` 条未发布的消息
    async fn find_unpublished(&self, limit: usize) -> MessagingResult<Vec<RawMessage>>;

    async fn mark_published(&self, ids: &[String]) -> MessagingResult<()>;
}

#[derive(Debug)]
struct OutboxEntry {
    seq: u64,
    message: RawMessage,
    published_at: Option<DateTime<Utc>>,
}

/// 进程内发件箱
#[derive(Debug, Default)]
pub struct InMemoryOutbox {
    entries: DashMap<String, OutboxEntry>,
    seq: AtomicU64,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unpublished_len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.published_at.is_none())
            .count()
    }

    pub fn is_published(&self, id: &str) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| entry.published_at.is_some())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutbox {
    async fn save(&self, msg: &RawMessage) -> MessagingResult<bool> {
        match self.entries.entry(msg.id().to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(OutboxEntry {
                    seq: self.seq.fetch_add(1, Ordering::Relaxed),
                    message: msg.clone(),
                    published_at: None,
                });
                Ok(true)
            }
        }
    }

    async fn find_unpublished(&self, limit: usize) -> MessagingResult<Vec<RawMessage>> {
        let mut pending: Vec<(u64, RawMessage)> = self
            .entries
            .iter()
            .filter(|entry| entry.published_at.is_none())
            .map(|entry| (entry.seq, entry.message.clone()))
            .collect();
        pending.sort_by_key(|(seq, _)| *seq);
        Ok(pending
            .into_iter()
            .take(limit)
            .map(|(_, message)| message)
            .collect())
    }

    async fn mark_published(&self, ids: &[String]) -> MessagingResult<()> {
        let now = Utc::now();
        for id in ids {
            if let Some(mut entry) = self.entries.get_mut(id) {
                entry.published_at.get_or_insert(now);
            }
        }
        Ok(())
    }
}

/// 发布写入发件箱、订阅直通下层的消息流
pub struct OutboxStream {
    inner: Arc<dyn MessageStream>,
    store: Arc<dyn OutboxStore>,
}

impl OutboxStream {
    pub fn new(inner: Arc<dyn MessageStream>, store: Arc<dyn OutboxStore>) -> Self {
        Self { inner, store }
    }
}

#[async_trait]
impl MessageStream for OutboxStream {
    async fn publish(
        &self,
        _ctx: &HandlerContext,
        topic: &str,
        msg: RawMessage,
    ) -> MessagingResult<()> {
        let msg = msg.with_subject(topic);
        if !self.store.save(&msg).await? {
            tracing::debug!(id = msg.id(), name = msg.name(), topic, "message already in outbox");
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        config: SubscriberConfig,
    ) -> MessagingResult<Subscription> {
        self.inner.subscribe(topic, handler, config).await
    }

    async fn unsubscribe(&self) -> MessagingResult<()> {
        self.inner.unsubscribe().await
    }
}

/// 把发件箱中的消息转发到传输
#[derive(Builder)]
pub struct OutboxProcessor {
    publisher: Arc<dyn MessageStream>,
    store: Arc<dyn OutboxStore>,
    #[builder(default = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    #[builder(default = DEFAULT_POLLING_INTERVAL)]
    polling_interval: Duration,
}

impl OutboxProcessor {
    /// 转发一批未发布的消息，返回成功转发的条数
    ///
    /// 中途失败时已转发的部分仍会标记为已发布，其余留待下一轮。
    pub async fn process_batch(&self, ctx: &HandlerContext) -> MessagingResult<usize> {
        let pending = self.store.find_unpublished(self.batch_size).await?;
        let mut published = Vec::with_capacity(pending.len());
        for msg in pending {
            let topic = msg.subject().to_string();
            let id = msg.id().to_string();
            if let Err(err) = self.publisher.publish(ctx, &topic, msg).await {
                self.store.mark_published(&published).await?;
                return Err(err);
            }
            published.push(id);
        }

        if !published.is_empty() {
            self.store.mark_published(&published).await?;
            tracing::debug!(count = published.len(), "outbox messages forwarded");
        }
        Ok(published.len())
    }

    /// 持续转发直到上下文取消；批次满时立即再取，否则等待一个轮询间隔
    pub async fn run(&self, ctx: &HandlerContext) -> MessagingResult<()> {
        tracing::info!(
            batch_size = self.batch_size,
            polling_interval = ?self.polling_interval,
            "outbox processor started"
        );
        while !ctx.is_cancelled() {
            if self.process_batch(ctx).await? > 0 {
                continue;
            }
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = tokio::time::sleep(self.polling_interval) => {}
            }
        }
        tracing::info!("outbox processor stopped");
        Ok(())
    }
}
