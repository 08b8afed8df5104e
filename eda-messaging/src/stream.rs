//! 消息流（MessageStream）与进程内实现（InMemoryStream）
//!
//! `InMemoryStream` 的投递语义：
//! - 每个订阅一个工作任务，同一订阅内逐条投递；
//! - 处理成功确认，失败（或超过确认期限）立即原地重投以保持顺序，
//!   达到最大投递次数后丢弃并告警；
//! - 处理器调用 `extend` 可把确认期限顺延一个周期；
//! - 同一主题下同名消费组的订阅者轮流分担消息；
//! - 未通过消息名过滤的消息直接确认跳过。
//!
//! 消息不落盘，进程退出即丢失。
//!
use crate::error::{MessagingError, MessagingResult};
use crate::message::{Acknowledger, IncomingMessage, MessageHandler, RawMessage};
use crate::subscriber_config::{AckType, SubscriberConfig};
use crate::subscription::{Subscription, SubscriptionHandle, SubscriptionLifecycle};
use async_trait::async_trait;
use dashmap::DashMap;
use eda_domain::eventing::HandlerContext;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 传输抽象：发布与订阅原始消息
#[async_trait]
pub trait MessageStream: Send + Sync {
    async fn publish(&self, ctx: &HandlerContext, topic: &str, msg: RawMessage)
    -> MessagingResult<()>;

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        config: SubscriberConfig,
    ) -> MessagingResult<Subscription>;

    /// 退订通过本流创建的全部订阅，并等待它们排空
    ///
    /// 在处理器内部调用时不等待该处理器所属的订阅，它在处理器返回后关闭。
    async fn unsubscribe(&self) -> MessagingResult<()>;
}

tokio::task_local! {
    /// 当前任务上正在投递的订阅
    static DELIVERING: Arc<SubscriptionLifecycle>;
}

struct Route {
    tx: mpsc::UnboundedSender<RawMessage>,
    token: CancellationToken,
}

impl Route {
    fn is_open(&self) -> bool {
        !self.token.is_cancelled() && !self.tx.is_closed()
    }
}

#[derive(Default)]
struct Group {
    members: Vec<Route>,
    next: usize,
}

#[derive(Default)]
struct Topic {
    direct: Vec<Route>,
    groups: HashMap<String, Group>,
}

#[derive(Default)]
struct StreamInner {
    topics: DashMap<String, Topic>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// 进程内消息流
#[derive(Clone, Default)]
pub struct InMemoryStream {
    inner: Arc<StreamInner>,
}

impl InMemoryStream {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStream for InMemoryStream {
    async fn publish(
        &self,
        ctx: &HandlerContext,
        topic: &str,
        msg: RawMessage,
    ) -> MessagingResult<()> {
        if ctx.is_cancelled() {
            return Err(MessagingError::Transport {
                reason: format!("publish to {topic} cancelled"),
            });
        }

        let msg = msg.with_subject(topic);
        let Some(mut entry) = self.inner.topics.get_mut(topic) else {
            tracing::trace!(topic, name = msg.name(), "no subscribers, message dropped");
            return Ok(());
        };
        let routes = entry.value_mut();

        routes.direct.retain(Route::is_open);
        for route in &routes.direct {
            let _ = route.tx.send(msg.clone());
        }

        for (name, group) in routes.groups.iter_mut() {
            group.members.retain(Route::is_open);
            if group.members.is_empty() {
                tracing::trace!(topic, group = %name, "group has no members");
                continue;
            }
            let index = group.next % group.members.len();
            let _ = group.members[index].tx.send(msg.clone());
            group.next = index + 1;
        }

        tracing::trace!(topic, name = msg.name(), id = msg.id(), "message published");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        config: SubscriberConfig,
    ) -> MessagingResult<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let lifecycle = Arc::new(SubscriptionLifecycle::new());
        let group = config.group_name().map(str::to_string);

        {
            let mut entry = self.inner.topics.entry(topic.to_string()).or_default();
            let route = Route {
                tx,
                token: token.clone(),
            };
            match &group {
                Some(name) => entry
                    .groups
                    .entry(name.clone())
                    .or_default()
                    .members
                    .push(route),
                None => entry.direct.push(route),
            }
        }

        let subscription = Subscription::new(
            topic,
            group.clone(),
            lifecycle.clone(),
            Arc::new(InMemoryHandle {
                token: token.clone(),
            }),
        );

        tracing::debug!(topic, group = ?group, ack_type = ?config.ack_type(), "subscribed");
        tokio::spawn(
            Worker {
                topic: topic.to_string(),
                handler,
                config,
                lifecycle,
                token,
                rx,
            }
            .run(),
        );

        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscription.clone());

        Ok(subscription)
    }

    async fn unsubscribe(&self) -> MessagingResult<()> {
        let subscriptions = std::mem::take(
            &mut *self
                .inner
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        for subscription in &subscriptions {
            subscription.unsubscribe()?;
        }

        let current = DELIVERING.try_with(Arc::clone).ok();
        let others = subscriptions.iter().filter(|s| {
            current
                .as_ref()
                .is_none_or(|own| !Arc::ptr_eq(own, s.lifecycle()))
        });
        join_all(others.map(|s| s.drained())).await;

        tracing::debug!(count = subscriptions.len(), "stream unsubscribed");
        Ok(())
    }
}

struct InMemoryHandle {
    token: CancellationToken,
}

impl SubscriptionHandle for InMemoryHandle {
    fn is_valid(&self) -> bool {
        !self.token.is_cancelled()
    }

    fn drain(&self) {
        self.token.cancel();
    }
}

const UNSETTLED: u8 = 0;
const ACKED: u8 = 1;
const NACKED: u8 = 2;
const KILLED: u8 = 3;

/// 单次投递的确认记录
#[derive(Default)]
struct DeliveryTracker {
    settlement: AtomicU8,
    extended: AtomicBool,
}

impl DeliveryTracker {
    fn settle(&self, outcome: u8) -> MessagingResult<()> {
        self.settlement
            .compare_exchange(UNSETTLED, outcome, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| MessagingError::Transport {
                reason: "delivery already settled".to_string(),
            })
    }

    fn settlement(&self) -> u8 {
        self.settlement.load(Ordering::Acquire)
    }

    fn take_extended(&self) -> bool {
        self.extended.swap(false, Ordering::AcqRel)
    }
}

impl Acknowledger for DeliveryTracker {
    fn ack(&self) -> MessagingResult<()> {
        self.settle(ACKED)
    }

    fn nack(&self) -> MessagingResult<()> {
        self.settle(NACKED)
    }

    fn extend(&self) -> MessagingResult<()> {
        self.extended.store(true, Ordering::Release);
        Ok(())
    }

    fn kill(&self) -> MessagingResult<()> {
        self.settle(KILLED)
    }
}

enum Handled {
    Done,
    Failed(anyhow::Error),
    TimedOut,
}

struct Worker {
    topic: String,
    handler: Arc<dyn MessageHandler>,
    config: SubscriberConfig,
    lifecycle: Arc<SubscriptionLifecycle>,
    token: CancellationToken,
    rx: mpsc::UnboundedReceiver<RawMessage>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let msg = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            if !self.deliver(msg).await {
                break;
            }
        }

        // 传输关闭时也要让生命周期走到终态
        self.lifecycle.start_draining();
        tracing::trace!(topic = %self.topic, "subscription worker stopped");
    }

    /// 投递一条消息（含重投）；订阅不再活跃时返回 `false`
    async fn deliver(&self, msg: RawMessage) -> bool {
        if !self.config.accepts(msg.name()) {
            tracing::trace!(topic = %self.topic, name = msg.name(), "message filtered");
            return true;
        }

        let mut attempt = 1;
        loop {
            let tracker = Arc::new(DeliveryTracker::default());
            let incoming = IncomingMessage::new(msg.clone(), attempt, tracker.clone());
            if self.config.ack_type() == AckType::Auto {
                let _ = incoming.ack();
            }

            if !self.lifecycle.begin_delivery() {
                return false;
            }
            let handled = self.invoke(&incoming, &tracker).await;
            self.lifecycle.end_delivery();

            match handled {
                Handled::Done => {
                    let _ = incoming.ack();
                }
                Handled::Failed(err) => {
                    self.lifecycle.record_failure();
                    tracing::warn!(
                        topic = %self.topic,
                        name = msg.name(),
                        id = msg.id(),
                        attempt,
                        error = %format!("{err:#}"),
                        "error while handling message"
                    );
                    let _ = incoming.nack();
                }
                Handled::TimedOut => {
                    self.lifecycle.record_failure();
                    tracing::warn!(
                        topic = %self.topic,
                        name = msg.name(),
                        id = msg.id(),
                        attempt,
                        ack_wait = ?self.config.ack_wait(),
                        "message not acknowledged in time"
                    );
                    let _ = incoming.nack();
                }
            }

            if tracker.settlement() != NACKED {
                return true;
            }
            if attempt >= self.config.max_redeliver() {
                tracing::warn!(
                    topic = %self.topic,
                    name = msg.name(),
                    id = msg.id(),
                    attempts = attempt,
                    "max redeliveries reached, message dropped"
                );
                return true;
            }
            if !self.lifecycle.is_active() {
                return false;
            }
            attempt += 1;
        }
    }

    async fn invoke(&self, msg: &IncomingMessage, tracker: &DeliveryTracker) -> Handled {
        let ack_wait = self.config.ack_wait();
        let mut deadline = Instant::now() + ack_wait;
        let cancellation = CancellationToken::new();
        let ctx = HandlerContext::builder()
            .cancellation(cancellation.clone())
            .deadline(deadline)
            .build();

        let fut = DELIVERING.scope(
            self.lifecycle.clone(),
            self.handler.handle_message(&ctx, msg),
        );
        tokio::pin!(fut);

        loop {
            tokio::select! {
                result = &mut fut => {
                    return match result {
                        Ok(()) => Handled::Done,
                        Err(err) => Handled::Failed(err),
                    };
                }
                _ = tokio::time::sleep_until(deadline) => {
                    if tracker.take_extended() {
                        deadline = Instant::now() + ack_wait;
                        continue;
                    }
                    cancellation.cancel();
                    return Handled::TimedOut;
                }
            }
        }
    }
}
