//! 请求/应答（Requester）
//!
//! 请求方在自己的应答主题上保持一个订阅，每次请求生成关联标识，
//! 写入 `COMMAND_REPLY_CHANNEL` 与 `COMMAND_CORRELATION_ID` 后发布命令；
//! 处理方把这两个头复制为 `REPLY_*` 发回，请求方据 `REPLY_CORRELATION_ID`
//! 唤醒对应的等待者。
//!
//! 结果以 `REPLY_OUTCOME` 为准：`FAILURE` 一律返回 `ReplyFailed`，
//! 即便应答名是已注册的普通类型。
//!
use crate::command_stream::{
    COMMAND_CORRELATION_ID_HDR, COMMAND_REPLY_CHANNEL_HDR, CommandPublisher,
};
use crate::error::{MessagingError, MessagingResult};
use crate::message::{IncomingMessage, MessageHandler};
use crate::registry::Registry;
use crate::reply_stream::{REPLY_CORRELATION_ID_HDR, ReplyMessage, decode_reply};
use crate::stream::MessageStream;
use crate::subscriber_config::SubscriberConfig;
use crate::subscription::Subscription;
use async_trait::async_trait;
use bon::Builder;
use dashmap::DashMap;
use eda_domain::command::Command;
use eda_domain::eventing::HandlerContext;
use eda_domain::metadata::Metadata;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Builder)]
pub struct RequesterConfig {
    /// 应答主题
    #[builder(into)]
    reply_channel: String,
    /// 单次请求的等待上限；上下文截止时间更早时以截止时间为准
    #[builder(default = DEFAULT_REQUEST_TIMEOUT)]
    timeout: Duration,
}

impl RequesterConfig {
    pub fn reply_channel(&self) -> &str {
        &self.reply_channel
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

type Pending = DashMap<String, oneshot::Sender<MessagingResult<ReplyMessage>>>;

pub struct Requester {
    publisher: CommandPublisher,
    config: RequesterConfig,
    pending: Arc<Pending>,
    subscription: Subscription,
}

impl Requester {
    /// 订阅应答主题并返回请求方
    pub async fn connect(
        registry: Arc<Registry>,
        stream: Arc<dyn MessageStream>,
        config: RequesterConfig,
    ) -> MessagingResult<Self> {
        let pending = Arc::new(Pending::new());
        let subscription = stream
            .subscribe(
                config.reply_channel(),
                Arc::new(ReplyCorrelator {
                    registry: registry.clone(),
                    pending: pending.clone(),
                }),
                SubscriberConfig::default(),
            )
            .await?;

        Ok(Self {
            publisher: CommandPublisher::new(registry, stream),
            config,
            pending,
            subscription,
        })
    }

    /// 发送命令并等待关联的应答
    ///
    /// - `SUCCESS`：返回应答；
    /// - `FAILURE`：返回 `ReplyFailed`，可用 `failed_reply()` 取出解码后的载荷；
    /// - 应答名未注册：返回 `UnknownType`；
    /// - 超时或上下文取消：`RequestTimeout` / `RequestCancelled`。
    pub async fn request(
        &self,
        ctx: &HandlerContext,
        topic: &str,
        command: Command,
    ) -> MessagingResult<ReplyMessage> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let command = command.with_metadata(
            Metadata::new()
                .with(COMMAND_REPLY_CHANNEL_HDR, self.config.reply_channel())
                .with(COMMAND_CORRELATION_ID_HDR, correlation_id.as_str()),
        );

        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), tx);
        let _pending = PendingGuard {
            pending: &self.pending,
            correlation_id: &correlation_id,
        };

        self.publisher.publish(ctx, topic, &command).await?;
        tracing::debug!(
            topic,
            command = command.command_name(),
            correlation_id = %correlation_id,
            "request sent"
        );

        let timeout = ctx
            .remaining()
            .map_or(self.config.timeout(), |remaining| {
                remaining.min(self.config.timeout())
            });

        let received = tokio::select! {
            _ = ctx.cancelled() => {
                return Err(MessagingError::RequestCancelled {
                    topic: topic.to_string(),
                });
            }
            received = tokio::time::timeout(timeout, rx) => received,
        };

        let reply = match received {
            Err(_) => {
                tracing::warn!(topic, correlation_id = %correlation_id, ?timeout, "request timed out");
                return Err(MessagingError::RequestTimeout {
                    topic: topic.to_string(),
                    timeout,
                });
            }
            Ok(Err(_)) => {
                return Err(MessagingError::Transport {
                    reason: format!("reply channel {} closed", self.config.reply_channel()),
                });
            }
            Ok(Ok(reply)) => reply?,
        };

        if reply.is_success() {
            Ok(reply)
        } else {
            Err(MessagingError::ReplyFailed(Box::new(reply)))
        }
    }

    /// 等待中的请求数
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// 退订应答主题（幂等）
    pub fn unsubscribe(&self) -> MessagingResult<()> {
        self.subscription.unsubscribe()
    }
}

/// 请求结束（含超时与取消）时移除等待项
struct PendingGuard<'a> {
    pending: &'a Pending,
    correlation_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.correlation_id);
    }
}

struct ReplyCorrelator {
    registry: Arc<Registry>,
    pending: Arc<Pending>,
}

#[async_trait]
impl MessageHandler for ReplyCorrelator {
    async fn handle_message(
        &self,
        _ctx: &HandlerContext,
        msg: &IncomingMessage,
    ) -> anyhow::Result<()> {
        let Some(correlation_id) = msg.metadata().get_str(REPLY_CORRELATION_ID_HDR) else {
            tracing::debug!(id = msg.id(), name = msg.name(), "reply without correlation id ignored");
            return Ok(());
        };
        let Some((_, waiter)) = self.pending.remove(correlation_id) else {
            tracing::debug!(correlation_id, name = msg.name(), "no pending request for reply");
            return Ok(());
        };

        // 解码失败同样交给请求方，而不是让应答重投
        let decoded = decode_reply(&self.registry, msg);
        if let Err(err) = &decoded {
            tracing::warn!(correlation_id, name = msg.name(), error = %err, "failed to decode reply");
        }
        let _ = waiter.send(decoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_stream::{CommandRejection, command_handler, command_handler_fn};
    use crate::reply_stream::{ReplyPublisher, SUCCESS_REPLY};
    use crate::stream::InMemoryStream;
    use crate::subscription::SubscriptionState;
    use eda_domain::reply::Reply;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Pong {
        seq: u32,
    }

    fn registry() -> Arc<Registry> {
        let mut registry = Registry::new();
        registry.register_key("Ping", Ping::default(), []).unwrap();
        registry.register_key("Pong", Pong::default(), []).unwrap();
        Arc::new(registry)
    }

    async fn serve(registry: Arc<Registry>, stream: Arc<InMemoryStream>) {
        let handler = command_handler_fn(|_ctx, cmd| async move {
            let ping = cmd.payload_as::<Ping>()?;
            if ping.seq == 0 {
                return Err(anyhow::Error::from(CommandRejection::with_reply(
                    "zero",
                    Reply::new("Pong", Pong { seq: 0 })?,
                )));
            }
            Ok::<_, anyhow::Error>(Some(Reply::new("Pong", Pong { seq: ping.seq + 1 })?))
        });
        stream
            .subscribe(
                "pings",
                command_handler(
                    registry.clone(),
                    ReplyPublisher::new(registry, stream.clone()),
                    handler,
                ),
                SubscriberConfig::default(),
            )
            .await
            .unwrap();
    }

    async fn requester(registry: Arc<Registry>, stream: Arc<InMemoryStream>) -> Requester {
        Requester::connect(
            registry,
            stream,
            RequesterConfig::builder()
                .reply_channel("pings.replies")
                .timeout(Duration::from_millis(200))
                .build(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn concurrent_requests_are_correlated() {
        let registry = registry();
        let stream = Arc::new(InMemoryStream::new());
        serve(registry.clone(), stream.clone()).await;
        let requester = requester(registry, stream).await;

        let ctx = HandlerContext::new();
        let (a, b) = tokio::join!(
            requester.request(&ctx, "pings", Command::new("Ping", Ping { seq: 1 }).unwrap()),
            requester.request(&ctx, "pings", Command::new("Ping", Ping { seq: 41 }).unwrap()),
        );

        assert_eq!(a.unwrap().payload_as::<Pong>().unwrap().seq, 2);
        assert_eq!(b.unwrap().payload_as::<Pong>().unwrap().seq, 42);
        assert_eq!(requester.pending(), 0);
    }

    #[tokio::test]
    async fn failure_outcome_wins_over_registered_name() {
        let registry = registry();
        let stream = Arc::new(InMemoryStream::new());
        serve(registry.clone(), stream.clone()).await;
        let requester = requester(registry, stream).await;

        let err = requester
            .request(
                &HandlerContext::new(),
                "pings",
                Command::new("Ping", Ping { seq: 0 }).unwrap(),
            )
            .await
            .unwrap_err();

        let reply = err.failed_reply().expect("failed reply");
        assert_eq!(reply.reply_name(), "Pong");
        assert_eq!(reply.payload_as::<Pong>().unwrap().seq, 0);
    }

    #[tokio::test]
    async fn no_responder_times_out() {
        let registry = registry();
        let stream = Arc::new(InMemoryStream::new());
        let requester = requester(registry, stream).await;

        let err = requester
            .request(
                &HandlerContext::new(),
                "nobody",
                Command::new("Ping", Ping { seq: 1 }).unwrap(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, MessagingError::RequestTimeout { .. }));
        assert_eq!(requester.pending(), 0);
    }

    #[tokio::test]
    async fn cancellation_ends_the_wait() {
        let registry = registry();
        let stream = Arc::new(InMemoryStream::new());
        let requester = requester(registry, stream).await;

        let ctx = HandlerContext::new();
        let cancel = ctx.cancellation().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = requester
            .request(&ctx, "nobody", Command::new("Ping", Ping { seq: 1 }).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::RequestCancelled { .. }));
    }

    #[tokio::test]
    async fn stray_replies_are_ignored() {
        let registry = registry();
        let stream = Arc::new(InMemoryStream::new());
        let requester = requester(registry.clone(), stream.clone()).await;

        let reply = Reply::empty(SUCCESS_REPLY).unwrap().with_metadata(
            Metadata::new().with(REPLY_CORRELATION_ID_HDR, "not-mine"),
        );
        ReplyPublisher::new(registry, stream)
            .publish(
                &HandlerContext::new(),
                "pings.replies",
                &reply,
                eda_domain::reply::ReplyOutcome::Success,
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = requester.subscription().stats().unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 0);

        requester.unsubscribe().unwrap();
        requester.unsubscribe().unwrap();
        requester.subscription().drained().await;
        assert_eq!(requester.subscription().state(), SubscriptionState::Closed);
    }
}
