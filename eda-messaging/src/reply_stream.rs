//! 应答流：应答的发布与解码
//!
//! 约定（线上必须逐字一致）：
//! - `REPLY_NAME`：应答名，等于应答载荷在注册表中的键；
//! - `REPLY_OUTCOME`：严格为 `SUCCESS` 或 `FAILURE`；
//! - 两者共享前缀 `REPLY_`，与领域元数据的键互不冲突。
//!
//! 结果以消息头为准，而不是载荷的有无。内置应答 `am.Success` / `am.Failure`
//! 不携带载荷。
//!
use crate::error::{MessagingError, MessagingResult};
use crate::message::{IncomingMessage, MessageHandler, PayloadFrame, RawMessage};
use crate::registry::Registry;
use crate::stream::MessageStream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eda_domain::domain_event::Payload;
use eda_domain::eventing::HandlerContext;
use eda_domain::metadata::Metadata;
use eda_domain::reply::{Reply, ReplyOutcome};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub const REPLY_HDR_PREFIX: &str = "REPLY_";
pub const REPLY_NAME_HDR: &str = "REPLY_NAME";
pub const REPLY_OUTCOME_HDR: &str = "REPLY_OUTCOME";
pub const REPLY_CORRELATION_ID_HDR: &str = "REPLY_CORRELATION_ID";

pub const SUCCESS_REPLY: &str = "am.Success";
pub const FAILURE_REPLY: &str = "am.Failure";

/// 内置应答不经过注册表
pub fn is_builtin_reply(name: &str) -> bool {
    name == SUCCESS_REPLY || name == FAILURE_REPLY
}

/// 解码后的应答
#[derive(Clone)]
pub struct ReplyMessage {
    reply: Reply,
    outcome: ReplyOutcome,
    subject: String,
    received_at: DateTime<Utc>,
}

impl ReplyMessage {
    pub fn id(&self) -> &str {
        self.reply.id()
    }

    pub fn reply_name(&self) -> &str {
        self.reply.reply_name()
    }

    pub fn outcome(&self) -> ReplyOutcome {
        self.outcome
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.reply.payload()
    }

    pub fn payload_as<T: Any>(&self) -> MessagingResult<&T> {
        Ok(self.reply.payload_as::<T>()?)
    }

    pub fn metadata(&self) -> &Metadata {
        self.reply.metadata()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata().get_str(REPLY_CORRELATION_ID_HDR)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.reply.occurred_at()
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    pub fn into_reply(self) -> Reply {
        self.reply
    }
}

impl fmt::Debug for ReplyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyMessage")
            .field("reply", &self.reply)
            .field("outcome", &self.outcome)
            .field("subject", &self.subject)
            .finish()
    }
}

/// 把收到的消息解码为应答
///
/// 缺失或非法的结果头、缺失的应答名头、未注册的应答名均视为解码失败。
pub fn decode_reply(registry: &Registry, msg: &IncomingMessage) -> MessagingResult<ReplyMessage> {
    let metadata = msg.metadata();
    let outcome = metadata
        .get_str(REPLY_OUTCOME_HDR)
        .ok_or_else(|| MessagingError::missing_header(REPLY_OUTCOME_HDR))?
        .parse::<ReplyOutcome>()?;
    let name = metadata
        .get_str(REPLY_NAME_HDR)
        .ok_or_else(|| MessagingError::missing_header(REPLY_NAME_HDR))?
        .to_string();

    let frame = PayloadFrame::decode(msg.data())?;
    let payload = if is_builtin_reply(&name) {
        None
    } else if !registry.contains(&name) {
        return Err(MessagingError::UnknownType { key: name });
    } else {
        match frame.payload {
            Some(wire) => Some(Payload::from(registry.deserialize_value(&name, wire, &[])?)),
            None => None,
        }
    };

    let reply = Reply::restore(
        msg.id(),
        name,
        payload,
        metadata.clone(),
        frame.occurred_at,
    )?;

    Ok(ReplyMessage {
        reply,
        outcome,
        subject: msg.subject().to_string(),
        received_at: msg.received_at(),
    })
}

/// 应答发布器
#[derive(Clone)]
pub struct ReplyPublisher {
    registry: Arc<Registry>,
    stream: Arc<dyn MessageStream>,
}

impl ReplyPublisher {
    pub fn new(registry: Arc<Registry>, stream: Arc<dyn MessageStream>) -> Self {
        Self { registry, stream }
    }

    /// 发布应答，写入应答名与结果头
    pub async fn publish(
        &self,
        ctx: &HandlerContext,
        topic: &str,
        reply: &Reply,
        outcome: ReplyOutcome,
    ) -> MessagingResult<()> {
        let name = reply.reply_name();
        let payload = match reply.payload() {
            Some(payload) if !is_builtin_reply(name) => {
                Some(self.registry.serialize_value(name, &**payload)?)
            }
            _ => None,
        };

        let data = PayloadFrame {
            payload,
            occurred_at: reply.occurred_at(),
        }
        .encode()?;

        let mut metadata = reply.metadata().clone();
        metadata.set(REPLY_NAME_HDR, name);
        metadata.set(REPLY_OUTCOME_HDR, outcome.as_str());

        tracing::debug!(topic, reply = name, outcome = %outcome, "publishing reply");
        self.stream
            .publish(
                ctx,
                topic,
                RawMessage::builder()
                    .id(reply.id())
                    .name(name)
                    .data(data)
                    .metadata(metadata)
                    .build(),
            )
            .await
    }
}

/// 应答处理器
#[async_trait]
pub trait ReplyHandler: Send + Sync {
    async fn handle_reply(&self, ctx: &HandlerContext, reply: &ReplyMessage) -> anyhow::Result<()>;
}

struct ReplyMessageHandler {
    registry: Arc<Registry>,
    handler: Arc<dyn ReplyHandler>,
}

/// 把应答处理器接入消息流
pub fn reply_handler(
    registry: Arc<Registry>,
    handler: Arc<dyn ReplyHandler>,
) -> Arc<dyn MessageHandler> {
    Arc::new(ReplyMessageHandler { registry, handler })
}

#[async_trait]
impl MessageHandler for ReplyMessageHandler {
    async fn handle_message(
        &self,
        ctx: &HandlerContext,
        msg: &IncomingMessage,
    ) -> anyhow::Result<()> {
        let reply = decode_reply(&self.registry, msg)?;
        self.handler.handle_reply(ctx, &reply).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Acknowledger;
    use crate::stream::InMemoryStream;
    use crate::subscriber_config::SubscriberConfig;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct PaymentDeclined {
        reason: String,
    }

    struct NoopAcker;

    impl Acknowledger for NoopAcker {
        fn ack(&self) -> MessagingResult<()> {
            Ok(())
        }
        fn nack(&self) -> MessagingResult<()> {
            Ok(())
        }
        fn extend(&self) -> MessagingResult<()> {
            Ok(())
        }
        fn kill(&self) -> MessagingResult<()> {
            Ok(())
        }
    }

    fn incoming(name: &str, metadata: Metadata, data: &[u8]) -> IncomingMessage {
        IncomingMessage::new(
            RawMessage::builder()
                .name(name)
                .metadata(metadata)
                .data(data.to_vec())
                .build(),
            1,
            Arc::new(NoopAcker),
        )
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register_key("PaymentDeclined", PaymentDeclined::default(), [])
            .unwrap();
        registry
    }

    #[test]
    fn outcome_header_must_be_exact() {
        let registry = registry();
        let frame = br#"{"occurred_at":"2024-01-01T00:00:00Z"}"#;

        for bad in ["success", "OK", ""] {
            let md = Metadata::new()
                .with(REPLY_NAME_HDR, SUCCESS_REPLY)
                .with(REPLY_OUTCOME_HDR, bad);
            let err = decode_reply(&registry, &incoming(SUCCESS_REPLY, md, frame)).unwrap_err();
            assert!(matches!(err, MessagingError::Domain(_)), "{bad}: {err}");
        }

        let md = Metadata::new().with(REPLY_NAME_HDR, SUCCESS_REPLY);
        let err = decode_reply(&registry, &incoming(SUCCESS_REPLY, md, frame)).unwrap_err();
        assert!(matches!(err, MessagingError::MissingHeader { .. }));
    }

    #[test]
    fn unknown_reply_name_is_a_decode_failure() {
        let registry = registry();
        let md = Metadata::new()
            .with(REPLY_NAME_HDR, "Mystery")
            .with(REPLY_OUTCOME_HDR, "SUCCESS");
        let err = decode_reply(
            &registry,
            &incoming(
                "Mystery",
                md,
                br#"{"payload":{},"occurred_at":"2024-01-01T00:00:00Z"}"#,
            ),
        )
        .unwrap_err();
        assert!(err.is_unknown_type());
    }

    struct Collect {
        replies: Mutex<Vec<ReplyMessage>>,
    }

    #[async_trait]
    impl ReplyHandler for Collect {
        async fn handle_reply(
            &self,
            _ctx: &HandlerContext,
            reply: &ReplyMessage,
        ) -> anyhow::Result<()> {
            self.replies.lock().unwrap().push(reply.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn failure_reply_keeps_outcome_and_payload() {
        let registry = Arc::new(registry());
        let stream = Arc::new(InMemoryStream::new());
        let collect = Arc::new(Collect {
            replies: Mutex::new(Vec::new()),
        });
        stream
            .subscribe(
                "replies",
                reply_handler(registry.clone(), collect.clone()),
                SubscriberConfig::default(),
            )
            .await
            .unwrap();

        let publisher = ReplyPublisher::new(registry, stream);
        let ctx = HandlerContext::new();
        let declined = Reply::new(
            "PaymentDeclined",
            PaymentDeclined {
                reason: "insufficient_funds".into(),
            },
        )
        .unwrap();
        publisher
            .publish(&ctx, "replies", &declined, ReplyOutcome::Failure)
            .await
            .unwrap();
        publisher
            .publish(
                &ctx,
                "replies",
                &Reply::empty(SUCCESS_REPLY).unwrap(),
                ReplyOutcome::Success,
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let replies = collect.replies.lock().unwrap();
        assert_eq!(replies.len(), 2);

        assert_eq!(replies[0].reply_name(), "PaymentDeclined");
        assert_eq!(replies[0].outcome(), ReplyOutcome::Failure);
        assert_eq!(
            replies[0].metadata().get_str(REPLY_OUTCOME_HDR),
            Some("FAILURE")
        );
        assert_eq!(
            replies[0]
                .payload_as::<PaymentDeclined>()
                .unwrap()
                .reason,
            "insufficient_funds"
        );

        assert!(replies[1].is_success());
        assert!(replies[1].payload().is_none());
    }
}
