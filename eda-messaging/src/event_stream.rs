//! 事件流：领域事件的跨进程发布与接收
//!
//! 事件名即注册表中的键。发布端按事件名序列化载荷，接收端按消息名
//! 反序列化并还原为 `EventMessage`，交给 `EventHandler<EventMessage>`
//! （通常是一个 `EventDispatcher<EventMessage>`）。
//!
use crate::error::MessagingResult;
use crate::message::{IncomingMessage, MessageHandler, PayloadFrame, RawMessage};
use crate::registry::Registry;
use crate::stream::MessageStream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eda_domain::domain_event::{AggregateEvent, DomainEvent, NamedEvent, Payload};
use eda_domain::eventing::{EventHandler, HandlerContext};
use serde_json::Value;
use std::ops::Deref;
use std::sync::Arc;

/// 事件发布器
#[derive(Clone)]
pub struct EventPublisher {
    registry: Arc<Registry>,
    stream: Arc<dyn MessageStream>,
}

impl EventPublisher {
    pub fn new(registry: Arc<Registry>, stream: Arc<dyn MessageStream>) -> Self {
        Self { registry, stream }
    }

    /// 发布单个事件；聚合事件可直接传入（解引用为 `DomainEvent`）
    pub async fn publish(
        &self,
        ctx: &HandlerContext,
        topic: &str,
        event: &DomainEvent,
    ) -> MessagingResult<()> {
        let name = event.event_name();
        let payload = self.registry.serialize_value(name, &**event.payload())?;
        let data = PayloadFrame {
            payload: Some(payload),
            occurred_at: event.occurred_at(),
        }
        .encode()?;

        self.stream
            .publish(
                ctx,
                topic,
                RawMessage::builder()
                    .id(event.id())
                    .name(name)
                    .data(data)
                    .metadata(event.metadata().clone())
                    .build(),
            )
            .await
    }

    /// 按顺序发布聚合产生的事件，遇到第一个错误即停止
    pub async fn publish_all(
        &self,
        ctx: &HandlerContext,
        topic: &str,
        events: &[AggregateEvent],
    ) -> MessagingResult<()> {
        for event in events {
            self.publish(ctx, topic, event).await?;
        }
        Ok(())
    }
}

/// 收到的事件
#[derive(Debug, Clone)]
pub struct EventMessage {
    event: DomainEvent,
    subject: String,
    received_at: DateTime<Utc>,
    delivery: u32,
}

impl EventMessage {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn delivery(&self) -> u32 {
        self.delivery
    }

    /// 还原聚合事件；元数据缺少聚合信息时返回错误
    pub fn aggregate_event(&self) -> MessagingResult<AggregateEvent> {
        Ok(AggregateEvent::try_from_event(self.event.clone())?)
    }

    pub fn into_event(self) -> DomainEvent {
        self.event
    }
}

impl Deref for EventMessage {
    type Target = DomainEvent;

    fn deref(&self) -> &Self::Target {
        &self.event
    }
}

impl NamedEvent for EventMessage {
    fn event_name(&self) -> &str {
        self.event.event_name()
    }
}

pub fn decode_event(registry: &Registry, msg: &IncomingMessage) -> MessagingResult<EventMessage> {
    let name = msg.name();
    let frame = PayloadFrame::decode(msg.data())?;
    let wire = frame
        .payload
        .unwrap_or_else(|| Value::Object(Default::default()));
    let payload = Payload::from(registry.deserialize_value(name, wire, &[])?);

    let event = DomainEvent::restore(
        msg.id(),
        name,
        payload,
        msg.metadata().clone(),
        frame.occurred_at,
    )?;

    Ok(EventMessage {
        event,
        subject: msg.subject().to_string(),
        received_at: msg.received_at(),
        delivery: msg.delivery(),
    })
}

struct EventMessageHandler {
    registry: Arc<Registry>,
    handler: Arc<dyn EventHandler<EventMessage>>,
}

/// 把事件处理器接入消息流
///
/// 未注册的事件名解码失败，消息按失败处理，订阅保持活跃。
pub fn event_handler(
    registry: Arc<Registry>,
    handler: Arc<dyn EventHandler<EventMessage>>,
) -> Arc<dyn MessageHandler> {
    Arc::new(EventMessageHandler { registry, handler })
}

#[async_trait]
impl MessageHandler for EventMessageHandler {
    async fn handle_message(
        &self,
        ctx: &HandlerContext,
        msg: &IncomingMessage,
    ) -> anyhow::Result<()> {
        let event = decode_event(&self.registry, msg)?;
        tracing::trace!(
            handler = self.handler.handler_name(),
            event = event.event_name(),
            "handling event message"
        );
        self.handler.handle(ctx, &event).await
    }
}
