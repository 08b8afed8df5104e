//! 传输层消息（RawMessage / IncomingMessage）与消息处理器
//!
//! `RawMessage` 是发布端交给传输的原始形态：名称、主题、字节数据与消息头（元数据）。
//! `IncomingMessage` 是订阅端收到的形态，额外携带接收时间、投递次数与确认操作。
//!
use crate::error::{MessagingError, MessagingResult};
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use eda_domain::eventing::HandlerContext;
use eda_domain::metadata::Metadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Builder)]
pub struct RawMessage {
    /// 消息唯一标识（发布端生成，用于去重）
    #[builder(default = uuid::Uuid::new_v4().to_string(), into)]
    id: String,
    /// 消息名（事件名/命令名/应答名）
    #[builder(into)]
    name: String,
    /// 主题，发布时由传输写入
    #[builder(default, into)]
    subject: String,
    /// 数据
    #[builder(default)]
    data: Vec<u8>,
    /// 消息头
    #[builder(default)]
    metadata: Metadata,
    /// 发送时间
    #[builder(default = Utc::now())]
    sent_at: DateTime<Utc>,
}

impl RawMessage {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    pub(crate) fn with_subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }
}

/// 事件/命令/应答共用的数据帧：注册表编码后的载荷与发生时间
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PayloadFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) payload: Option<Value>,
    pub(crate) occurred_at: DateTime<Utc>,
}

impl PayloadFrame {
    pub(crate) fn encode(&self) -> MessagingResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub(crate) fn decode(data: &[u8]) -> MessagingResult<Self> {
        serde_json::from_slice(data)
            .map_err(|err| MessagingError::decode(format!("malformed message frame: {err}")))
    }
}

/// 传输层确认操作
///
/// 由具体传输实现；`IncomingMessage` 保证 ack/nack/kill 最多只有一个生效。
pub trait Acknowledger: Send + Sync {
    /// 处理成功
    fn ack(&self) -> MessagingResult<()>;
    /// 处理失败，请求重投
    fn nack(&self) -> MessagingResult<()>;
    /// 仍在处理，延长确认期限
    fn extend(&self) -> MessagingResult<()>;
    /// 放弃该消息，不再重投
    fn kill(&self) -> MessagingResult<()>;
}

#[derive(Clone)]
pub struct IncomingMessage {
    message: RawMessage,
    received_at: DateTime<Utc>,
    delivery: u32,
    settled: Arc<AtomicBool>,
    acker: Arc<dyn Acknowledger>,
}

impl IncomingMessage {
    pub fn new(message: RawMessage, delivery: u32, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            message,
            received_at: Utc::now(),
            delivery,
            settled: Arc::new(AtomicBool::new(false)),
            acker,
        }
    }

    pub fn id(&self) -> &str {
        self.message.id()
    }

    pub fn name(&self) -> &str {
        self.message.name()
    }

    pub fn subject(&self) -> &str {
        self.message.subject()
    }

    pub fn data(&self) -> &[u8] {
        self.message.data()
    }

    pub fn metadata(&self) -> &Metadata {
        self.message.metadata()
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.message.sent_at()
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// 第几次投递（从 1 开始）
    pub fn delivery(&self) -> u32 {
        self.delivery
    }

    pub fn raw(&self) -> &RawMessage {
        &self.message
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    pub fn ack(&self) -> MessagingResult<()> {
        self.settle(|acker| acker.ack())
    }

    pub fn nack(&self) -> MessagingResult<()> {
        self.settle(|acker| acker.nack())
    }

    pub fn kill(&self) -> MessagingResult<()> {
        self.settle(|acker| acker.kill())
    }

    /// 已结算的消息不再延期
    pub fn extend(&self) -> MessagingResult<()> {
        if self.is_settled() {
            return Ok(());
        }
        self.acker.extend()
    }

    fn settle(
        &self,
        op: impl FnOnce(&dyn Acknowledger) -> MessagingResult<()>,
    ) -> MessagingResult<()> {
        if self.settled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        op(self.acker.as_ref())
    }
}

impl fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("message", &self.message)
            .field("received_at", &self.received_at)
            .field("delivery", &self.delivery)
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// 消息处理器
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, ctx: &HandlerContext, msg: &IncomingMessage)
    -> anyhow::Result<()>;
}

pub struct FnMessageHandler<F> {
    f: F,
}

/// 以闭包创建消息处理器
pub fn handler_fn<F, Fut>(f: F) -> Arc<FnMessageHandler<F>>
where
    F: Fn(HandlerContext, IncomingMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnMessageHandler { f })
}

#[async_trait]
impl<F, Fut> MessageHandler for FnMessageHandler<F>
where
    F: Fn(HandlerContext, IncomingMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle_message(
        &self,
        ctx: &HandlerContext,
        msg: &IncomingMessage,
    ) -> anyhow::Result<()> {
        (self.f)(ctx.clone(), msg.clone()).await
    }
}
