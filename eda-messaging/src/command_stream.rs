//! 命令流：命令的发布、解码与应答
//!
//! 命令消息头：
//! - `COMMAND_NAME`：命令名；
//! - `COMMAND_REPLY_CHANNEL`：应答发往的主题；
//! - `COMMAND_CORRELATION_ID`：请求方用来关联应答的标识。
//!
//! 处理完成后，除 `COMMAND_NAME` 以外的所有 `COMMAND_*` 头都以 `REPLY_*`
//! 的形式复制到应答上，请求方据此把应答对回原请求。
//!
use crate::error::{MessagingError, MessagingResult};
use crate::message::{IncomingMessage, MessageHandler, PayloadFrame, RawMessage};
use crate::registry::Registry;
use crate::reply_stream::{FAILURE_REPLY, REPLY_HDR_PREFIX, ReplyPublisher, SUCCESS_REPLY};
use crate::stream::MessageStream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eda_domain::command::Command;
use eda_domain::domain_event::Payload;
use eda_domain::eventing::HandlerContext;
use eda_domain::reply::{Reply, ReplyOutcome};
use serde_json::Value;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

pub const COMMAND_HDR_PREFIX: &str = "COMMAND_";
pub const COMMAND_NAME_HDR: &str = "COMMAND_NAME";
pub const COMMAND_REPLY_CHANNEL_HDR: &str = "COMMAND_REPLY_CHANNEL";
pub const COMMAND_CORRELATION_ID_HDR: &str = "COMMAND_CORRELATION_ID";

/// 命令发布器
#[derive(Clone)]
pub struct CommandPublisher {
    registry: Arc<Registry>,
    stream: Arc<dyn MessageStream>,
}

impl CommandPublisher {
    pub fn new(registry: Arc<Registry>, stream: Arc<dyn MessageStream>) -> Self {
        Self { registry, stream }
    }

    /// 发布命令；命令自身的元数据（如应答主题）原样作为消息头
    pub async fn publish(
        &self,
        ctx: &HandlerContext,
        topic: &str,
        command: &Command,
    ) -> MessagingResult<()> {
        let name = command.command_name();
        let payload = self.registry.serialize_value(name, &**command.payload())?;
        let data = PayloadFrame {
            payload: Some(payload),
            occurred_at: command.occurred_at(),
        }
        .encode()?;

        let mut metadata = command.metadata().clone();
        metadata.set(COMMAND_NAME_HDR, name);

        tracing::debug!(topic, command = name, id = command.id(), "publishing command");
        self.stream
            .publish(
                ctx,
                topic,
                RawMessage::builder()
                    .id(command.id())
                    .name(name)
                    .data(data)
                    .metadata(metadata)
                    .build(),
            )
            .await
    }
}

/// 收到的命令
#[derive(Debug, Clone)]
pub struct CommandMessage {
    command: Command,
    subject: String,
    received_at: DateTime<Utc>,
    delivery: u32,
}

impl CommandMessage {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn delivery(&self) -> u32 {
        self.delivery
    }

    pub fn reply_channel(&self) -> Option<&str> {
        self.command.metadata().get_str(COMMAND_REPLY_CHANNEL_HDR)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.command.metadata().get_str(COMMAND_CORRELATION_ID_HDR)
    }

    pub fn into_command(self) -> Command {
        self.command
    }
}

impl Deref for CommandMessage {
    type Target = Command;

    fn deref(&self) -> &Self::Target {
        &self.command
    }
}

/// 按注册表把消息解码为命令
pub fn decode_command(registry: &Registry, msg: &IncomingMessage) -> MessagingResult<CommandMessage> {
    let name = msg.name();
    let frame = PayloadFrame::decode(msg.data())?;
    let wire = frame
        .payload
        .unwrap_or_else(|| Value::Object(Default::default()));
    let payload = Payload::from(registry.deserialize_value(name, wire, &[])?);

    let command = Command::restore(
        msg.id(),
        name,
        payload,
        msg.metadata().clone(),
        frame.occurred_at,
    )?;

    Ok(CommandMessage {
        command,
        subject: msg.subject().to_string(),
        received_at: msg.received_at(),
        delivery: msg.delivery(),
    })
}

/// 拒绝执行命令，可附带失败应答
///
/// 处理器返回其它错误时发送内置的 `am.Failure`。
#[derive(Debug, thiserror::Error)]
#[error("command rejected: {reason}")]
pub struct CommandRejection {
    reason: String,
    reply: Option<Reply>,
}

impl CommandRejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            reply: None,
        }
    }

    pub fn with_reply(reason: impl Into<String>, reply: Reply) -> Self {
        Self {
            reason: reason.into(),
            reply: Some(reply),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn reply(&self) -> Option<&Reply> {
        self.reply.as_ref()
    }
}

/// 命令处理器；成功时可返回应答，返回 `None` 时发送内置的 `am.Success`
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle_command(
        &self,
        ctx: &HandlerContext,
        cmd: &CommandMessage,
    ) -> anyhow::Result<Option<Reply>>;
}

pub struct FnCommandHandler<F> {
    f: F,
}

/// 以闭包创建命令处理器
pub fn command_handler_fn<F, Fut>(f: F) -> Arc<FnCommandHandler<F>>
where
    F: Fn(HandlerContext, CommandMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<Reply>>> + Send + 'static,
{
    Arc::new(FnCommandHandler { f })
}

#[async_trait]
impl<F, Fut> CommandHandler for FnCommandHandler<F>
where
    F: Fn(HandlerContext, CommandMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<Reply>>> + Send + 'static,
{
    async fn handle_command(
        &self,
        ctx: &HandlerContext,
        cmd: &CommandMessage,
    ) -> anyhow::Result<Option<Reply>> {
        (self.f)(ctx.clone(), cmd.clone()).await
    }
}

struct CommandMessageHandler {
    registry: Arc<Registry>,
    publisher: ReplyPublisher,
    handler: Arc<dyn CommandHandler>,
}

/// 把命令处理器接入消息流，处理结果以应答发回 `COMMAND_REPLY_CHANNEL`
///
/// 处理器出错时发送失败应答并确认命令，命令不会重投。
/// 命令没有应答主题时不发应答，处理器出错则按普通消息失败处理。
pub fn command_handler(
    registry: Arc<Registry>,
    publisher: ReplyPublisher,
    handler: Arc<dyn CommandHandler>,
) -> Arc<dyn MessageHandler> {
    Arc::new(CommandMessageHandler {
        registry,
        publisher,
        handler,
    })
}

#[async_trait]
impl MessageHandler for CommandMessageHandler {
    async fn handle_message(
        &self,
        ctx: &HandlerContext,
        msg: &IncomingMessage,
    ) -> anyhow::Result<()> {
        let cmd = decode_command(&self.registry, msg)?;
        let result = self.handler.handle_command(ctx, &cmd).await;

        let Some(destination) = cmd.reply_channel().map(str::to_string) else {
            result?;
            tracing::debug!(command = cmd.command_name(), "command has no reply channel");
            return Ok(());
        };

        let (reply, outcome) = match result {
            Ok(reply) => (reply, ReplyOutcome::Success),
            Err(err) => {
                tracing::warn!(
                    command = cmd.command_name(),
                    id = cmd.id(),
                    error = %format!("{err:#}"),
                    "command failed"
                );
                let reply = err
                    .downcast_ref::<CommandRejection>()
                    .and_then(|rejection| rejection.reply().cloned());
                (reply, ReplyOutcome::Failure)
            }
        };

        let reply = with_correlation_headers(default_reply(reply, outcome)?, &cmd);
        self.publisher
            .publish(ctx, &destination, &reply, outcome)
            .await?;
        Ok(())
    }
}

fn default_reply(reply: Option<Reply>, outcome: ReplyOutcome) -> MessagingResult<Reply> {
    match reply {
        Some(reply) => Ok(reply),
        None => {
            let name = match outcome {
                ReplyOutcome::Success => SUCCESS_REPLY,
                ReplyOutcome::Failure => FAILURE_REPLY,
            };
            Reply::empty(name).map_err(MessagingError::from)
        }
    }
}

fn with_correlation_headers(mut reply: Reply, cmd: &Command) -> Reply {
    for (key, value) in cmd.metadata() {
        if key == COMMAND_NAME_HDR {
            continue;
        }
        if let Some(rest) = key.strip_prefix(COMMAND_HDR_PREFIX) {
            reply
                .metadata_mut()
                .set(format!("{REPLY_HDR_PREFIX}{rest}"), value.clone());
        }
    }
    reply
}
