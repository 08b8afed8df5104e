//! 事件处理器（EventHandler）
//!
//! 定义消费事件的处理逻辑与元信息（名称），以及订阅时使用的事件名选择器。
//!
use super::context::HandlerContext;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// 订阅的事件名选择器
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandledEventType {
    One(String),
    Many(Vec<String>),
    All,
}

impl From<&str> for HandledEventType {
    fn from(value: &str) -> Self {
        HandledEventType::One(value.to_string())
    }
}

impl From<String> for HandledEventType {
    fn from(value: String) -> Self {
        HandledEventType::One(value)
    }
}

impl From<Vec<&str>> for HandledEventType {
    fn from(value: Vec<&str>) -> Self {
        HandledEventType::Many(value.into_iter().map(str::to_string).collect())
    }
}

/// 事件处理器
///
/// 处理器应当是幂等的：跨进程投递为“至少一次”，同一事件可能被重复送达。
#[async_trait]
pub trait EventHandler<E>: Send + Sync {
    /// 处理器名称（用于失败记录与日志）
    fn handler_name(&self) -> &str;

    /// 处理事件
    async fn handle(&self, ctx: &HandlerContext, event: &E) -> anyhow::Result<()>;
}

/// 基于闭包的处理器
pub struct FnEventHandler<E, F> {
    name: String,
    f: F,
    _marker: PhantomData<fn(E)>,
}

/// 以闭包创建处理器，闭包接收上下文与事件的克隆
pub fn handler_fn<E, F, Fut>(name: impl Into<String>, f: F) -> Arc<FnEventHandler<E, F>>
where
    E: Clone + Send + Sync + 'static,
    F: Fn(HandlerContext, E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnEventHandler {
        name: name.into(),
        f,
        _marker: PhantomData,
    })
}

#[async_trait]
impl<E, F, Fut> EventHandler<E> for FnEventHandler<E, F>
where
    E: Clone + Send + Sync + 'static,
    F: Fn(HandlerContext, E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn handler_name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &HandlerContext, event: &E) -> anyhow::Result<()> {
        (self.f)(ctx.clone(), event.clone()).await
    }
}
