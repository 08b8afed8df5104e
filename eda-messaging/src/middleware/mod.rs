//! 消息处理中间件
//!
//! 中间件把一个处理器包装为另一个处理器。`with_middleware` 按逆序包装，
//! 因此列表中的第一个中间件位于最外层，最先看到消息。
//!
mod logging;

pub use logging::logging;

use crate::message::MessageHandler;
use std::sync::Arc;

pub type Middleware =
    Arc<dyn Fn(Arc<dyn MessageHandler>) -> Arc<dyn MessageHandler> + Send + Sync>;

/// 以闭包创建中间件
pub fn middleware_fn<F>(f: F) -> Middleware
where
    F: Fn(Arc<dyn MessageHandler>) -> Arc<dyn MessageHandler> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn with_middleware(
    handler: Arc<dyn MessageHandler>,
    middlewares: &[Middleware],
) -> Arc<dyn MessageHandler> {
    middlewares
        .iter()
        .rev()
        .fold(handler, |next, middleware| middleware(next))
}
