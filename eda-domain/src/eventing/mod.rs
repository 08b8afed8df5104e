//! 进程内事件分发（eventing）
//!
//! 提供按事件名路由的发布/订阅机制：
//! - `HandlerContext`：处理器上下文，携带取消信号、截止时间与关联信息；
//! - `EventHandler`：对某类/多类/全部事件进行消费处理；
//! - `EventDispatcher`：多对多分发，单个处理器失败不影响其他处理器，
//!   全部失败在分发结束后统一返回给调用方。
//!
//! 跨进程投递由 `eda-messaging` 负责，解码后的事件同样可以交给分发器处理。
//!
pub mod context;
pub mod dispatcher;
pub mod handler;

pub use context::HandlerContext;
pub use dispatcher::{DispatcherConfig, EventDispatcher, HandlerKey};
pub use handler::{EventHandler, FnEventHandler, HandledEventType, handler_fn};
