//! 事件驱动消息层（eda-messaging）
//!
//! 在 `eda-domain` 的领域抽象之上提供跨进程投递所需的基础设施：
//! - 类型注册表（`registry`）：稳定字符串键与具体类型之间的双向映射，负责载荷编解码；
//! - 消息与处理器（`message`、`middleware`）：传输层的原始消息、确认语义与中间件；
//! - 订阅生命周期（`subscription`）：`Active → Draining → Closed` 的幂等退订；
//! - 消息流（`stream`）：传输抽象 `MessageStream` 与进程内实现 `InMemoryStream`；
//! - 事件/命令/应答流（`event_stream`、`command_stream`、`reply_stream`）
//!   以及基于消息头关联的请求/应答（`requester`）；
//! - 收件箱去重（`inbox`）、发件箱转发（`outbox`）与运行配置（`config`）。
//!
pub mod command_stream;
pub mod config;
pub mod error;
pub mod event_stream;
pub mod inbox;
pub mod message;
pub mod middleware;
pub mod outbox;
pub mod registry;
pub mod reply_stream;
pub mod requester;
pub mod stream;
pub mod subscriber_config;
pub mod subscription;

pub use error::{MessagingError, MessagingResult};
