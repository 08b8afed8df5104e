//! 事件驱动领域层基础库（eda-domain）
//!
//! 提供事件驱动架构中与传输无关的领域抽象：
//! - 实体（`entity`）与聚合（`aggregate`），聚合负责产生带版本号的领域事件
//! - 元数据（`metadata`）：字符串键到封闭值类型的有序映射，随事件一起传播
//! - 领域事件（`domain_event`）、命令（`command`）与应答（`reply`）
//! - 进程内事件分发（`eventing`）：按事件名将事件路由到零个或多个处理器
//!
//! 本 crate 不关心事件如何序列化与跨进程投递，那部分由 `eda-messaging`
//! 基于类型注册表与消息流实现。
//!
//! 典型用法：
//! 1. 在聚合中嵌入 `AggregateBase`，通过 `add_event` 产生 `AggregateEvent`；
//! 2. 使用 `EventDispatcher` 订阅事件名并注册处理器；
//! 3. 取出聚合的待发布事件，交给分发器（进程内）或事件发布器（跨进程）。
//!
pub mod aggregate;
pub mod command;
pub mod domain_event;
pub mod entity;
pub mod error;
#[cfg(feature = "eventing")]
pub mod eventing;
pub mod metadata;
pub mod reply;

// 允许在本 crate 内部通过 ::eda_domain 进行自引用，
// 以便过程宏在本 crate 的单元测试中也能解析到 ::eda_domain 路径。
extern crate self as eda_domain;
