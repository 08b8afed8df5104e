//! 领域事件（Domain Event）
//!
//! 定义事件的最小形态：事件名（路由键与线上类型键）、类型擦除的载荷
//! 与元数据；以及由聚合产生、附带聚合标识与版本号的 `AggregateEvent`。

mod aggregate_event;
mod event;
mod payload;

pub use aggregate_event::{
    AGGREGATE_ID_KEY, AGGREGATE_NAME_KEY, AGGREGATE_VERSION_KEY, AggregateEvent,
};
pub use event::{DomainEvent, NamedEvent};
pub use payload::{Payload, downcast_payload};
