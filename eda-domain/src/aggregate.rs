//! 聚合（Aggregate）抽象
//!
//! 聚合是一致性边界，也是带版本领域事件的来源：
//! - `AggregateBase` 嵌入具体聚合，负责标识、版本号与待发布事件；
//! - 同一聚合实例上产生的事件版本号严格递增且连续（单写者视角）；
//! - `Aggregate` trait 让基础设施统一取出待发布事件。
//!
use crate::domain_event::{AggregateEvent, DomainEvent};
use crate::error::DomainResult;
use crate::metadata::Metadata;
use std::any::Any;

/// 聚合基底：标识、类型名、版本与待发布事件
#[derive(Debug, Clone)]
pub struct AggregateBase {
    id: String,
    name: String,
    version: usize,
    events: Vec<AggregateEvent>,
}

impl AggregateBase {
    /// 创建新聚合（版本号为 0）
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_version(id, name, 0)
    }

    /// 以已知版本号重建聚合（例如从存储加载后）
    pub fn with_version(id: impl Into<String>, name: impl Into<String>, version: usize) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version,
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前版本（包含尚未发布的事件）
    pub fn version(&self) -> usize {
        self.version
    }

    /// 产生一个新事件，版本号为当前版本 + 1
    pub fn add_event<P>(&mut self, name: &str, payload: P) -> DomainResult<&AggregateEvent>
    where
        P: Any + Send + Sync,
    {
        self.add_event_with(name, payload, Metadata::new())
    }

    /// 产生一个附带额外元数据的新事件
    pub fn add_event_with<P>(
        &mut self,
        name: &str,
        payload: P,
        metadata: Metadata,
    ) -> DomainResult<&AggregateEvent>
    where
        P: Any + Send + Sync,
    {
        let event = DomainEvent::new(name, payload)?.with_metadata(metadata);
        let next = self.version + 1;

        self.events
            .push(AggregateEvent::new(event, &self.id, &self.name, next));
        self.version = next;

        Ok(&self.events[self.events.len() - 1])
    }

    /// 待发布事件（按产生顺序）
    pub fn events(&self) -> &[AggregateEvent] {
        &self.events
    }

    /// 取出并清空待发布事件
    pub fn take_events(&mut self) -> Vec<AggregateEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }
}

/// 聚合接口：暴露嵌入的 `AggregateBase`
pub trait Aggregate: Send + Sync {
    /// 聚合类型名（稳定字符串，不随重构变化）
    const NAME: &'static str;

    fn base(&self) -> &AggregateBase;

    fn base_mut(&mut self) -> &mut AggregateBase;

    fn aggregate_id(&self) -> &str {
        self.base().id()
    }

    fn version(&self) -> usize {
        self.base().version()
    }

    /// 取出待发布事件，交给分发器或事件发布器
    fn take_events(&mut self) -> Vec<AggregateEvent> {
        self.base_mut().take_events()
    }
}

#[cfg(test)]
mod tests {
    use super::{Aggregate, AggregateBase};
    use crate::domain_event::{AGGREGATE_NAME_KEY, NamedEvent};
    use crate::error::DomainError;
    use crate::metadata::Metadata;

    #[derive(Debug, Clone, PartialEq)]
    struct OrderCreated {
        customer_id: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct OrderCompleted;

    struct Order {
        base: AggregateBase,
        completed: bool,
    }

    impl Order {
        fn create(id: &str, customer_id: &str) -> Result<Self, DomainError> {
            let mut order = Order {
                base: AggregateBase::new(id, Self::NAME),
                completed: false,
            };
            order.base.add_event(
                "ordering.OrderCreated",
                OrderCreated {
                    customer_id: customer_id.into(),
                },
            )?;
            Ok(order)
        }

        fn complete(&mut self) -> Result<(), DomainError> {
            self.completed = true;
            self.base
                .add_event_with(
                    "ordering.OrderCompleted",
                    OrderCompleted,
                    Metadata::new().with("reason", "picked-up"),
                )
                .map(|_| ())
        }
    }

    impl Aggregate for Order {
        const NAME: &'static str = "ordering.Order";

        fn base(&self) -> &AggregateBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut AggregateBase {
            &mut self.base
        }
    }

    #[test]
    fn versions_are_gapless_and_increasing() {
        let mut order = Order::create("o-1", "c-1").unwrap();
        order.complete().unwrap();
        order.complete().unwrap();

        assert!(order.completed);
        assert_eq!(order.version(), 3);
        let versions: Vec<usize> = order
            .base()
            .events()
            .iter()
            .map(|e| e.aggregate_version())
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);

        let events = order.take_events();
        assert_eq!(events.len(), 3);
        assert!(order.base().events().is_empty());
        assert_eq!(events[0].event_name(), "ordering.OrderCreated");
        assert_eq!(events[0].aggregate_id(), "o-1");
        assert_eq!(
            events[1].metadata().get_str(AGGREGATE_NAME_KEY),
            Some("ordering.Order")
        );
        assert_eq!(events[1].metadata().get_str("reason"), Some("picked-up"));

        // 清空后继续产生事件，版本号不回退
        order.complete().unwrap();
        assert_eq!(order.base().events()[0].aggregate_version(), 4);
    }

    #[test]
    fn loaded_aggregate_continues_from_version() {
        let mut base = AggregateBase::with_version("o-9", "ordering.Order", 7);
        let event = base.add_event("ordering.OrderCompleted", OrderCompleted).unwrap();
        assert_eq!(event.aggregate_version(), 8);
    }

    #[test]
    fn invalid_event_name_does_not_bump_version() {
        let mut base = AggregateBase::new("o-2", "ordering.Order");
        let err = base.add_event("", OrderCompleted).unwrap_err();
        assert!(matches!(err, DomainError::InvalidEvent { .. }));
        assert_eq!(base.version(), 0);
        assert!(base.events().is_empty());
    }
}
