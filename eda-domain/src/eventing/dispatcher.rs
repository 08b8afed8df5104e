//! 事件分发器（EventDispatcher）
//!
//! 按事件名把事件路由给零个或多个处理器：
//! - 订阅返回 `HandlerKey`，可随时退订；
//! - 同一事件的多个处理器并发执行（并发度受配置约束），互不影响；
//! - 事件按发布顺序逐个分发，保证每个处理器的接收顺序与发布顺序一致；
//! - 所有失败在分发结束后统一返回，分发器本身不吞掉任何错误。
//!
use super::context::HandlerContext;
use super::handler::{EventHandler, HandledEventType};
use crate::domain_event::NamedEvent;
use crate::error::{DomainError, DomainResult, HandlerFailure};
use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// 订阅凭据，用于退订
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerKey(u64);

/// 分发器配置
#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    /// 单事件的处理并发（同一事件广播给多个 handler）
    pub handler_concurrency: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            handler_concurrency: 8,
        }
    }
}

struct Registration<E> {
    key: HandlerKey,
    handler: Arc<dyn EventHandler<E>>,
}

impl<E> Clone for Registration<E> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            handler: self.handler.clone(),
        }
    }
}

struct HandlerRegistry<E> {
    by_name: HashMap<String, Vec<Registration<E>>>,
    all: Vec<Registration<E>>,
}

impl<E> Default for HandlerRegistry<E> {
    fn default() -> Self {
        Self {
            by_name: HashMap::new(),
            all: Vec::new(),
        }
    }
}

impl<E> HandlerRegistry<E> {
    fn insert(&mut self, handled: HandledEventType, registration: Registration<E>) {
        match handled {
            HandledEventType::All => self.all.push(registration),
            HandledEventType::One(name) => {
                self.by_name.entry(name).or_default().push(registration);
            }
            HandledEventType::Many(mut names) => {
                names.sort();
                names.dedup();
                for name in names {
                    self.by_name
                        .entry(name)
                        .or_default()
                        .push(registration.clone());
                }
            }
        }
    }

    fn remove(&mut self, key: HandlerKey) -> bool {
        let before = self.all.len();
        self.all.retain(|r| r.key != key);
        let mut removed = before != self.all.len();

        self.by_name.retain(|_, list| {
            let before = list.len();
            list.retain(|r| r.key != key);
            removed |= before != list.len();
            !list.is_empty()
        });

        removed
    }

    fn matching(&self, event_name: &str) -> Vec<Arc<dyn EventHandler<E>>> {
        let mut merged: Vec<Arc<dyn EventHandler<E>>> = Vec::new();
        if let Some(list) = self.by_name.get(event_name) {
            merged.extend(list.iter().map(|r| r.handler.clone()));
        }
        merged.extend(self.all.iter().map(|r| r.handler.clone()));
        merged
    }
}

/// 进程内事件分发器
pub struct EventDispatcher<E> {
    registry: RwLock<HandlerRegistry<E>>,
    next_key: AtomicU64,
    config: DispatcherConfig,
}

impl<E> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self::with_config(DispatcherConfig::default())
    }
}

impl<E> EventDispatcher<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            registry: RwLock::new(HandlerRegistry::default()),
            next_key: AtomicU64::new(1),
            config: DispatcherConfig {
                handler_concurrency: config.handler_concurrency.max(1),
            },
        }
    }

    /// 订阅事件名；同一事件名可以有多个处理器
    pub fn subscribe(
        &self,
        handled: impl Into<HandledEventType>,
        handler: Arc<dyn EventHandler<E>>,
    ) -> HandlerKey {
        let key = HandlerKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        let handled = handled.into();

        tracing::debug!(
            handler = handler.handler_name(),
            handled = ?handled,
            "event handler subscribed"
        );

        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handled, Registration { key, handler });

        key
    }

    /// 退订；返回是否确实移除了处理器，重复退订返回 `false`
    pub fn unsubscribe(&self, key: HandlerKey) -> bool {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// 当前订阅了该事件名的处理器（含订阅全部事件的处理器）
    pub fn handlers_for(&self, event_name: &str) -> Vec<Arc<dyn EventHandler<E>>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .matching(event_name)
    }
}

impl<E> EventDispatcher<E>
where
    E: NamedEvent,
{
    /// 按顺序分发一批事件
    ///
    /// 前一个事件的全部处理器完成后才分发下一个事件。
    pub async fn publish(&self, ctx: &HandlerContext, events: &[E]) -> DomainResult<()> {
        let mut failures = Vec::new();

        for event in events {
            failures.extend(self.dispatch(ctx, event).await);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Dispatch { failures })
        }
    }

    pub async fn publish_one(&self, ctx: &HandlerContext, event: &E) -> DomainResult<()> {
        self.publish(ctx, std::slice::from_ref(event)).await
    }

    async fn dispatch(&self, ctx: &HandlerContext, event: &E) -> Vec<HandlerFailure> {
        let handlers = self.handlers_for(event.event_name());
        if handlers.is_empty() {
            tracing::trace!(event = event.event_name(), "no handler subscribed");
            return Vec::new();
        }

        let pending: Vec<_> = handlers
            .into_iter()
            .map(|handler| Self::run_handler(handler, ctx, event))
            .collect();
        let results: Vec<Option<HandlerFailure>> = stream::iter(pending)
            .buffer_unordered(self.config.handler_concurrency)
            .collect()
            .await;

        let failures: Vec<HandlerFailure> = results.into_iter().flatten().collect();
        for failure in &failures {
            tracing::warn!(
                handler = %failure.handler,
                event = %failure.event,
                reason = %failure.reason,
                "event handler failed"
            );
        }
        failures
    }

    async fn run_handler(
        handler: Arc<dyn EventHandler<E>>,
        ctx: &HandlerContext,
        event: &E,
    ) -> Option<HandlerFailure> {
        match handler.handle(ctx, event).await {
            Ok(()) => None,
            Err(err) => Some(HandlerFailure {
                handler: handler.handler_name().to_string(),
                event: event.event_name().to_string(),
                reason: format!("{err:#}"),
            }),
        }
    }
}

#[async_trait]
impl<E> EventHandler<E> for EventDispatcher<E>
where
    E: NamedEvent + 'static,
{
    fn handler_name(&self) -> &str {
        "event-dispatcher"
    }

    async fn handle(&self, ctx: &HandlerContext, event: &E) -> anyhow::Result<()> {
        self.publish_one(ctx, event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_event::DomainEvent;
    use crate::eventing::handler_fn;
    use anyhow::anyhow;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Recorder {
        name: String,
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn named(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventHandler<DomainEvent> for Recorder {
        fn handler_name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, _ctx: &HandlerContext, event: &DomainEvent) -> anyhow::Result<()> {
            let seq = event.payload_as::<u32>()?;
            // 让较早的事件睡得更久，检验顺序不依赖处理耗时
            tokio::time::sleep(Duration::from_millis(u64::from(10 - (*seq % 10)))).await;
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}#{}", event.event_name(), seq));
            Ok(())
        }
    }

    fn event(name: &str, seq: u32) -> DomainEvent {
        DomainEvent::new(name, seq).unwrap()
    }

    #[tokio::test]
    async fn routes_by_event_name() {
        let dispatcher: EventDispatcher<DomainEvent> = EventDispatcher::new();
        let created = Recorder::named("created");
        let everything = Recorder::named("everything");
        let both = Recorder::named("both");

        dispatcher.subscribe("OrderCreated", created.clone());
        dispatcher.subscribe(HandledEventType::All, everything.clone());
        dispatcher.subscribe(
            vec!["OrderCreated", "OrderShipped", "OrderCreated"],
            both.clone(),
        );

        let events = vec![
            event("OrderCreated", 1),
            event("OrderShipped", 2),
            event("OrderCancelled", 3),
        ];
        dispatcher
            .publish(&HandlerContext::new(), &events)
            .await
            .unwrap();

        assert_eq!(created.seen(), vec!["OrderCreated#1"]);
        assert_eq!(both.seen(), vec!["OrderCreated#1", "OrderShipped#2"]);
        assert_eq!(everything.seen().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn per_handler_order_matches_publish_order() {
        let dispatcher: EventDispatcher<DomainEvent> = EventDispatcher::new();
        let a = Recorder::named("a");
        let b = Recorder::named("b");
        dispatcher.subscribe("Tick", a.clone());
        dispatcher.subscribe("Tick", b.clone());

        let events: Vec<DomainEvent> = (0..8).map(|i| event("Tick", i)).collect();
        dispatcher
            .publish(&HandlerContext::new(), &events)
            .await
            .unwrap();

        let expected: Vec<String> = (0..8).map(|i| format!("Tick#{i}")).collect();
        assert_eq!(a.seen(), expected);
        assert_eq!(b.seen(), expected);
    }

    #[tokio::test]
    async fn failure_does_not_stop_other_handlers() {
        let dispatcher: EventDispatcher<DomainEvent> = EventDispatcher::new();
        let ok = Recorder::named("ok");
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = calls.clone();

        dispatcher.subscribe(
            "OrderCreated",
            handler_fn("broken", move |_ctx, _event: DomainEvent| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow!("database unavailable"))
                }
            }),
        );
        dispatcher.subscribe("OrderCreated", ok.clone());

        let err = dispatcher
            .publish(
                &HandlerContext::new(),
                &[event("OrderCreated", 1), event("OrderCreated", 2)],
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(ok.seen().len(), 2);

        let failures = err.handler_failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].handler, "broken");
        assert_eq!(failures[0].event, "OrderCreated");
        assert!(failures[0].reason.contains("database unavailable"));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let dispatcher: EventDispatcher<DomainEvent> = EventDispatcher::new();
        let rec = Recorder::named("rec");
        let key = dispatcher.subscribe(vec!["A", "B"], rec.clone());

        dispatcher
            .publish_one(&HandlerContext::new(), &event("A", 1))
            .await
            .unwrap();
        assert!(dispatcher.unsubscribe(key));
        assert!(!dispatcher.unsubscribe(key));
        assert!(dispatcher.handlers_for("B").is_empty());

        dispatcher
            .publish_one(&HandlerContext::new(), &event("B", 2))
            .await
            .unwrap();
        assert_eq!(rec.seen(), vec!["A#1"]);
    }

    #[tokio::test]
    async fn dispatcher_nests_as_handler() {
        let inner = Arc::new(EventDispatcher::<DomainEvent>::new());
        let rec = Recorder::named("rec");
        inner.subscribe("Nested", rec.clone());

        let outer: EventDispatcher<DomainEvent> = EventDispatcher::new();
        outer.subscribe(HandledEventType::All, inner);

        outer
            .publish_one(&HandlerContext::new(), &event("Nested", 7))
            .await
            .unwrap();
        assert_eq!(rec.seen(), vec!["Nested#7"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dispatcher_runs_on_spawned_tasks() {
        let dispatcher = Arc::new(EventDispatcher::<DomainEvent>::new());
        let a = Recorder::named("a");
        let b = Recorder::named("b");
        dispatcher.subscribe("Spawned", a.clone());
        dispatcher.subscribe("Spawned", b.clone());

        let handler: Arc<dyn EventHandler<DomainEvent>> = dispatcher;
        let task = tokio::spawn(async move {
            handler
                .handle(&HandlerContext::new(), &event("Spawned", 3))
                .await
        });
        task.await.unwrap().unwrap();

        assert_eq!(a.seen(), vec!["Spawned#3"]);
        assert_eq!(b.seen(), vec!["Spawned#3"]);
    }

    #[tokio::test]
    async fn handler_observes_context_cancellation() {
        let dispatcher: EventDispatcher<DomainEvent> = EventDispatcher::new();
        dispatcher.subscribe(
            "Slow",
            handler_fn("slow", |ctx: HandlerContext, _event: DomainEvent| async move {
                tokio::select! {
                    _ = ctx.cancelled() => Err(anyhow!("cancelled")),
                    _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(()),
                }
            }),
        );

        let ctx = HandlerContext::new();
        ctx.cancellation().cancel();
        let err = dispatcher
            .publish_one(&ctx, &event("Slow", 1))
            .await
            .unwrap_err();
        assert_eq!(err.handler_failures()[0].reason, "cancelled");
    }
}
