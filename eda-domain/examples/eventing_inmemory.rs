/// 进程内事件分发示例
/// 聚合产生事件 -> 分发器按事件名路由 -> 处理器失败统一返回
use anyhow::{Result as AnyResult, bail};
use eda_domain::aggregate::{Aggregate, AggregateBase};
use eda_domain::domain_event::AggregateEvent;
use eda_domain::eventing::{EventDispatcher, HandledEventType, HandlerContext, handler_fn};

#[derive(Debug, Clone)]
struct StoreCreated {
    name: String,
}

#[derive(Debug, Clone)]
struct StoreRebranded {
    name: String,
}

struct Store {
    base: AggregateBase,
    name: String,
}

impl Aggregate for Store {
    const NAME: &'static str = "stores.Store";

    fn base(&self) -> &AggregateBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut AggregateBase {
        &mut self.base
    }
}

impl Store {
    fn create(id: &str, name: &str) -> AnyResult<Self> {
        let mut store = Self {
            base: AggregateBase::new(id, Self::NAME),
            name: name.to_string(),
        };
        store.base.add_event(
            "stores.StoreCreated",
            StoreCreated {
                name: name.to_string(),
            },
        )?;
        Ok(store)
    }

    fn rebrand(&mut self, name: &str) -> AnyResult<()> {
        self.name = name.to_string();
        self.base.add_event(
            "stores.StoreRebranded",
            StoreRebranded {
                name: name.to_string(),
            },
        )?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    let dispatcher: EventDispatcher<AggregateEvent> = EventDispatcher::new();

    dispatcher.subscribe(
        "stores.StoreCreated",
        handler_fn("catalog", |_ctx, event: AggregateEvent| async move {
            let created = event.payload_as::<StoreCreated>()?;
            println!("[catalog] new store {} ({})", created.name, event.aggregate_id());
            Ok(())
        }),
    );

    dispatcher.subscribe(
        "stores.StoreRebranded",
        handler_fn("search-index", |_ctx, event: AggregateEvent| async move {
            let rebranded = event.payload_as::<StoreRebranded>()?;
            if rebranded.name.is_empty() {
                bail!("store name must not be empty");
            }
            println!("[search-index] reindex as {}", rebranded.name);
            Ok(())
        }),
    );

    dispatcher.subscribe(
        HandledEventType::All,
        handler_fn("audit", |_ctx, event: AggregateEvent| async move {
            println!(
                "[audit] {} v{} {}",
                event.aggregate_name(),
                event.aggregate_version(),
                event.id()
            );
            Ok(())
        }),
    );

    let mut store = Store::create("store-1", "Corner Shop")?;
    store.rebrand("Corner Market")?;
    store.rebrand("")?;

    let ctx = HandlerContext::new();
    if let Err(err) = dispatcher.publish(&ctx, &store.take_events()).await {
        for failure in err.handler_failures() {
            println!("[failed] {failure}");
        }
    }

    println!("final name: {:?}, version: {}", store.name, store.version());
    Ok(())
}
