use anyhow::Context;
use eda_domain::aggregate::{Aggregate, AggregateBase};
use eda_domain::command::Command;
use eda_domain::entity::Entity;
use eda_domain::eventing::{EventDispatcher, HandlerContext, handler_fn};
use eda_domain::reply::Reply;
use eda_macros::{entity, registrable};
use eda_messaging::MessagingError;
use eda_messaging::command_stream::{
    CommandMessage, CommandRejection, command_handler, command_handler_fn,
};
use eda_messaging::config::AppConfig;
use eda_messaging::event_stream::{EventMessage, EventPublisher, event_handler};
use eda_messaging::inbox::{InMemoryInbox, inbox};
use eda_messaging::middleware::{logging, with_middleware};
use eda_messaging::registry::{BuildOption, Registry};
use eda_messaging::reply_stream::ReplyPublisher;
use eda_messaging::requester::{Requester, RequesterConfig};
use eda_messaging::stream::{InMemoryStream, MessageStream};
use eda_messaging::subscriber_config::SubscriberConfig;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const ORDERS_TOPIC: &str = "ordering.events";
const PAYMENTS_TOPIC: &str = "payments.commands";
const ORDERS_REPLIES: &str = "ordering.replies";

#[entity]
#[derive(Clone)]
struct Customer {
    name: String,
    credit_limit: f64,
}

#[registrable(key = "ordering.OrderCreated")]
#[derive(Debug, Default)]
struct OrderCreated {
    customer_id: String,
    total: f64,
}

#[registrable(key = "payments.AuthorizePayment")]
#[derive(Debug, Default)]
struct AuthorizePayment {
    order_id: String,
    customer_id: String,
    amount: f64,
}

#[registrable(key = "payments.PaymentAuthorized")]
#[derive(Debug, Default)]
struct PaymentAuthorized {
    payment_id: String,
}

#[registrable(key = "payments.PaymentDeclined")]
#[derive(Debug, Default)]
struct PaymentDeclined {
    reason: String,
}

struct Order {
    base: AggregateBase,
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

impl Order {
    fn create(id: &str, customer: &Customer, total: f64) -> anyhow::Result<Self> {
        let mut order = Order {
            base: AggregateBase::new(id, Self::NAME),
        };
        order.base.add_event(
            OrderCreated::KEY,
            OrderCreated {
                customer_id: customer.id().clone(),
                total,
            },
        )?;
        Ok(order)
    }
}

fn registry() -> anyhow::Result<Arc<Registry>> {
    let mut registry = Registry::new();
    registry.register(OrderCreated::default(), [])?;
    registry.register(
        AuthorizePayment::default(),
        [BuildOption::validate(|cmd: &AuthorizePayment| {
            if cmd.amount < 0.0 {
                return Err(format!("negative amount {}", cmd.amount));
            }
            Ok(())
        })],
    )?;
    registry.register(PaymentAuthorized::default(), [])?;
    registry.register(PaymentDeclined::default(), [])?;
    Ok(Arc::new(registry))
}

async fn authorize(_ctx: HandlerContext, cmd: CommandMessage) -> anyhow::Result<Option<Reply>> {
    let request = cmd.payload_as::<AuthorizePayment>()?;
    if request.amount > 500.0 {
        let declined = PaymentDeclined {
            reason: "insufficient_funds".into(),
        };
        return Err(CommandRejection::with_reply(
            format!("order {} over limit", request.order_id),
            Reply::new(PaymentDeclined::KEY, declined)?,
        )
        .into());
    }

    let authorized = PaymentAuthorized {
        payment_id: format!("pay-{}", request.order_id),
    };
    Ok(Some(Reply::new(PaymentAuthorized::KEY, authorized)?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_directive())),
        )
        .init();

    tracing::info!(
        environment = config.environment(),
        address = %config.rpc().address(),
        stream = config.nats().stream(),
        "starting demo"
    );

    let registry = registry()?;
    let stream: Arc<dyn MessageStream> = Arc::new(InMemoryStream::new());

    // 支付服务：处理授权命令并应答
    stream
        .subscribe(
            PAYMENTS_TOPIC,
            with_middleware(
                command_handler(
                    registry.clone(),
                    ReplyPublisher::new(registry.clone(), stream.clone()),
                    command_handler_fn(authorize),
                ),
                &[logging(), inbox(Arc::new(InMemoryInbox::new()))],
            ),
            SubscriberConfig::builder().group_name("payments").build(),
        )
        .await?;

    // 通知服务：消费订单事件
    let notifications: Arc<EventDispatcher<EventMessage>> = Arc::new(EventDispatcher::new());
    notifications.subscribe(
        OrderCreated::KEY,
        handler_fn("notify-customer", |_ctx, msg: EventMessage| async move {
            let created = msg.payload_as::<OrderCreated>()?;
            tracing::info!(
                customer_id = %created.customer_id,
                total = created.total,
                "order created notification sent"
            );
            Ok::<_, anyhow::Error>(())
        }),
    );
    stream
        .subscribe(
            ORDERS_TOPIC,
            event_handler(registry.clone(), notifications),
            SubscriberConfig::builder()
                .message_filter(vec![OrderCreated::KEY.to_string()])
                .build(),
        )
        .await?;

    // 订单服务：创建订单、发布事件、请求支付
    let requester = Requester::connect(
        registry.clone(),
        stream.clone(),
        RequesterConfig::builder()
            .reply_channel(ORDERS_REPLIES)
            .timeout(config.request_timeout())
            .build(),
    )
    .await?;
    let events = EventPublisher::new(registry.clone(), stream.clone());
    let ctx = HandlerContext::new();

    let customer = Customer {
        name: "Ada".into(),
        credit_limit: 500.0,
        ..Customer::new("customer-1".to_string())
    };
    tracing::info!(customer = ?customer, limit = customer.credit_limit, "customer loaded");

    for (order_id, total) in [("order-1", 120.0), ("order-2", 980.0)] {
        let mut order = Order::create(order_id, &customer, total)?;
        events.publish_all(&ctx, ORDERS_TOPIC, &order.take_events()).await?;

        let command = Command::new(
            AuthorizePayment::KEY,
            AuthorizePayment {
                order_id: order_id.into(),
                customer_id: customer.id().clone(),
                amount: total,
            },
        )?;

        match requester.request(&ctx, PAYMENTS_TOPIC, command).await {
            Ok(reply) => {
                let authorized = reply.payload_as::<PaymentAuthorized>()?;
                tracing::info!(order_id, payment_id = %authorized.payment_id, "payment authorized");
            }
            Err(MessagingError::ReplyFailed(reply)) => {
                let declined = reply.payload_as::<PaymentDeclined>()?;
                tracing::warn!(order_id, reason = %declined.reason, "payment declined");
            }
            Err(err) => return Err(err.into()),
        }
    }

    requester.unsubscribe()?;
    tokio::time::timeout(config.shutdown_timeout(), stream.unsubscribe())
        .await
        .context("shutdown timed out")??;
    tracing::info!(name = %customer.name, "demo finished");
    Ok(())
}
