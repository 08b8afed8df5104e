use eda_domain::command::Command;
use eda_domain::eventing::HandlerContext;
use eda_domain::reply::Reply;
use eda_messaging::MessagingError;
use eda_messaging::command_stream::{CommandRejection, command_handler, command_handler_fn};
use eda_messaging::middleware::{logging, with_middleware};
use eda_messaging::registry::Registry;
use eda_messaging::reply_stream::ReplyPublisher;
use eda_messaging::requester::{Requester, RequesterConfig};
use eda_messaging::stream::{InMemoryStream, MessageStream};
use eda_messaging::subscriber_config::SubscriberConfig;
use eda_messaging::subscription::SubscriptionState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct AuthorizePayment {
    customer_id: String,
    amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct PaymentAuthorized {
    payment_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct PaymentDeclined {
    reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ManualReview {
    queue: String,
}

fn client_registry() -> Arc<Registry> {
    let mut registry = Registry::new();
    registry
        .register_key("payments.AuthorizePayment", AuthorizePayment::default(), [])
        .unwrap();
    registry
        .register_key("payments.PaymentAuthorized", PaymentAuthorized::default(), [])
        .unwrap();
    registry
        .register_key("payments.PaymentDeclined", PaymentDeclined::default(), [])
        .unwrap();
    Arc::new(registry)
}

/// 服务端比客户端多注册了一个应答类型
fn server_registry() -> Arc<Registry> {
    let mut registry = Registry::new();
    registry
        .register_key("payments.AuthorizePayment", AuthorizePayment::default(), [])
        .unwrap();
    registry
        .register_key("payments.PaymentAuthorized", PaymentAuthorized::default(), [])
        .unwrap();
    registry
        .register_key("payments.PaymentDeclined", PaymentDeclined::default(), [])
        .unwrap();
    registry
        .register_key("payments.ManualReview", ManualReview::default(), [])
        .unwrap();
    Arc::new(registry)
}

async fn start_payments(stream: Arc<InMemoryStream>) {
    let registry = server_registry();
    let handler = command_handler_fn(|_ctx, cmd| async move {
        let request = cmd.payload_as::<AuthorizePayment>()?;
        if request.amount > 1_000.0 {
            return Ok::<_, anyhow::Error>(Some(Reply::new(
                "payments.ManualReview",
                ManualReview {
                    queue: "large".into(),
                },
            )?));
        }
        if request.amount > 100.0 {
            return Err(CommandRejection::with_reply(
                "declined",
                Reply::new(
                    "payments.PaymentDeclined",
                    PaymentDeclined {
                        reason: "insufficient_funds".into(),
                    },
                )?,
            )
            .into());
        }
        Ok(Some(Reply::new(
            "payments.PaymentAuthorized",
            PaymentAuthorized {
                payment_id: format!("pay-{}", request.customer_id),
            },
        )?))
    });

    stream
        .subscribe(
            "payments.commands",
            with_middleware(
                command_handler(
                    registry.clone(),
                    ReplyPublisher::new(registry, stream.clone()),
                    handler,
                ),
                &[logging()],
            ),
            SubscriberConfig::builder().group_name("payments").build(),
        )
        .await
        .unwrap();
}

async fn connect(stream: Arc<InMemoryStream>) -> Requester {
    Requester::connect(
        client_registry(),
        stream,
        RequesterConfig::builder()
            .reply_channel("orders.replies")
            .timeout(Duration::from_secs(2))
            .build(),
    )
    .await
    .unwrap()
}

fn authorize(amount: f64) -> Command {
    Command::new(
        "payments.AuthorizePayment",
        AuthorizePayment {
            customer_id: "c-7".into(),
            amount,
        },
    )
    .unwrap()
}

#[tokio::test]
async fn successful_request_returns_decoded_reply() {
    let stream = Arc::new(InMemoryStream::new());
    start_payments(stream.clone()).await;
    let requester = connect(stream).await;

    let reply = requester
        .request(&HandlerContext::new(), "payments.commands", authorize(25.0))
        .await
        .unwrap();

    assert!(reply.is_success());
    assert_eq!(reply.reply_name(), "payments.PaymentAuthorized");
    assert_eq!(
        reply.payload_as::<PaymentAuthorized>().unwrap().payment_id,
        "pay-c-7"
    );
}

#[tokio::test]
async fn declined_payment_is_an_error_carrying_the_reason() {
    let stream = Arc::new(InMemoryStream::new());
    start_payments(stream.clone()).await;
    let requester = connect(stream).await;

    let err = requester
        .request(&HandlerContext::new(), "payments.commands", authorize(250.0))
        .await
        .unwrap_err();

    let MessagingError::ReplyFailed(reply) = &err else {
        panic!("expected a failed reply, got {err}");
    };
    assert!(!reply.is_success());
    assert_eq!(reply.reply_name(), "payments.PaymentDeclined");
    assert_eq!(
        reply.payload_as::<PaymentDeclined>().unwrap().reason,
        "insufficient_funds"
    );
}

#[tokio::test]
async fn unknown_reply_name_fails_only_that_request() {
    let stream = Arc::new(InMemoryStream::new());
    start_payments(stream.clone()).await;
    let requester = connect(stream).await;
    let ctx = HandlerContext::new();

    let err = requester
        .request(&ctx, "payments.commands", authorize(5_000.0))
        .await
        .unwrap_err();
    assert!(err.is_unknown_type(), "{err}");
    assert_eq!(requester.subscription().state(), SubscriptionState::Active);

    let reply = requester
        .request(&ctx, "payments.commands", authorize(10.0))
        .await
        .unwrap();
    assert!(reply.is_success());
}
