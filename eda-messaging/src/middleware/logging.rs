use super::{Middleware, middleware_fn};
use crate::message::{IncomingMessage, MessageHandler};
use async_trait::async_trait;
use eda_domain::eventing::HandlerContext;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// 记录每条消息的处理耗时与结果
pub fn logging() -> Middleware {
    middleware_fn(|next| Arc::new(LoggingHandler { next }))
}

struct LoggingHandler {
    next: Arc<dyn MessageHandler>,
}

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle_message(
        &self,
        ctx: &HandlerContext,
        msg: &IncomingMessage,
    ) -> anyhow::Result<()> {
        let span = tracing::info_span!(
            "handle_message",
            subject = msg.subject(),
            name = msg.name(),
            id = msg.id(),
            delivery = msg.delivery(),
        );

        async {
            let started = Instant::now();
            tracing::debug!("message received");

            let result = self.next.handle_message(ctx, msg).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(()) => tracing::debug!(elapsed_ms, "message handled"),
                Err(err) => tracing::warn!(elapsed_ms, error = %format!("{err:#}"), "message handling failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}
