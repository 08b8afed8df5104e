use bon::Builder;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 处理器上下文
///
/// 分发层本身不设超时：取消与截止时间都通过上下文传递给处理器，
/// 由处理器在阻塞于下游 I/O 时自行观察。
#[derive(Builder, Clone, Debug, Default)]
pub struct HandlerContext {
    /// 取消信号
    #[builder(default)]
    cancellation: CancellationToken,
    /// 截止时间（通常等于传输层的确认期限）
    deadline: Option<Instant>,
    /// 关联ID
    correlation_id: Option<String>,
    /// 因果ID
    causation_id: Option<String>,
}

impl HandlerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// 等待取消信号
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 距截止时间的剩余时长；已过期返回 `Duration::ZERO`
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    /// 派生子上下文：父级取消会传播到子级，反之不会
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            ..self.clone()
        }
    }

    /// 收紧截止时间（取较早者）
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    pub fn with_correlation(
        mut self,
        correlation_id: Option<String>,
        causation_id: Option<String>,
    ) -> Self {
        self.correlation_id = correlation_id.or(self.correlation_id);
        self.causation_id = causation_id.or(self.causation_id);
        self
    }
}
