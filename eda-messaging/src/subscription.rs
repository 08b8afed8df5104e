//! 订阅生命周期（Subscription）
//!
//! 每个 `Subscription` 独占一个传输层订阅资源，状态机为
//! `Active → Draining → Closed`：
//! - `unsubscribe` 把 `Active` 切换为 `Draining`，立即停止新的投递；
//! - 已交给处理器的消息继续处理完毕，在途数归零时进入 `Closed`；
//! - 在 `Draining` / `Closed` 状态下再次退订是无副作用的成功；
//! - 退订不阻塞，可以在处理器内部（包括错误恢复路径）调用。
//!
use crate::error::{MessagingError, MessagingResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubscriptionState {
    Active,
    Draining,
    Closed,
}

impl SubscriptionState {
    fn from_u8(value: u8) -> Self {
        match value {
            ACTIVE => SubscriptionState::Active,
            DRAINING => SubscriptionState::Draining,
            _ => SubscriptionState::Closed,
        }
    }
}

const ACTIVE: u8 = 0;
const DRAINING: u8 = 1;
const CLOSED: u8 = 2;

/// 订阅统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// 交给处理器的次数（含重投）
    pub delivered: u64,
    /// 处理失败或超时的次数
    pub failed: u64,
    /// 当前在途数
    pub in_flight: usize,
}

/// 订阅状态机，由订阅句柄与传输工作任务共享
///
/// 传输在每次调用处理器前后分别调用 `begin_delivery` / `end_delivery`。
pub struct SubscriptionLifecycle {
    state: AtomicU8,
    in_flight: AtomicUsize,
    delivered: AtomicU64,
    failed: AtomicU64,
    watch: watch::Sender<SubscriptionState>,
}

impl Default for SubscriptionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionLifecycle {
    pub fn new() -> Self {
        let (watch, _) = watch::channel(SubscriptionState::Active);
        Self {
            state: AtomicU8::new(ACTIVE),
            in_flight: AtomicUsize::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            watch,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        SubscriptionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::SeqCst) == ACTIVE
    }

    /// 登记一次投递；非 `Active` 时返回 `false`，调用方不得再调用处理器
    pub fn begin_delivery(&self) -> bool {
        // 先登记在途再检查状态，与 `start_draining` 的“先改状态再检查在途”配对
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.state.load(Ordering::SeqCst) != ACTIVE {
            self.end_delivery();
            return false;
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// 结束一次投递；排空中的最后一次投递负责关闭
    pub fn end_delivery(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.state.load(Ordering::SeqCst) == DRAINING {
            self.try_close();
        }
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// `Active → Draining`；只有第一次调用返回 `true`
    pub fn start_draining(&self) -> bool {
        if self
            .state
            .compare_exchange(ACTIVE, DRAINING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        self.publish(SubscriptionState::Draining);
        if self.in_flight.load(Ordering::SeqCst) == 0 {
            self.try_close();
        }
        true
    }

    /// 等待进入 `Closed`
    pub async fn drained(&self) {
        let mut rx = self.watch.subscribe();
        // 发送端由自身持有，等待不会因通道关闭而提前返回
        let _ = rx.wait_for(|s| *s == SubscriptionState::Closed).await;
    }

    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::SeqCst),
        }
    }

    fn try_close(&self) {
        if self
            .state
            .compare_exchange(DRAINING, CLOSED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.publish(SubscriptionState::Closed);
        }
    }

    fn publish(&self, next: SubscriptionState) {
        // 状态只会前进，乱序到达的旧状态直接丢弃
        self.watch.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
    }
}

/// 传输层订阅资源
pub trait SubscriptionHandle: Send + Sync {
    /// 资源是否仍然有效
    fn is_valid(&self) -> bool;

    /// 停止接收新消息并释放资源；不等待在途处理
    fn drain(&self);
}

/// 订阅句柄，可自由克隆；所有克隆共享同一个生命周期
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    topic: String,
    group: Option<String>,
    lifecycle: Arc<SubscriptionLifecycle>,
    handle: Arc<dyn SubscriptionHandle>,
}

impl Subscription {
    pub fn new(
        topic: impl Into<String>,
        group: Option<String>,
        lifecycle: Arc<SubscriptionLifecycle>,
        handle: Arc<dyn SubscriptionHandle>,
    ) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                topic: topic.into(),
                group,
                lifecycle,
                handle,
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn group(&self) -> Option<&str> {
        self.inner.group.as_deref()
    }

    pub fn state(&self) -> SubscriptionState {
        self.inner.lifecycle.state()
    }

    /// 退订（幂等）
    ///
    /// 资源已失效或已在排空/关闭时直接返回成功。
    pub fn unsubscribe(&self) -> MessagingResult<()> {
        if !self.inner.lifecycle.start_draining() {
            return Ok(());
        }

        if self.inner.handle.is_valid() {
            self.inner.handle.drain();
        }

        tracing::debug!(
            topic = %self.inner.topic,
            group = ?self.inner.group,
            state = ?self.state(),
            "subscription draining"
        );
        Ok(())
    }

    pub(crate) fn lifecycle(&self) -> &Arc<SubscriptionLifecycle> {
        &self.inner.lifecycle
    }

    /// 等待全部在途投递结束
    pub async fn drained(&self) {
        self.inner.lifecycle.drained().await
    }

    /// 订阅统计；已关闭的订阅返回 `SubscriptionInvalid`
    pub fn stats(&self) -> MessagingResult<SubscriptionStats> {
        if self.state() == SubscriptionState::Closed {
            return Err(MessagingError::SubscriptionInvalid {
                topic: self.inner.topic.clone(),
            });
        }
        Ok(self.inner.lifecycle.stats())
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.inner.topic)
            .field("group", &self.inner.group)
            .field("state", &self.state())
            .finish()
    }
}
