//! 定时器注册表（TimerRegistry）
//!
//! 以键命名的延迟任务，支持：
//! - `schedule`：登记（同键已有任务时取消旧任务）；
//! - `reset`：以原延迟重新开始倒计时；
//! - `clear`：取消且不触发。
//!
//! 监听器超时与滞留事件衰减共用这一套设施。任务在 Tokio 运行时中执行，
//! 触发前会先从注册表中摘除自身，因此触发后的 `contains` 为 false。
//!
use crate::id::{EventId, ListenerId};
use dashmap::DashMap;
use futures_core::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 定时器允许的最长延迟（2^31 - 1 毫秒），"无限"滞留会被截断到该值
pub const MAX_DELAY: Duration = Duration::from_millis(2_147_483_647);

/// 定时器键
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// 监听器超时
    ListenerTimeout(ListenerId),
    /// 滞留事件衰减
    Decay(EventId),
}

/// 到期执行的任务；`reset` 时会再次调用，因此为 `Fn`
pub type TimerTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct TimerEntry {
    delay: Duration,
    task: TimerTask,
    token: CancellationToken,
    generation: u64,
}

/// 定时器注册表
#[derive(Clone, Default)]
pub struct TimerRegistry {
    timers: Arc<DashMap<TimerKey, TimerEntry>>,
    generation: Arc<AtomicU64>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记延迟任务，同键旧任务被取消
    pub fn schedule(&self, key: TimerKey, delay: Duration, task: TimerTask) {
        let delay = delay.min(MAX_DELAY);
        let token = CancellationToken::new();
        let generation = self.next_generation();

        let previous = self.timers.insert(
            key,
            TimerEntry {
                delay,
                task: task.clone(),
                token: token.clone(),
                generation,
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        self.spawn(key, delay, task, token, generation);
    }

    /// 重新开始倒计时；键不存在时返回 false
    pub fn reset(&self, key: &TimerKey) -> bool {
        let generation = self.next_generation();
        let restarted = {
            let Some(mut entry) = self.timers.get_mut(key) else {
                return false;
            };
            entry.token.cancel();
            entry.token = CancellationToken::new();
            entry.generation = generation;
            (entry.delay, entry.task.clone(), entry.token.clone())
        };

        let (delay, task, token) = restarted;
        self.spawn(*key, delay, task, token, generation);
        true
    }

    /// 取消且不触发；键不存在时返回 false
    pub fn clear(&self, key: &TimerKey) -> bool {
        match self.timers.remove(key) {
            Some((_, entry)) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &TimerKey) -> bool {
        self.timers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn spawn(
        &self,
        key: TimerKey,
        delay: Duration,
        task: TimerTask,
        token: CancellationToken,
        generation: u64,
    ) {
        let timers = self.timers.clone();
        let deadline = Instant::now() + delay;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    // 只有当前代的任务才会触发，reset 之后旧代自然失效
                    let due = timers
                        .remove_if(&key, |_, entry| entry.generation == generation)
                        .is_some();
                    if due {
                        task().await;
                    }
                }
            }
        });
    }
}
