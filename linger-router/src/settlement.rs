//! 结算句柄（Settlement）
//!
//! 一次性结算的可观察结果：`Pending → Resolved | Rejected`，结算后不可再变。
//! 监听器的主结果、每次回调调用以及滞留事件都通过它向外暴露结果。
//!
//! 基于 `tokio::sync::watch` 实现：发送端由句柄自身持有，任意克隆都可以等待或查看结果。
//!
use crate::error::EventError;
use futures_core::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::sync::watch;

/// 结算结果
pub type Outcome = Result<Value, EventError>;

/// 结算状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementState {
    Pending,
    Resolved,
    Rejected,
}

/// 一次性结算句柄，克隆共享同一结果
#[derive(Clone)]
pub struct Settlement {
    cell: Arc<watch::Sender<Option<Outcome>>>,
}

impl Default for Settlement {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Settlement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settlement")
            .field("state", &self.state())
            .finish()
    }
}

impl Settlement {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { cell: Arc::new(tx) }
    }

    /// 创建一个已结算的句柄
    pub fn settled(outcome: Outcome) -> Self {
        let settlement = Self::new();
        settlement.settle(outcome);
        settlement
    }

    /// 结算；已结算时忽略并返回 false
    pub fn settle(&self, outcome: Outcome) -> bool {
        let mut slot = Some(outcome);
        self.cell.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = slot.take();
            true
        })
    }

    pub fn resolve(&self, value: Value) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, err: EventError) -> bool {
        self.settle(Err(err))
    }

    pub fn state(&self) -> SettlementState {
        match &*self.cell.borrow() {
            None => SettlementState::Pending,
            Some(Ok(_)) => SettlementState::Resolved,
            Some(Err(_)) => SettlementState::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == SettlementState::Pending
    }

    /// 当前结果（未结算时为 None）
    pub fn outcome(&self) -> Option<Outcome> {
        self.cell.borrow().clone()
    }

    /// 等待结算
    pub async fn wait(&self) -> Outcome {
        let mut rx = self.cell.subscribe();
        loop {
            let seen = rx.borrow_and_update().clone();
            if let Some(outcome) = seen {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return Err(EventError::Abandoned);
            }
        }
    }

    /// 两个句柄是否指向同一结算
    pub fn same(&self, other: &Settlement) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl IntoFuture for Settlement {
    type Output = Outcome;
    type IntoFuture = BoxFuture<'static, Outcome>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn settles_only_once() {
        let s = Settlement::new();
        assert_eq!(s.state(), SettlementState::Pending);
        assert!(s.resolve(json!(1)));
        assert!(!s.resolve(json!(2)));
        assert!(!s.reject(EventError::Abandoned));
        assert_eq!(s.state(), SettlementState::Resolved);
        assert_eq!(s.outcome(), Some(Ok(json!(1))));
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_observe_late_settlement() {
        let s = Settlement::new();
        let waiter = tokio::spawn({
            let s = s.clone();
            async move { s.await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        s.reject(EventError::Unconsumed {
            event_name: "x".into(),
        });

        let outcome = waiter.await.unwrap();
        assert!(matches!(outcome, Err(EventError::Unconsumed { .. })));
    }

    #[tokio::test]
    async fn settled_handle_is_ready() {
        let s = Settlement::settled(Ok(json!("done")));
        assert_eq!(s.clone().await, Ok(json!("done")));
        assert!(s.same(&s.clone()));
        assert!(!s.same(&Settlement::new()));
    }
}
