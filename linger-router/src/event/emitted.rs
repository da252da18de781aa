//! 已发布事件（EmittedEvent）与事件句柄（EventHandle）
//!
//! 一次发布对应一个 `EmittedEvent`，分发过程中记录每个消费者的调用。
//! 事件结果规则：
//! - 无消费者：`null`，或在 `reject_unconsumed` 时以 `Unconsumed` 拒绝；
//! - 有消费者：按调用顺序取最后一个成功产出的载荷；全部失败时取最后一个拒绝原因；
//! - 所有调用都未结算：原始载荷。
//!
use super::options::EventSettings;
use crate::error::EventError;
use crate::hierarchy::NodeId;
use crate::id::{EventId, ListenerId, SubscriberId};
use crate::listener::Invocation;
use crate::settlement::{Outcome, Settlement, SettlementState};
use chrono::{DateTime, Utc};
use futures_core::future::BoxFuture;
use futures_util::future::join_all;
use serde_json::{Value, json};
use std::future::IntoFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// 消费记录
#[derive(Clone, Debug)]
pub struct Consumer {
    pub listener_id: ListenerId,
    pub subscriber: SubscriberId,
    pub invocation: Invocation,
}

impl Consumer {
    pub fn state(&self) -> SettlementState {
        self.invocation.settlement.state()
    }
}

#[derive(Debug)]
pub struct EmittedEvent {
    id: EventId,
    name: String,
    payload: Value,
    emitter: SubscriberId,
    origin: Option<NodeId>,
    level: u32,
    emitted_at: Instant,
    occurred_at: DateTime<Utc>,
    settings: EventSettings,
    consumers: Mutex<Vec<Consumer>>,
}

impl EmittedEvent {
    pub(crate) fn new(
        name: String,
        payload: Value,
        emitter: SubscriberId,
        origin: Option<NodeId>,
        level: u32,
        settings: EventSettings,
    ) -> Self {
        Self {
            id: EventId::new(),
            name,
            payload,
            emitter,
            origin,
            level,
            emitted_at: Instant::now(),
            occurred_at: Utc::now(),
            settings,
            consumers: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn emitter(&self) -> &SubscriberId {
        &self.emitter
    }

    pub fn origin(&self) -> Option<NodeId> {
        self.origin
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn settings(&self) -> &EventSettings {
        &self.settings
    }

    /// 距发布已过去的时长
    pub fn elapsed(&self) -> Duration {
        self.emitted_at.elapsed()
    }

    pub fn was_consumed(&self) -> bool {
        !self.lock_consumers().is_empty()
    }

    pub fn consumers(&self) -> Vec<Consumer> {
        self.lock_consumers().clone()
    }

    pub fn pending_consumers(&self) -> Vec<Consumer> {
        self.consumers_in(SettlementState::Pending)
    }

    pub fn resolved_consumers(&self) -> Vec<Consumer> {
        self.consumers_in(SettlementState::Resolved)
    }

    pub fn rejected_consumers(&self) -> Vec<Consumer> {
        self.consumers_in(SettlementState::Rejected)
    }

    pub(crate) fn record(&self, consumer: Consumer) {
        self.lock_consumers().push(consumer);
    }

    /// 等待所有调用结算（包括等待期间新加入的追赶调用）
    pub(crate) async fn drain(&self) {
        loop {
            let pending: Vec<Settlement> = self
                .lock_consumers()
                .iter()
                .map(|c| c.invocation.settlement.clone())
                .filter(Settlement::is_pending)
                .collect();
            if pending.is_empty() {
                return;
            }
            join_all(pending.iter().map(Settlement::wait)).await;
        }
    }

    /// 按当前消费情况计算事件结果
    pub(crate) fn outcome(&self) -> Outcome {
        let consumers = self.lock_consumers();
        if consumers.is_empty() {
            return if self.settings.reject_unconsumed {
                Err(EventError::Unconsumed {
                    event_name: self.name.clone(),
                })
            } else {
                Ok(Value::Null)
            };
        }

        let outcomes: Vec<Outcome> = consumers
            .iter()
            .filter_map(|c| c.invocation.settlement.outcome())
            .collect();
        if let Some(value) = outcomes.iter().rev().find_map(|o| o.as_ref().ok()) {
            return Ok(value.clone());
        }
        match outcomes.into_iter().next_back() {
            Some(rejected) => rejected,
            None => Ok(self.payload.clone()),
        }
    }

    fn consumers_in(&self, state: SettlementState) -> Vec<Consumer> {
        self.lock_consumers()
            .iter()
            .filter(|c| c.state() == state)
            .cloned()
            .collect()
    }

    fn lock_consumers(&self) -> MutexGuard<'_, Vec<Consumer>> {
        self.consumers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 发布结果：可 `.await` 得到事件结果，也可查看消费者
#[derive(Clone, Debug)]
pub struct EventHandle {
    event: Arc<EmittedEvent>,
    settlement: Settlement,
}

impl EventHandle {
    pub(crate) fn new(event: Arc<EmittedEvent>, settlement: Settlement) -> Self {
        Self { event, settlement }
    }

    pub fn id(&self) -> EventId {
        self.event.id()
    }

    pub fn name(&self) -> &str {
        self.event.name()
    }

    pub fn event(&self) -> &Arc<EmittedEvent> {
        &self.event
    }

    pub fn settlement(&self) -> &Settlement {
        &self.settlement
    }

    pub fn was_consumed(&self) -> bool {
        self.event.was_consumed()
    }

    pub fn consumers(&self) -> Vec<Consumer> {
        self.event.consumers()
    }

    pub fn pending_consumers(&self) -> Vec<Consumer> {
        self.event.pending_consumers()
    }

    pub fn resolved_consumers(&self) -> Vec<Consumer> {
        self.event.resolved_consumers()
    }

    pub fn rejected_consumers(&self) -> Vec<Consumer> {
        self.event.rejected_consumers()
    }
}

impl IntoFuture for EventHandle {
    type Output = Outcome;
    type IntoFuture = BoxFuture<'static, Outcome>;

    fn into_future(self) -> Self::IntoFuture {
        self.settlement.into_future()
    }
}

/// 在 `$results$` 数组中累积链式分发的输出
///
/// `previous` 不是带 `$results$` 的对象时，会先被包装为 `{"$results$": [previous]}`。
pub fn chain_results(previous: Value, new: Value) -> Value {
    const KEY: &str = "$results$";
    let mut acc = match previous {
        Value::Object(map) if map.get(KEY).is_some_and(Value::is_array) => Value::Object(map),
        Value::Null => json!({ KEY: [] }),
        other => json!({ KEY: [other] }),
    };
    if let Some(Value::Array(results)) = acc.get_mut(KEY) {
        results.push(new);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::InvocationId;

    fn event(settings: EventSettings) -> EmittedEvent {
        EmittedEvent::new(
            "x".into(),
            json!("p"),
            SubscriberId::from("emitter"),
            None,
            0,
            settings,
        )
    }

    fn consume(event: &EmittedEvent, id: u64) -> Settlement {
        let settlement = Settlement::new();
        event.record(Consumer {
            listener_id: ListenerId(id),
            subscriber: SubscriberId::from("s"),
            invocation: Invocation {
                id: InvocationId(id),
                listener_id: ListenerId(id),
                settlement: settlement.clone(),
            },
        });
        settlement
    }

    #[test]
    fn unconsumed_resolves_null_or_rejects() {
        assert_eq!(event(EventSettings::default()).outcome(), Ok(Value::Null));

        let strict = EventSettings {
            reject_unconsumed: true,
            ..EventSettings::default()
        };
        assert!(matches!(
            event(strict).outcome(),
            Err(EventError::Unconsumed { .. })
        ));
    }

    #[test]
    fn outcome_prefers_latest_resolved_value() {
        let e = event(EventSettings::default());
        let first = consume(&e, 1);
        let second = consume(&e, 2);
        let third = consume(&e, 3);
        assert_eq!(e.outcome(), Ok(json!("p")));

        first.resolve(json!(1));
        second.resolve(json!(2));
        third.reject(EventError::Abandoned);
        assert_eq!(e.outcome(), Ok(json!(2)));
        assert_eq!(e.resolved_consumers().len(), 2);
        assert_eq!(e.rejected_consumers().len(), 1);
        assert!(e.pending_consumers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_pending_invocations() {
        let e = Arc::new(event(EventSettings::default()));
        let pending = consume(&e, 1);

        let drained = tokio::spawn({
            let e = e.clone();
            async move { e.drain().await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!drained.is_finished());

        pending.resolve(json!("done"));
        drained.await.unwrap();
        assert_eq!(e.outcome(), Ok(json!("done")));
    }

    #[test]
    fn chain_results_accumulates() {
        let acc = chain_results(json!("a"), json!("b"));
        let acc = chain_results(acc, json!("c"));
        assert_eq!(acc, json!({ "$results$": ["a", "b", "c"] }));
        assert_eq!(
            chain_results(Value::Null, json!(1)),
            json!({ "$results$": [1] })
        );
    }
}
