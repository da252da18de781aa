//! 分发引擎（Dispatch）
//!
//! 按分组顺序逐个执行监听器，并把调用记录到事件的消费者列表中：
//! 1. 跳过已失效的监听器；
//! 2. 执行谓词，`Ok(false)` 跳过，`Err` 拒绝监听器主结果并跳过；
//! 3. 认领竞赛组，胜出时淘汰其余成员；
//! 4. once 监听器立即注销并清除超时，常驻监听器重置超时；
//! 5. 调用（装饰后的）回调：链式分发时就地等待并把输出交给下一个监听器，否则派生任务并发执行；
//! 6. `stop_here` 立即结束本轮分发；范围的 `stop` 在首个命中分组之后结束。
//!
use crate::error::EventError;
use crate::event::{Consumer, EmittedEvent};
use crate::listener::race::Claim;
use crate::listener::{EventContext, Invocation, Listener};
use crate::router::Router;
use crate::settlement::Outcome;
use crate::timer::TimerKey;
use std::sync::Arc;
use tracing::warn;

/// 一次分发的结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct DispatchReport {
    /// 实际执行的监听器数量
    pub executed: usize,
    /// 因 `stop` / `stop_here` 提前结束
    pub stopped: bool,
}

pub(crate) async fn dispatch(
    router: &Router,
    event: &Arc<EmittedEvent>,
    groups: Vec<Vec<Arc<Listener>>>,
    stop: bool,
    catchup: bool,
) -> DispatchReport {
    let chain = event.settings().chain;
    let trace = event.settings().trace;
    let mut payload = event.payload().clone();
    let mut report = DispatchReport::default();

    'groups: for group in groups {
        let mut hit = false;

        for listener in group {
            if !admit(router, &listener, &payload).await {
                continue;
            }

            let invocation = listener.begin_invocation(router.next_invocation_id());
            event.record(Consumer {
                listener_id: listener.id(),
                subscriber: listener.subscriber().clone(),
                invocation: invocation.clone(),
            });
            let ctx = EventContext {
                event_id: event.id(),
                event_name: event.name().to_string(),
                emitter: event.emitter().clone(),
                emitter_level: event.level(),
                listener_id: listener.id(),
                invocation_id: invocation.id,
                extra: listener.settings().extra.clone(),
                catchup,
                router: router.clone(),
            };

            event_log!(
                trace || listener.settings().trace,
                event = %event.name(),
                event_id = %event.id(),
                listener = %listener.id(),
                invocation = %invocation.id,
                catchup,
                "invoking listener"
            );

            let running = (listener.invoker())(payload.clone(), ctx);
            hit = true;
            report.executed += 1;

            if chain {
                let outcome = running.await;
                if let Ok(value) = &outcome {
                    payload = value.clone();
                }
                settle(&listener, &invocation, outcome);
            } else {
                let listener = listener.clone();
                tokio::spawn(async move {
                    let outcome = running.await;
                    settle(&listener, &invocation, outcome);
                });
            }

            if listener.settings().stop_here {
                report.stopped = true;
                break 'groups;
            }
        }

        if stop && hit {
            report.stopped = true;
            break;
        }
    }

    report
}

/// 调用前的检查与登记（步骤 1-4）；返回是否应当调用
async fn admit(router: &Router, listener: &Arc<Listener>, payload: &serde_json::Value) -> bool {
    if !listener.is_active() {
        return false;
    }

    if let Some(predicate) = &listener.settings().predicate {
        match predicate.test(payload.clone()).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(err) => {
                warn!(listener = %listener.id(), error = %err, "listener predicate failed");
                listener
                    .primary()
                    .reject(EventError::predicate(listener.id(), &err));
                return false;
            }
        }
        // 谓词可能挂起，期间监听器可能已被移除
        if !listener.is_active() {
            return false;
        }
    }

    if let Some(race) = listener.race() {
        match race.claim(listener.id()) {
            Claim::Won(losers) => router.retire_race_losers(listener.id(), losers),
            Claim::Lost(_) => return false,
        }
    }

    let timeout = TimerKey::ListenerTimeout(listener.id());
    if listener.settings().once {
        // 并发分发中只有一方能取得 once 监听器
        if !listener.deactivate() {
            return false;
        }
        router.registry().remove_by_id(listener.event_name(), listener.id());
        router.timers().clear(&timeout);
    } else {
        router.timers().reset(&timeout);
    }
    true
}

/// 结算一次调用；监听器主结果只接受第一次结果
fn settle(listener: &Listener, invocation: &Invocation, outcome: Outcome) {
    if let Err(err) = &outcome {
        warn!(
            event = %listener.event_name(),
            listener = %listener.id(),
            invocation = %invocation.id,
            error = %err,
            "listener invocation failed"
        );
    }
    invocation.settlement.settle(outcome.clone());
    listener.primary().settle(outcome);
}
