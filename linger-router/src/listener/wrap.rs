//! 回调装饰器
//!
//! 注册时将原始回调解析成 `Invoker`，按 debounce → throttle → serial 由内向外包装。
//! 装饰器各自持有状态，替换监听器时可整体复用以保留未完成的防抖/节流状态。
//!
use super::callback::{Callback, EventContext};
use super::options::Wrapping;
use crate::error::EventError;
use crate::settlement::{Outcome, Settlement};
use futures_core::future::BoxFuture;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// 已解析的调用器；调用时同步排队，返回的 future 产出结算结果
pub(crate) type Invoker = Arc<dyn Fn(Value, EventContext) -> BoxFuture<'static, Outcome> + Send + Sync>;

/// 解析回调及其包装
pub(crate) fn resolve(callback: &Callback, wrapping: &Wrapping) -> Invoker {
    let mut invoker = base(callback);
    if let Some(wait) = wrapping.debounce {
        invoker = debounce(invoker, wait);
    }
    if let Some(wait) = wrapping.throttle {
        invoker = throttle(invoker, wait);
    }
    if wrapping.serial {
        invoker = serial(invoker);
    }
    invoker
}

fn base(callback: &Callback) -> Invoker {
    let callback = callback.inner();
    Arc::new(move |payload, ctx| -> BoxFuture<'static, Outcome> {
        let callback = callback.clone();
        Box::pin(async move {
            let listener = ctx.listener_id;
            callback
                .call(payload, ctx)
                .await
                .map_err(|err| EventError::callback(listener, &err))
        })
    })
}

/// 防抖：`wait` 内的连续调用只执行最后一次，被覆盖的调用共享其结果
fn debounce(inner: Invoker, wait: Duration) -> Invoker {
    let latest = Arc::new(AtomicU64::new(0));
    let (fired, _rx) = watch::channel::<Option<(u64, Outcome)>>(None);
    let fired = Arc::new(fired);

    Arc::new(move |payload, ctx| -> BoxFuture<'static, Outcome> {
        let ticket = latest.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = inner.clone();
        let latest = latest.clone();
        let fired = fired.clone();

        Box::pin(async move {
            tokio::time::sleep(wait).await;

            if latest.load(Ordering::SeqCst) == ticket {
                let outcome = inner(payload, ctx).await;
                fired.send_replace(Some((ticket, outcome.clone())));
                return outcome;
            }

            let mut rx = fired.subscribe();
            loop {
                let seen = rx
                    .borrow_and_update()
                    .as_ref()
                    .filter(|(fired_ticket, _)| *fired_ticket >= ticket)
                    .map(|(_, outcome)| outcome.clone());
                if let Some(outcome) = seen {
                    return outcome;
                }
                if rx.changed().await.is_err() {
                    return Err(EventError::Abandoned);
                }
            }
        })
    })
}

/// 节流（前沿）：`wait` 内只执行第一次，其余调用复用该次结果
fn throttle(inner: Invoker, wait: Duration) -> Invoker {
    let last: Arc<Mutex<Option<(Instant, Settlement)>>> = Arc::new(Mutex::new(None));

    Arc::new(move |payload, ctx| -> BoxFuture<'static, Outcome> {
        let now = Instant::now();
        let mut guard = last.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some((started, running)) = guard.as_ref() {
            if now.duration_since(*started) < wait {
                let running = running.clone();
                return Box::pin(async move { running.wait().await });
            }
        }

        let settlement = Settlement::new();
        *guard = Some((now, settlement.clone()));
        drop(guard);

        let inner = inner.clone();
        Box::pin(async move {
            let outcome = inner(payload, ctx).await;
            settlement.settle(outcome.clone());
            outcome
        })
    })
}

/// 串行：新调用排在该监听器所有未完成调用之后
fn serial(inner: Invoker) -> Invoker {
    let tail: Arc<Mutex<Option<Settlement>>> = Arc::new(Mutex::new(None));

    Arc::new(move |payload, ctx| -> BoxFuture<'static, Outcome> {
        let done = Settlement::new();
        let previous = tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(done.clone());

        let inner = inner.clone();
        Box::pin(async move {
            if let Some(previous) = previous {
                let _ = previous.wait().await;
            }
            let outcome = inner(payload, ctx).await;
            done.settle(outcome.clone());
            outcome
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{EventId, InvocationId, ListenerId, SubscriberId};
    use crate::router::Router;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn ctx(router: &Router) -> EventContext {
        EventContext {
            event_id: EventId::new(),
            event_name: "wrap".into(),
            emitter: SubscriberId::from("tester"),
            emitter_level: 0,
            listener_id: ListenerId(1),
            invocation_id: InvocationId(1),
            extra: None,
            catchup: false,
            router: router.clone(),
        }
    }

    fn counting(calls: Arc<AtomicUsize>, delay: Duration) -> Callback {
        Callback::from_fn(move |payload, _ctx| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                anyhow::Ok(payload)
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn base_maps_errors_to_callback_rejections() {
        let router = Router::default();
        let failing = Callback::from_fn(|_payload, _ctx| async move {
            Err::<Value, _>(anyhow::anyhow!("nope"))
        });
        let invoker = resolve(&failing, &Wrapping::default());

        let outcome = invoker(json!(1), ctx(&router)).await;
        assert!(matches!(
            outcome,
            Err(EventError::Callback { listener: ListenerId(1), .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_runs_only_the_last_call() {
        let router = Router::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let wrapping = Wrapping {
            debounce: Some(Duration::from_millis(50)),
            ..Wrapping::default()
        };
        let invoker = resolve(&counting(calls.clone(), Duration::ZERO), &wrapping);

        let first = tokio::spawn(invoker(json!("a"), ctx(&router)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = tokio::spawn(invoker(json!("b"), ctx(&router)));

        assert_eq!(second.await.unwrap(), Ok(json!("b")));
        assert_eq!(first.await.unwrap(), Ok(json!("b")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_reuses_leading_result() {
        let router = Router::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let wrapping = Wrapping {
            throttle: Some(Duration::from_millis(100)),
            ..Wrapping::default()
        };
        let invoker = resolve(&counting(calls.clone(), Duration::ZERO), &wrapping);

        assert_eq!(invoker(json!(1), ctx(&router)).await, Ok(json!(1)));
        assert_eq!(invoker(json!(2), ctx(&router)).await, Ok(json!(1)));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(invoker(json!(3), ctx(&router)).await, Ok(json!(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn serial_queues_invocations() {
        let router = Router::default();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let callback = {
            let active = active.clone();
            let peak = peak.clone();
            Callback::from_fn(move |payload, _ctx| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    anyhow::Ok(payload)
                }
            })
        };
        let wrapping = Wrapping {
            serial: true,
            ..Wrapping::default()
        };
        let invoker = resolve(&callback, &wrapping);

        let runs: Vec<_> = (0..3)
            .map(|i| tokio::spawn(invoker(json!(i), ctx(&router))))
            .collect();
        for (i, run) in runs.into_iter().enumerate() {
            assert_eq!(run.await.unwrap(), Ok(json!(i)));
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
