//! 监听器回调（EventCallback）与谓词（Predicate）
//!
//! 回调接收当前载荷与 `EventContext`，返回新的载荷（链式分发时交给下一个监听器）。
//! 闭包 `Fn(Value, EventContext) -> impl Future<Output = anyhow::Result<Value>>`
//! 自动实现 `EventCallback`。
//!
use crate::id::{EventId, InvocationId, ListenerId, SubscriberId};
use crate::router::Router;
use async_trait::async_trait;
use futures_core::future::BoxFuture;
use serde_json::Value;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;

/// 事件回调
#[async_trait]
pub trait EventCallback: Send + Sync {
    async fn call(&self, payload: Value, ctx: EventContext) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> EventCallback for F
where
    F: Fn(Value, EventContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, payload: Value, ctx: EventContext) -> anyhow::Result<Value> {
        (self)(payload, ctx).await
    }
}

/// 回调句柄；按指针判等，用于按回调退订与替换时复用装饰器
#[derive(Clone)]
pub struct Callback(Arc<dyn EventCallback>);

impl Callback {
    pub fn new<C>(callback: C) -> Self
    where
        C: EventCallback + 'static,
    {
        Self(Arc::new(callback))
    }

    /// 由闭包构建（便于类型推断）
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::new(f)
    }

    pub fn from_arc(callback: Arc<dyn EventCallback>) -> Self {
        Self(callback)
    }

    /// 原样返回载荷
    pub fn passthrough() -> Self {
        Self::from_fn(|payload, _ctx| async move { anyhow::Ok(payload) })
    }

    pub fn same(&self, other: &Callback) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn inner(&self) -> Arc<dyn EventCallback> {
        self.0.clone()
    }
}

impl Debug for Callback {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callback({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

type PredicateFn = dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync;

/// 监听器谓词：`Ok(false)` 跳过监听器，`Err` 拒绝监听器主结果并跳过
#[derive(Clone)]
pub struct Predicate(Arc<PredicateFn>);

impl Predicate {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self(Arc::new(
            move |payload| -> BoxFuture<'static, anyhow::Result<bool>> { Box::pin(f(payload)) },
        ))
    }

    /// 同步谓词
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |payload| {
            let f = f.clone();
            async move { anyhow::Ok(f(&payload)) }
        })
    }

    pub(crate) async fn test(&self, payload: Value) -> anyhow::Result<bool> {
        (self.0)(payload).await
    }
}

impl Debug for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Predicate")
    }
}

/// 回调上下文
#[derive(Clone)]
pub struct EventContext {
    pub event_id: EventId,
    pub event_name: String,
    pub emitter: SubscriberId,
    pub emitter_level: u32,
    pub listener_id: ListenerId,
    pub invocation_id: InvocationId,
    /// 监听器选项中的附加数据
    pub extra: Option<Value>,
    /// 本次调用是否来自滞留事件的追赶
    pub catchup: bool,
    pub(crate) router: Router,
}

impl EventContext {
    /// 所属路由器，可用于在回调内再次订阅/发布
    pub fn router(&self) -> &Router {
        &self.router
    }
}

impl Debug for EventContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("event_id", &self.event_id)
            .field("event_name", &self.event_name)
            .field("emitter", &self.emitter)
            .field("emitter_level", &self.emitter_level)
            .field("listener_id", &self.listener_id)
            .field("invocation_id", &self.invocation_id)
            .field("catchup", &self.catchup)
            .finish()
    }
}
