//! 监听器（Listener）
//!
//! - `callback`：回调协议、谓词与回调上下文；
//! - `options`：部分选项与合并后的设置；
//! - `wrap`：debounce / throttle / serial 装饰器；
//! - `registry`：按事件名组织的监听器注册表，负责独占/替换与生命周期；
//! - `race`：竞赛组，首个触发的成员淘汰其余成员。
//!
pub mod callback;
pub mod options;
pub(crate) mod race;
pub(crate) mod registry;
pub(crate) mod wrap;

pub use callback::{Callback, EventCallback, EventContext, Predicate};
pub use options::{
    Catchup, ListenerOptions, ListenerSettings, TimeoutAction, TimeoutCallback, Wrapping,
};

use crate::hierarchy::NodeId;
use crate::id::{InvocationId, ListenerId, SubscriberId};
use crate::settlement::{Settlement, SettlementState};
use chrono::{DateTime, Utc};
use race::RaceGroup;
use serde::Serialize;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use wrap::Invoker;

/// 一次回调调用及其结算句柄
#[derive(Clone, Debug)]
pub struct Invocation {
    pub id: InvocationId,
    pub listener_id: ListenerId,
    pub settlement: Settlement,
}

/// 已注册的监听器
pub struct Listener {
    id: ListenerId,
    event_name: String,
    callback: Callback,
    invoker: Invoker,
    settings: ListenerSettings,
    subscriber: SubscriberId,
    origin: Option<NodeId>,
    level: u32,
    registered_at: Instant,
    registered_on: DateTime<Utc>,
    primary: Settlement,
    invocations: Mutex<Vec<Invocation>>,
    invocation_count: AtomicUsize,
    active: AtomicBool,
    race: Option<Arc<RaceGroup>>,
}

/// 构建监听器所需的参数
pub(crate) struct ListenerSeed {
    pub id: ListenerId,
    pub event_name: String,
    pub callback: Callback,
    pub invoker: Invoker,
    pub settings: ListenerSettings,
    pub subscriber: SubscriberId,
    pub origin: Option<NodeId>,
    pub level: u32,
    pub race: Option<Arc<RaceGroup>>,
}

impl Listener {
    pub(crate) fn new(seed: ListenerSeed) -> Self {
        Self {
            id: seed.id,
            event_name: seed.event_name,
            callback: seed.callback,
            invoker: seed.invoker,
            settings: seed.settings,
            subscriber: seed.subscriber,
            origin: seed.origin,
            level: seed.level,
            registered_at: Instant::now(),
            registered_on: Utc::now(),
            primary: Settlement::new(),
            invocations: Mutex::new(Vec::new()),
            invocation_count: AtomicUsize::new(0),
            active: AtomicBool::new(true),
            race: seed.race,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn callback(&self) -> &Callback {
        &self.callback
    }

    pub fn settings(&self) -> &ListenerSettings {
        &self.settings
    }

    pub fn subscriber(&self) -> &SubscriberId {
        &self.subscriber
    }

    pub fn origin(&self) -> Option<NodeId> {
        self.origin
    }

    /// 注册时计算的层级
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn registered_at(&self) -> Instant {
        self.registered_at
    }

    /// 主结果：首次调用结果（之后的调用不再改变它）
    pub fn primary(&self) -> &Settlement {
        &self.primary
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 未结算的调用
    pub fn pending_invocations(&self) -> Vec<Invocation> {
        self.lock_invocations()
            .iter()
            .filter(|i| i.settlement.is_pending())
            .cloned()
            .collect()
    }

    /// 累计调用次数
    pub fn invocation_count(&self) -> usize {
        self.invocation_count.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> ListenerInfo {
        ListenerInfo {
            id: self.id,
            event_name: self.event_name.clone(),
            subscriber: self.subscriber.clone(),
            origin: self.origin,
            level: self.level,
            once: self.settings.once,
            registered_on: self.registered_on,
            state: self.primary.state(),
            invocations: self.invocation_count(),
            active: self.is_active(),
        }
    }

    /// 置为失效；仅第一次调用返回 true
    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    pub(crate) fn race(&self) -> Option<&Arc<RaceGroup>> {
        self.race.as_ref()
    }

    /// 登记一次新的调用（顺带清理已结算的记录）
    pub(crate) fn begin_invocation(&self, id: InvocationId) -> Invocation {
        let invocation = Invocation {
            id,
            listener_id: self.id,
            settlement: Settlement::new(),
        };
        let mut invocations = self.lock_invocations();
        invocations.retain(|i| i.settlement.is_pending());
        invocations.push(invocation.clone());
        self.invocation_count.fetch_add(1, Ordering::SeqCst);
        invocation
    }

    fn lock_invocations(&self) -> std::sync::MutexGuard<'_, Vec<Invocation>> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("event_name", &self.event_name)
            .field("subscriber", &self.subscriber)
            .field("level", &self.level)
            .field("active", &self.is_active())
            .finish()
    }
}

/// 监听器快照（只读视图）
#[derive(Clone, Debug, Serialize)]
pub struct ListenerInfo {
    pub id: ListenerId,
    pub event_name: String,
    pub subscriber: SubscriberId,
    pub origin: Option<NodeId>,
    pub level: u32,
    pub once: bool,
    pub registered_on: DateTime<Utc>,
    pub state: SettlementState,
    pub invocations: usize,
    pub active: bool,
}

/// 订阅结果：可 `.await` 得到监听器主结果
#[derive(Clone, Debug)]
pub struct Subscription {
    listener: Arc<Listener>,
}

impl Subscription {
    pub(crate) fn new(listener: Arc<Listener>) -> Self {
        Self { listener }
    }

    pub fn id(&self) -> ListenerId {
        self.listener.id()
    }

    pub fn event_name(&self) -> &str {
        self.listener.event_name()
    }

    pub fn listener(&self) -> &Arc<Listener> {
        &self.listener
    }

    pub fn settlement(&self) -> &Settlement {
        self.listener.primary()
    }

    pub fn is_active(&self) -> bool {
        self.listener.is_active()
    }
}

impl IntoFuture for Subscription {
    type Output = crate::settlement::Outcome;
    type IntoFuture = futures_core::future::BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.listener.primary().clone().into_future()
    }
}
