//! 路由器（Router）
//!
//! 对外的订阅/发布门面。`Router` 是 `Arc` 上的廉价句柄，可在回调中克隆后再次订阅或发布。
//! 注册表、滞留存储与定时器都归属于具体的路由器实例，多个路由器互不影响。
//!
//! 订阅：合并选项 → 解析装饰器 → 注册（独占判定）→ 加入竞赛组 → 设置超时 → 追赶滞留事件。
//! 发布：解析范围 → 计算层级 → 分发 → 滞留（或在调用结算后直接结算）。
//!
use crate::config::RouterConfig;
use crate::dispatch::dispatch;
use crate::error::{EventError, RouterError, RouterResult};
use crate::event::lingering::{Admission, LingeringStore};
use crate::event::{EmittedEvent, EventHandle, EventOptions, LingeringEvent};
use crate::hierarchy::{Flat, Hierarchy, NodeId, level_of};
use crate::id::{InvocationId, ListenerId, SubscriberId};
use crate::listener::race::RaceGroup;
use crate::listener::registry::ListenerRegistry;
use crate::listener::{
    Callback, Listener, ListenerInfo, ListenerOptions, ListenerSeed, ListenerSettings,
    Subscription, TimeoutAction, wrap,
};
use crate::range::{BroadcastRange, Emitter};
use crate::settlement::Settlement;
use crate::timer::{TimerKey, TimerRegistry, TimerTask};
use futures_core::future::BoxFuture;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// 订阅方/发布方：令牌加上可选的宿主节点
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub id: SubscriberId,
    pub origin: Option<NodeId>,
}

impl Participant {
    pub fn new(id: impl Into<SubscriberId>) -> Self {
        Self {
            id: id.into(),
            origin: None,
        }
    }

    /// 随机令牌、无宿主节点
    pub fn anonymous() -> Self {
        Self::new(SubscriberId::unique())
    }

    /// 绑定宿主节点
    pub fn at(mut self, origin: NodeId) -> Self {
        self.origin = Some(origin);
        self
    }
}

struct RouterInner {
    config: RouterConfig,
    hierarchy: Arc<dyn Hierarchy>,
    registry: ListenerRegistry,
    lingering: LingeringStore,
    timers: TimerRegistry,
    listener_seq: AtomicU64,
    invocation_seq: AtomicU64,
}

#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.inner.config)
            .field("timers", &self.inner.timers.len())
            .finish()
    }
}

impl Router {
    /// 扁平层级的路由器
    pub fn new(config: RouterConfig) -> Self {
        Self::with_hierarchy(config, Arc::new(Flat))
    }

    pub fn with_hierarchy(config: RouterConfig, hierarchy: Arc<dyn Hierarchy>) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                config,
                hierarchy,
                registry: ListenerRegistry::new(),
                lingering: LingeringStore::new(),
                timers: TimerRegistry::new(),
                listener_seq: AtomicU64::new(0),
                invocation_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// 节点层级；无节点时为 0
    pub fn level_of(&self, origin: Option<NodeId>) -> u32 {
        origin.map_or(0, |node| {
            level_of(self.inner.hierarchy.as_ref(), node, self.inner.config.max_depth)
        })
    }

    // ---------------------------------------------------------------------
    // 订阅
    // ---------------------------------------------------------------------

    /// 订阅单个事件名
    pub async fn subscribe(
        &self,
        event_name: &str,
        callback: Callback,
        options: ListenerOptions,
        subscriber: &Participant,
    ) -> RouterResult<Subscription> {
        let settings = self.inner.config.listener_defaults.merge(&options);
        if settings.race {
            return Err(RouterError::RaceNeedsMultipleNames { count: 1 });
        }
        self.add_listener(event_name, callback, settings, subscriber, None)
            .await
    }

    /// 订阅多个事件名；每个事件名与每个回调各注册一个监听器，`callbacks` 为空时原样返回载荷
    ///
    /// 任一注册失败时，本次已注册的监听器会被撤销。
    pub async fn subscribe_many(
        &self,
        event_names: &[&str],
        callbacks: Vec<Callback>,
        options: ListenerOptions,
        subscriber: &Participant,
    ) -> RouterResult<Vec<Subscription>> {
        let settings = self.inner.config.listener_defaults.merge(&options);
        if event_names.iter().any(|name| name.is_empty()) {
            return Err(RouterError::EmptyEventName);
        }

        let race = if settings.race {
            if event_names.len() < 2 {
                return Err(RouterError::RaceNeedsMultipleNames {
                    count: event_names.len(),
                });
            }
            if !settings.once {
                return Err(RouterError::RaceWithoutOnce {
                    event_name: event_names[0].to_string(),
                });
            }
            Some(Arc::new(RaceGroup::new()))
        } else {
            None
        };

        let callbacks = if callbacks.is_empty() {
            vec![Callback::passthrough()]
        } else {
            callbacks
        };
        let mut subscriptions = Vec::with_capacity(event_names.len() * callbacks.len());
        for name in event_names {
            for callback in &callbacks {
                let added = self
                    .add_listener(name, callback.clone(), settings.clone(), subscriber, race.clone())
                    .await;
                match added {
                    Ok(subscription) => subscriptions.push(subscription),
                    Err(err) => {
                        for done in &subscriptions {
                            self.retire(done.listener());
                        }
                        return Err(err);
                    }
                }
            }
        }
        Ok(subscriptions)
    }

    /// 一次性订阅；未给回调时原样返回载荷
    pub async fn subscribe_once(
        &self,
        event_name: &str,
        callback: Option<Callback>,
        options: ListenerOptions,
        subscriber: &Participant,
    ) -> RouterResult<Subscription> {
        self.subscribe(
            event_name,
            callback.unwrap_or_else(Callback::passthrough),
            options.force_once(),
            subscriber,
        )
        .await
    }

    pub async fn subscribe_once_many(
        &self,
        event_names: &[&str],
        callbacks: Vec<Callback>,
        options: ListenerOptions,
        subscriber: &Participant,
    ) -> RouterResult<Vec<Subscription>> {
        self.subscribe_many(event_names, callbacks, options.force_once(), subscriber)
            .await
    }

    async fn add_listener(
        &self,
        event_name: &str,
        callback: Callback,
        settings: ListenerSettings,
        subscriber: &Participant,
        race: Option<Arc<RaceGroup>>,
    ) -> RouterResult<Subscription> {
        if event_name.is_empty() {
            return Err(RouterError::EmptyEventName);
        }

        let id = ListenerId(self.inner.listener_seq.fetch_add(1, Ordering::SeqCst) + 1);
        let invoker = self
            .reusable_invoker(event_name, &callback, &settings, &subscriber.id)
            .unwrap_or_else(|| wrap::resolve(&callback, &settings.wrapping));
        let trace = settings.trace;
        let timeout = settings.timeout;

        let listener = Arc::new(Listener::new(ListenerSeed {
            id,
            event_name: event_name.to_string(),
            callback,
            invoker,
            settings,
            subscriber: subscriber.id.clone(),
            origin: subscriber.origin,
            level: self.level_of(subscriber.origin),
            race: race.clone(),
        }));

        // 竞赛已分出胜负，不再注册
        if let Some(winner) = race.as_ref().and_then(|r| r.winner()) {
            listener.deactivate();
            listener
                .primary()
                .reject(EventError::RaceLost { listener: id, winner });
            return Ok(Subscription::new(listener));
        }

        if let Some(prior) = self.inner.registry.register(listener.clone())? {
            self.inner
                .timers
                .clear(&TimerKey::ListenerTimeout(prior.id()));
            event_log!(trace, event = %event_name, listener = %id, replaced = %prior.id(), "listener replaced");
        }
        if let Some(race) = &race {
            race.enlist(event_name, id);
        }
        if let Some(timeout) = timeout {
            self.arm_timeout(&listener, timeout);
        }

        event_log!(
            trace,
            event = %event_name,
            listener = %id,
            subscriber = %subscriber.id,
            level = listener.level(),
            once = listener.settings().once,
            "listener added"
        );

        self.catch_up(&listener).await;
        Ok(Subscription::new(listener))
    }

    /// 替换同一回调且包装相同的监听器时沿用旧装饰器，保留防抖/节流状态
    fn reusable_invoker(
        &self,
        event_name: &str,
        callback: &Callback,
        settings: &ListenerSettings,
        subscriber: &SubscriberId,
    ) -> Option<wrap::Invoker> {
        if settings.wrapping.is_plain() {
            return None;
        }
        let occupant = self.inner.registry.occupant(event_name, settings, subscriber)?;
        let reusable = occupant.callback().same(callback)
            && occupant.settings().wrapping == settings.wrapping
            && (occupant.settings().replace || settings.replace);
        reusable.then(|| occupant.invoker().clone())
    }

    fn arm_timeout(&self, listener: &Arc<Listener>, timeout: Duration) {
        let router = Arc::downgrade(&self.inner);
        let target = Arc::downgrade(listener);
        let task: TimerTask = Arc::new(move || -> BoxFuture<'static, ()> {
            let router = router.clone();
            let target = target.clone();
            Box::pin(async move {
                let (Some(inner), Some(listener)) = (router.upgrade(), target.upgrade()) else {
                    return;
                };
                Router { inner }.on_timeout(&listener, timeout);
            })
        });
        self.inner
            .timers
            .schedule(TimerKey::ListenerTimeout(listener.id()), timeout, task);
    }

    fn on_timeout(&self, listener: &Arc<Listener>, after: Duration) {
        if !listener.is_active() {
            return;
        }
        let settings = listener.settings();
        let action = settings
            .timeout_callback
            .as_ref()
            .map(|callback| callback.call(&listener.info()))
            .unwrap_or_default();

        if settings.throw_on_timeout {
            listener.primary().reject(EventError::Timeout {
                listener: listener.id(),
                after_ms: after.as_millis(),
            });
        }
        match action {
            TimeoutAction::Unsubscribe => {
                self.inner
                    .registry
                    .remove_by_id(listener.event_name(), listener.id());
            }
            TimeoutAction::Keep => self.arm_timeout(listener, after),
        }

        event_log!(
            settings.trace,
            event = %listener.event_name(),
            listener = %listener.id(),
            after_ms = after.as_millis() as u64,
            action = ?action,
            "listener timed out"
        );
    }

    /// 新监听器追赶滞留事件
    async fn catch_up(&self, listener: &Arc<Listener>) {
        for entry in self.inner.lingering.snapshot(listener.event_name()) {
            if !listener.is_active() {
                break;
            }
            let bait = entry.event.settings().bait;
            if bait && entry.event.was_consumed() {
                continue;
            }
            if !listener.settings().catchup.admits(entry.event.elapsed()) {
                continue;
            }

            let report = dispatch(self, &entry.event, vec![vec![listener.clone()]], false, true).await;
            if report.executed > 0 && bait {
                self.retire_bait(entry);
            }
        }
    }

    /// 已被消费的诱饵立即移出滞留存储，结果在其调用结算后给出
    fn retire_bait(&self, entry: LingeringEvent) {
        let event = &entry.event;
        if self.inner.lingering.take(event.name(), event.id()).is_none() {
            return;
        }
        self.inner.timers.clear(&TimerKey::Decay(event.id()));
        event_log!(event.settings().trace, event = %event.name(), event_id = %event.id(), "bait consumed");
        settle_when_drained(entry.event, entry.settlement);
    }

    // ---------------------------------------------------------------------
    // 发布
    // ---------------------------------------------------------------------

    /// 发布事件；返回的句柄在事件结算后给出结果
    pub async fn publish(
        &self,
        event_name: &str,
        payload: Value,
        options: EventOptions,
        emitter: &Participant,
    ) -> RouterResult<EventHandle> {
        if event_name.is_empty() {
            return Err(RouterError::EmptyEventName);
        }
        let settings = self.inner.config.event_defaults.merge(&options);
        let range = match settings.range.as_deref() {
            Some(spec) => BroadcastRange::parse(spec)?,
            None => BroadcastRange::default(),
        };
        let level = self.level_of(emitter.origin);

        let event = Arc::new(EmittedEvent::new(
            event_name.to_string(),
            payload,
            emitter.id.clone(),
            emitter.origin,
            level,
            settings,
        ));
        let groups = range.resolve(
            &self.inner.registry.snapshot(event_name),
            &Emitter {
                id: &emitter.id,
                origin: emitter.origin,
                level,
            },
        );
        // 无节点的发布方不参与层级，范围的 stop 不适用
        let stop = range.stops() && emitter.origin.is_some();

        event_log!(
            event.settings().trace,
            event = %event_name,
            event_id = %event.id(),
            emitter = %emitter.id,
            level,
            groups = groups.len(),
            "publishing event"
        );

        let report = dispatch(self, &event, groups, stop, false).await;
        let settlement = Settlement::new();

        if report.stopped {
            settle_when_drained(event.clone(), settlement.clone());
        } else {
            self.linger(&event, &settlement);
        }
        Ok(EventHandle::new(event, settlement))
    }

    /// 依次发布到多个事件名；事件名先统一校验
    pub async fn publish_many(
        &self,
        event_names: &[&str],
        payload: Value,
        options: EventOptions,
        emitter: &Participant,
    ) -> RouterResult<Vec<EventHandle>> {
        if event_names.iter().any(|name| name.is_empty()) {
            return Err(RouterError::EmptyEventName);
        }
        let mut handles = Vec::with_capacity(event_names.len());
        for name in event_names {
            handles.push(
                self.publish(name, payload.clone(), options.clone(), emitter)
                    .await?,
            );
        }
        Ok(handles)
    }

    fn linger(&self, event: &Arc<EmittedEvent>, settlement: &Settlement) {
        let settings = event.settings();
        let Some(delay) = settings.linger.delay() else {
            settle_when_drained(event.clone(), settlement.clone());
            return;
        };
        if settings.bait && event.was_consumed() {
            settle_when_drained(event.clone(), settlement.clone());
            return;
        }

        let entry = LingeringEvent {
            event: event.clone(),
            settlement: settlement.clone(),
        };
        match self.inner.lingering.admit(entry) {
            Admission::Refused => {
                event_log!(settings.trace, event = %event.name(), event_id = %event.id(), "linger refused by exclusive event");
                settle_when_drained(event.clone(), settlement.clone());
            }
            Admission::Stored { evicted } => {
                for old in evicted {
                    self.inner.timers.clear(&TimerKey::Decay(old.event.id()));
                    settle_when_drained(old.event, old.settlement);
                }
                self.schedule_decay(event, delay);
                event_log!(
                    settings.trace,
                    event = %event.name(),
                    event_id = %event.id(),
                    linger_ms = delay.as_millis() as u64,
                    "event lingering"
                );
            }
        }
    }

    fn schedule_decay(&self, event: &Arc<EmittedEvent>, delay: Duration) {
        let router = Arc::downgrade(&self.inner);
        let name = event.name().to_string();
        let id = event.id();
        let task: TimerTask = Arc::new(move || -> BoxFuture<'static, ()> {
            let router: Weak<RouterInner> = router.clone();
            let name = name.clone();
            Box::pin(async move {
                let Some(inner) = router.upgrade() else {
                    return;
                };
                let Some(entry) = inner.lingering.take(&name, id) else {
                    return;
                };
                drop(inner);
                entry.event.drain().await;
                entry.settlement.settle(entry.event.outcome());
                debug!(event = %name, event_id = %id, "lingering event decayed");
            })
        });
        self.inner.timers.schedule(TimerKey::Decay(id), delay, task);
    }

    // ---------------------------------------------------------------------
    // 退订
    // ---------------------------------------------------------------------

    /// 退订：
    /// - 给出事件名与回调：移除该事件名下第一个匹配的回调；
    /// - 只给事件名：移除该事件名下订阅方的所有监听器；
    /// - 只给回调：在所有事件名下移除该回调；
    /// - 都不给：移除订阅方的全部监听器。
    ///
    /// 返回移除的数量。被移除监听器的主结果保持未结算。
    pub fn unsubscribe(
        &self,
        subscriber: &SubscriberId,
        event_name: Option<&str>,
        callback: Option<&Callback>,
    ) -> usize {
        let registry = &self.inner.registry;
        let removed = match (event_name, callback) {
            (Some(name), Some(callback)) => registry.remove_by_callback(name, subscriber, callback),
            (Some(name), None) => registry.remove(name, subscriber, None),
            (None, Some(callback)) => registry
                .event_names()
                .iter()
                .flat_map(|name| registry.remove_by_callback(name, subscriber, callback))
                .collect(),
            (None, None) => registry.remove_subscriber(subscriber),
        };
        self.forget(&removed);
        removed.len()
    }

    /// 批量退订：对每个事件名与每个回调的组合执行 [`Router::unsubscribe`]
    ///
    /// 两者都为空时等同于 [`Router::unsubscribe_all`]。
    pub fn unsubscribe_many(
        &self,
        subscriber: &SubscriberId,
        event_names: &[&str],
        callbacks: &[Callback],
    ) -> usize {
        match (event_names.is_empty(), callbacks.is_empty()) {
            (true, true) => self.unsubscribe(subscriber, None, None),
            (false, true) => event_names
                .iter()
                .map(|name| self.unsubscribe(subscriber, Some(*name), None))
                .sum(),
            (true, false) => callbacks
                .iter()
                .map(|callback| self.unsubscribe(subscriber, None, Some(callback)))
                .sum(),
            (false, false) => event_names
                .iter()
                .flat_map(|name| {
                    callbacks
                        .iter()
                        .map(move |callback| self.unsubscribe(subscriber, Some(*name), Some(callback)))
                })
                .sum(),
        }
    }

    pub fn unsubscribe_all(&self, subscriber: &SubscriberId) -> usize {
        self.unsubscribe(subscriber, None, None)
    }

    pub fn remove_listener(&self, event_name: &str, subscriber: &SubscriberId, id: ListenerId) -> bool {
        let removed = self.inner.registry.remove(event_name, subscriber, Some(id));
        self.forget(&removed);
        !removed.is_empty()
    }

    /// 删除事件名下的全部监听器，不区分订阅方
    pub fn erase_event(&self, event_name: &str) -> usize {
        let removed = self.inner.registry.erase(event_name);
        self.forget(&removed);
        removed.len()
    }

    pub fn erase_events(&self, event_names: &[&str]) -> usize {
        event_names.iter().map(|name| self.erase_event(name)).sum()
    }

    fn retire(&self, listener: &Arc<Listener>) {
        if let Some(removed) = self
            .inner
            .registry
            .remove_by_id(listener.event_name(), listener.id())
        {
            self.forget(std::slice::from_ref(&removed));
        }
        listener.deactivate();
    }

    fn forget(&self, removed: &[Arc<Listener>]) {
        for listener in removed {
            self.inner
                .timers
                .clear(&TimerKey::ListenerTimeout(listener.id()));
            event_log!(listener.settings().trace, event = %listener.event_name(), listener = %listener.id(), "listener removed");
        }
    }

    // ---------------------------------------------------------------------
    // 查询
    // ---------------------------------------------------------------------

    pub fn has_listener(&self, event_name: &str) -> bool {
        self.inner.registry.contains(event_name)
    }

    /// 任一事件名下存在监听器
    pub fn has_listeners(&self, event_names: &[&str]) -> bool {
        event_names.iter().any(|name| self.has_listener(name))
    }

    /// 订阅方在任一事件名下存在监听器
    pub fn subscriber_has_listeners(&self, subscriber: &SubscriberId, event_names: &[&str]) -> bool {
        event_names.iter().any(|name| {
            self.inner
                .registry
                .snapshot(name)
                .iter()
                .any(|l| l.subscriber() == subscriber)
        })
    }

    pub fn has_lingering_event(&self, event_name: &str) -> bool {
        self.inner.lingering.contains(event_name)
    }

    pub fn has_lingering_events(&self, event_names: &[&str]) -> bool {
        event_names.iter().any(|name| self.has_lingering_event(name))
    }

    /// 监听器快照（按事件名、注册顺序）
    pub fn listeners(&self, event_names: &[&str]) -> Vec<ListenerInfo> {
        event_names
            .iter()
            .flat_map(|name| self.inner.registry.snapshot(name))
            .map(|l| l.info())
            .collect()
    }

    pub fn lingering_events(&self, event_names: &[&str]) -> Vec<LingeringEvent> {
        event_names
            .iter()
            .flat_map(|name| self.inner.lingering.snapshot(name))
            .collect()
    }

    // ---------------------------------------------------------------------
    // 分发引擎使用
    // ---------------------------------------------------------------------

    pub(crate) fn registry(&self) -> &ListenerRegistry {
        &self.inner.registry
    }

    pub(crate) fn timers(&self) -> &TimerRegistry {
        &self.inner.timers
    }

    pub(crate) fn next_invocation_id(&self) -> InvocationId {
        InvocationId(self.inner.invocation_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// 淘汰竞赛组中的其余成员
    pub(crate) fn retire_race_losers(&self, winner: ListenerId, losers: Vec<(String, ListenerId)>) {
        for (event_name, id) in losers {
            let Some(loser) = self.inner.registry.remove_by_id(&event_name, id) else {
                continue;
            };
            self.forget(std::slice::from_ref(&loser));
            loser
                .primary()
                .reject(EventError::RaceLost { listener: id, winner });
        }
    }
}

/// 调用全部结算后按消费情况结算事件；没有未结算调用时立即结算
fn settle_when_drained(event: Arc<EmittedEvent>, settlement: Settlement) {
    if event.pending_consumers().is_empty() {
        settlement.settle(event.outcome());
        return;
    }
    tokio::spawn(async move {
        event.drain().await;
        settlement.settle(event.outcome());
    });
}
