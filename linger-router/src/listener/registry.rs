//! 监听器注册表（ListenerRegistry）
//!
//! 以事件名为键、注册顺序为序保存监听器。负责：
//! - 独占判定与替换（全局标记任一方存在即为全局独占，否则局部独占要求同一订阅方）；
//! - 按订阅方/回调/ID 移除，移除时将监听器置为失效；
//! - 桶为空时立即删除。
//!
//! 注意：DashMap 的分片锁不能跨越对同一键的再次访问，删除空桶总是在释放引用之后进行。
//!
use super::Listener;
use super::callback::Callback;
use super::options::ListenerSettings;
use crate::error::{ExclusivityScope, RouterError, RouterResult};
use crate::id::{ListenerId, SubscriberId};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct ListenerRegistry {
    buckets: DashMap<String, Vec<Arc<Listener>>>,
}

/// `existing` 是否构成对新监听器的独占占用
fn occupies(
    existing: &Listener,
    settings: &ListenerSettings,
    subscriber: &SubscriberId,
) -> Option<ExclusivityScope> {
    let held = existing.settings();
    if !held.is_exclusive() {
        return None;
    }
    if held.globally_exclusive || settings.globally_exclusive {
        return Some(ExclusivityScope::Global);
    }
    (existing.subscriber() == subscriber).then_some(ExclusivityScope::Local)
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查找独占占用者（不修改注册表）
    pub fn occupant(
        &self,
        event_name: &str,
        settings: &ListenerSettings,
        subscriber: &SubscriberId,
    ) -> Option<Arc<Listener>> {
        let bucket = self.buckets.get(event_name)?;
        bucket
            .iter()
            .find(|l| occupies(l, settings, subscriber).is_some())
            .cloned()
    }

    /// 注册监听器；被替换的旧监听器（已置为失效）作为返回值
    pub fn register(&self, listener: Arc<Listener>) -> RouterResult<Option<Arc<Listener>>> {
        let mut bucket = self
            .buckets
            .entry(listener.event_name().to_string())
            .or_default();

        let occupied = bucket.iter().enumerate().find_map(|(index, existing)| {
            occupies(existing, listener.settings(), listener.subscriber())
                .map(|scope| (index, scope))
        });

        match occupied {
            None => {
                bucket.push(listener);
                Ok(None)
            }
            Some((index, scope)) => {
                if !bucket[index].settings().replace && !listener.settings().replace {
                    return Err(RouterError::ExclusivityConflict {
                        event_name: listener.event_name().to_string(),
                        scope,
                    });
                }
                let prior = std::mem::replace(&mut bucket[index], listener);
                prior.deactivate();
                Ok(Some(prior))
            }
        }
    }

    /// 当前事件名下的监听器快照（注册顺序）
    pub fn snapshot(&self, event_name: &str) -> Vec<Arc<Listener>> {
        self.buckets
            .get(event_name)
            .map(|bucket| bucket.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, event_name: &str) -> bool {
        self.buckets.contains_key(event_name)
    }

    pub fn event_names(&self) -> Vec<String> {
        self.buckets.iter().map(|e| e.key().clone()).collect()
    }

    /// 移除订阅方在该事件名下的监听器；给出 `id` 时只移除该监听器
    pub fn remove(
        &self,
        event_name: &str,
        subscriber: &SubscriberId,
        id: Option<ListenerId>,
    ) -> Vec<Arc<Listener>> {
        self.remove_where(event_name, usize::MAX, |l| {
            l.subscriber() == subscriber && id.is_none_or(|id| l.id() == id)
        })
    }

    /// 移除订阅方在该事件名下注册的某个回调（仅第一个匹配）
    pub fn remove_by_callback(
        &self,
        event_name: &str,
        subscriber: &SubscriberId,
        callback: &Callback,
    ) -> Vec<Arc<Listener>> {
        self.remove_where(event_name, 1, |l| {
            l.subscriber() == subscriber && l.callback().same(callback)
        })
    }

    /// 按 ID 移除，不区分订阅方
    pub fn remove_by_id(&self, event_name: &str, id: ListenerId) -> Option<Arc<Listener>> {
        self.remove_where(event_name, 1, |l| l.id() == id).pop()
    }

    /// 删除事件名下的全部监听器
    pub fn erase(&self, event_name: &str) -> Vec<Arc<Listener>> {
        let removed = self
            .buckets
            .remove(event_name)
            .map(|(_, bucket)| bucket)
            .unwrap_or_default();
        for listener in &removed {
            listener.deactivate();
        }
        removed
    }

    /// 移除订阅方在所有事件名下的监听器
    pub fn remove_subscriber(&self, subscriber: &SubscriberId) -> Vec<Arc<Listener>> {
        let mut removed = Vec::new();
        self.buckets.retain(|_, bucket| {
            bucket.retain(|l| {
                if l.subscriber() == subscriber {
                    removed.push(l.clone());
                    false
                } else {
                    true
                }
            });
            !bucket.is_empty()
        });
        for listener in &removed {
            listener.deactivate();
        }
        removed
    }

    fn remove_where<F>(&self, event_name: &str, limit: usize, predicate: F) -> Vec<Arc<Listener>>
    where
        F: Fn(&Listener) -> bool,
    {
        let mut removed = Vec::new();
        let empty = match self.buckets.get_mut(event_name) {
            None => return removed,
            Some(mut bucket) => {
                let mut index = 0;
                while index < bucket.len() && removed.len() < limit {
                    if predicate(&bucket[index]) {
                        removed.push(bucket.remove(index));
                    } else {
                        index += 1;
                    }
                }
                bucket.is_empty()
            }
        };
        if empty {
            self.buckets.remove_if(event_name, |_, v| v.is_empty());
        }
        for listener in &removed {
            listener.deactivate();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::options::ListenerOptions;
    use crate::listener::wrap;
    use crate::listener::{ListenerSeed, ListenerSettings};

    fn listener(id: u64, name: &str, subscriber: &str, options: ListenerOptions) -> Arc<Listener> {
        let callback = Callback::passthrough();
        let settings = ListenerSettings::default().merge(&options);
        Arc::new(Listener::new(ListenerSeed {
            id: ListenerId(id),
            event_name: name.into(),
            invoker: wrap::resolve(&callback, &settings.wrapping),
            callback,
            settings,
            subscriber: SubscriberId::from(subscriber),
            origin: None,
            level: 0,
            race: None,
        }))
    }

    #[test]
    fn global_exclusivity_refuses_second_listener() {
        let registry = ListenerRegistry::new();
        let exclusive = ListenerOptions::builder().globally_exclusive(true).build();

        registry
            .register(listener(1, "x", "a", exclusive.clone()))
            .unwrap();
        let err = registry
            .register(listener(2, "x", "b", ListenerOptions::default()))
            .unwrap_err();

        assert!(matches!(
            err,
            RouterError::ExclusivityConflict {
                scope: ExclusivityScope::Global,
                ..
            }
        ));
        assert_eq!(registry.snapshot("x").len(), 1);
    }

    #[test]
    fn local_exclusivity_is_scoped_to_subscriber() {
        let registry = ListenerRegistry::new();
        let local = ListenerOptions::builder().locally_exclusive(true).build();

        registry.register(listener(1, "x", "a", local.clone())).unwrap();
        registry.register(listener(2, "x", "b", local.clone())).unwrap();
        assert!(registry.register(listener(3, "x", "a", local)).is_err());
        assert_eq!(registry.snapshot("x").len(), 2);
    }

    #[test]
    fn replace_takes_the_prior_slot() {
        let registry = ListenerRegistry::new();
        registry
            .register(listener(1, "x", "a", ListenerOptions::default()))
            .unwrap();
        registry
            .register(listener(
                2,
                "x",
                "a",
                ListenerOptions::builder().locally_exclusive(true).build(),
            ))
            .unwrap();
        let prior = registry
            .register(listener(
                3,
                "x",
                "a",
                ListenerOptions::builder()
                    .locally_exclusive(true)
                    .replace(true)
                    .build(),
            ))
            .unwrap()
            .unwrap();

        assert_eq!(prior.id(), ListenerId(2));
        assert!(!prior.is_active());
        let ids: Vec<_> = registry.snapshot("x").iter().map(|l| l.id()).collect();
        assert_eq!(ids, vec![ListenerId(1), ListenerId(3)]);
    }

    #[test]
    fn empty_buckets_are_dropped() {
        let registry = ListenerRegistry::new();
        registry
            .register(listener(1, "x", "a", ListenerOptions::default()))
            .unwrap();
        registry
            .register(listener(2, "y", "a", ListenerOptions::default()))
            .unwrap();
        registry
            .register(listener(3, "y", "b", ListenerOptions::default()))
            .unwrap();

        let removed = registry.remove_subscriber(&SubscriberId::from("a"));
        assert_eq!(removed.len(), 2);
        assert!(!registry.contains("x"));
        assert!(registry.contains("y"));

        assert!(registry.remove_by_id("y", ListenerId(3)).is_some());
        assert!(!registry.contains("y"));
    }

    #[test]
    fn remove_by_callback_removes_one_match() {
        let registry = ListenerRegistry::new();
        let a = listener(1, "x", "a", ListenerOptions::default());
        let callback = a.callback().clone();
        registry.register(a).unwrap();
        registry
            .register(listener(2, "x", "a", ListenerOptions::default()))
            .unwrap();

        let removed = registry.remove_by_callback("x", &SubscriberId::from("a"), &callback);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id(), ListenerId(1));
        assert_eq!(registry.snapshot("x").len(), 1);
    }
}
