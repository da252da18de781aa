//! 滞留事件存储（LingeringStore）
//!
//! 分发完成后仍需滞留的事件按事件名缓存，供之后注册的监听器追赶。
//! 独占策略与监听器注册表一致，另外约定"独占优先"：
//! - 已有独占事件且双方均不允许替换时，新事件被拒绝滞留（按不滞留处理结算）；
//! - 允许替换时新事件接替旧事件的位置；
//! - 全局独占事件入库时清除同名下其余所有事件。
//!
use super::emitted::EmittedEvent;
use super::options::EventSettings;
use crate::id::{EventId, SubscriberId};
use crate::settlement::Settlement;
use dashmap::DashMap;
use std::sync::Arc;

/// 滞留中的事件
#[derive(Clone, Debug)]
pub struct LingeringEvent {
    pub event: Arc<EmittedEvent>,
    pub settlement: Settlement,
}

/// 入库结果
#[derive(Debug)]
pub(crate) enum Admission {
    /// 已滞留；附带被替换或清除的事件
    Stored { evicted: Vec<LingeringEvent> },
    /// 被独占事件拒绝
    Refused,
}

fn occupies(
    existing: &EventSettings,
    held_by: &SubscriberId,
    incoming: &EventSettings,
    emitter: &SubscriberId,
) -> bool {
    if !existing.is_exclusive() {
        return false;
    }
    existing.globally_exclusive || incoming.globally_exclusive || held_by == emitter
}

#[derive(Debug, Default)]
pub(crate) struct LingeringStore {
    buckets: DashMap<String, Vec<LingeringEvent>>,
}

impl LingeringStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, entry: LingeringEvent) -> Admission {
        let incoming = entry.event.settings().clone();
        let emitter = entry.event.emitter().clone();
        let mut bucket = self
            .buckets
            .entry(entry.event.name().to_string())
            .or_default();

        let occupants: Vec<usize> = bucket
            .iter()
            .enumerate()
            .filter(|(_, e)| occupies(e.event.settings(), e.event.emitter(), &incoming, &emitter))
            .map(|(index, _)| index)
            .collect();

        let replaceable = incoming.replace
            || occupants
                .iter()
                .all(|&index| bucket[index].event.settings().replace);
        if !replaceable {
            return Admission::Refused;
        }

        let slot = occupants.first().copied();
        let mut evicted = Vec::new();
        let mut kept = Vec::with_capacity(bucket.len() + 1);
        for (index, existing) in bucket.drain(..).enumerate() {
            if Some(index) == slot {
                kept.push(entry.clone());
                evicted.push(existing);
            } else if incoming.globally_exclusive || occupants.contains(&index) {
                evicted.push(existing);
            } else {
                kept.push(existing);
            }
        }
        if slot.is_none() {
            kept.push(entry);
        }
        *bucket = kept;

        Admission::Stored { evicted }
    }

    /// 取出（移除）指定事件
    pub fn take(&self, event_name: &str, id: EventId) -> Option<LingeringEvent> {
        let (taken, empty) = {
            let mut bucket = self.buckets.get_mut(event_name)?;
            let taken = bucket
                .iter()
                .position(|e| e.event.id() == id)
                .map(|index| bucket.remove(index));
            (taken, bucket.is_empty())
        };
        if empty {
            self.buckets.remove_if(event_name, |_, v| v.is_empty());
        }
        taken
    }

    /// 当前滞留的事件快照（入库顺序）
    pub fn snapshot(&self, event_name: &str) -> Vec<LingeringEvent> {
        self.buckets
            .get(event_name)
            .map(|bucket| bucket.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, event_name: &str) -> bool {
        self.buckets.contains_key(event_name)
    }
}
