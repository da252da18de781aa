//! 竞赛组（RaceGroup）
//!
//! 多个事件名上的 once 监听器组成一组，第一个被触发的成员胜出，
//! 其余成员由分发引擎移除并以 `RaceLost` 拒绝。成员只以 ID 记录，不持有监听器本身。
//!
use crate::id::ListenerId;
use std::sync::{Mutex, PoisonError};

/// 竞赛认领结果
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Claim {
    /// 胜出；附带需要淘汰的其余成员（事件名，监听器）
    Won(Vec<(String, ListenerId)>),
    /// 已有其他成员胜出
    Lost(ListenerId),
}

#[derive(Debug, Default)]
pub(crate) struct RaceGroup {
    members: Mutex<Vec<(String, ListenerId)>>,
    winner: Mutex<Option<ListenerId>>,
}

impl RaceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enlist(&self, event_name: &str, id: ListenerId) {
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event_name.to_string(), id));
    }

    /// 认领胜利；同一成员重复认领仍视为胜出且不再返回淘汰名单
    pub fn claim(&self, id: ListenerId) -> Claim {
        let mut winner = self.winner.lock().unwrap_or_else(PoisonError::into_inner);
        match *winner {
            Some(current) if current == id => Claim::Won(Vec::new()),
            Some(current) => Claim::Lost(current),
            None => {
                *winner = Some(id);
                drop(winner);
                let losers = self
                    .members
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .filter(|(_, member)| *member != id)
                    .cloned()
                    .collect();
                Claim::Won(losers)
            }
        }
    }

    pub fn winner(&self) -> Option<ListenerId> {
        *self.winner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
