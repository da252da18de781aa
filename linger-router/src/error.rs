//! 路由器统一错误定义
//!
//! - `RouterError`：操作本身被拒绝（注册冲突、范围描述非法、竞赛误用等），同步返回；
//! - `EventError`：结算句柄上的拒绝原因（回调/谓词失败、超时、未被消费等），可克隆，
//!   以便多个观察者共享同一个结果。
//!
use crate::id::ListenerId;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// 独占冲突的范围
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExclusivityScope {
    /// 整个事件名范围内独占
    Global,
    /// 同一订阅方范围内独占
    Local,
}

impl Display for ExclusivityScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Local => f.write_str("local"),
        }
    }
}

/// 同步操作错误
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("event name must not be empty")]
    EmptyEventName,
    #[error("exclusivity conflict: event={event_name}, scope={scope}")]
    ExclusivityConflict {
        event_name: String,
        scope: ExclusivityScope,
    },
    #[error("unknown range token: token={token}, range={range}")]
    UnknownRangeToken { token: String, range: String },
    #[error("race listeners must be once: event={event_name}")]
    RaceWithoutOnce { event_name: String },
    #[error("race needs at least two event names, got {count}")]
    RaceNeedsMultipleNames { count: usize },
}

/// 统一 Result 类型别名
pub type RouterResult<T> = Result<T, RouterError>;

/// 结算拒绝原因
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("listener callback failed: listener={listener}, reason={reason}")]
    Callback { listener: ListenerId, reason: String },
    #[error("listener predicate failed: listener={listener}, reason={reason}")]
    Predicate { listener: ListenerId, reason: String },
    #[error("listener timed out: listener={listener}, after_ms={after_ms}")]
    Timeout { listener: ListenerId, after_ms: u128 },
    #[error("event was not consumed: event={event_name}")]
    Unconsumed { event_name: String },
    #[error("race lost: listener={listener}, winner={winner}")]
    RaceLost {
        listener: ListenerId,
        winner: ListenerId,
    },
    #[error("settlement abandoned before an outcome was produced")]
    Abandoned,
}

impl EventError {
    pub(crate) fn callback(listener: ListenerId, err: &anyhow::Error) -> Self {
        Self::Callback {
            listener,
            reason: format!("{err:#}"),
        }
    }

    pub(crate) fn predicate(listener: ListenerId, err: &anyhow::Error) -> Self {
        Self::Predicate {
            listener,
            reason: format!("{err:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = RouterError::ExclusivityConflict {
            event_name: "menu.open".into(),
            scope: ExclusivityScope::Local,
        };
        assert_eq!(
            err.to_string(),
            "exclusivity conflict: event=menu.open, scope=local"
        );

        let err = EventError::callback(ListenerId(7), &anyhow::anyhow!("boom"));
        assert_eq!(
            err.to_string(),
            "listener callback failed: listener=L7, reason=boom"
        );
    }
}
