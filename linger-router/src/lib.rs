//! 层级感知的滞留事件路由器
//!
//! - 监听器按事件名注册，支持独占/替换、once、竞赛、超时、谓词与回调包装；
//! - 发布时按发布方在宿主层级中的位置解析广播范围并分发；
//! - 分发后事件可滞留一段时间，供之后注册的监听器追赶；
//! - 订阅与发布都返回可 `.await` 的结算句柄。
//!

/// 生命周期日志：`trace` 打开时以 info 级别输出，否则为 debug
macro_rules! event_log {
    ($trace:expr, $($arg:tt)+) => {
        if $trace {
            ::tracing::info!($($arg)+);
        } else {
            ::tracing::debug!($($arg)+);
        }
    };
}

pub mod config;
mod dispatch;
pub mod error;
pub mod event;
pub mod hierarchy;
pub mod id;
pub mod listener;
pub mod range;
pub mod router;
pub mod settlement;
pub mod timer;

pub use config::RouterConfig;
pub use error::{EventError, ExclusivityScope, RouterError, RouterResult};
pub use event::{
    Consumer, EmittedEvent, EventHandle, EventOptions, EventSettings, Linger, LingeringEvent,
    chain_results,
};
pub use hierarchy::{Flat, Hierarchy, NodeId, Tree};
pub use id::{EventId, InvocationId, ListenerId, SubscriberId};
pub use listener::{
    Callback, Catchup, EventCallback, EventContext, Invocation, Listener, ListenerInfo,
    ListenerOptions, ListenerSettings, Predicate, Subscription, TimeoutAction, TimeoutCallback,
    Wrapping,
};
pub use range::{AgeOrder, BroadcastRange, Reach};
pub use router::{Participant, Router};
pub use settlement::{Outcome, Settlement, SettlementState};
