//! 监听器选项
//!
//! `ListenerOptions` 为调用方给出的部分选项（全部可选，bon 构建器），
//! `ListenerSettings` 为合并默认值后的完整设置；二者通过纯函数 `merge` 关联。
//!
use super::ListenerInfo;
use super::callback::Predicate;
use bon::Builder;
use serde_json::Value;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

/// 追赶窗口：新监听器仍会收到多"老"的滞留事件
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Catchup {
    /// 不追赶
    Never,
    /// 事件年龄不超过该时长（含边界）
    Within(Duration),
    /// 无条件追赶
    Always,
}

impl Catchup {
    pub fn admits(&self, elapsed: Duration) -> bool {
        match self {
            Self::Never => false,
            Self::Within(window) => elapsed <= *window,
            Self::Always => true,
        }
    }
}

impl From<bool> for Catchup {
    fn from(value: bool) -> Self {
        if value { Self::Always } else { Self::Never }
    }
}

impl From<Duration> for Catchup {
    fn from(value: Duration) -> Self {
        Self::Within(value)
    }
}

/// 回调包装：注册时一次性解析成装饰器
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Wrapping {
    pub debounce: Option<Duration>,
    pub throttle: Option<Duration>,
    pub serial: bool,
}

impl Wrapping {
    pub fn is_plain(&self) -> bool {
        self.debounce.is_none() && self.throttle.is_none() && !self.serial
    }
}

/// 超时后对监听器的处置
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeoutAction {
    /// 退订（默认）
    #[default]
    Unsubscribe,
    /// 保留监听器并重新开始计时
    Keep,
}

/// 超时回调
#[derive(Clone)]
pub struct TimeoutCallback(Arc<dyn Fn(&ListenerInfo) -> TimeoutAction + Send + Sync>);

impl TimeoutCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ListenerInfo) -> TimeoutAction + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn call(&self, info: &ListenerInfo) -> TimeoutAction {
        (self.0)(info)
    }
}

impl Debug for TimeoutCallback {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("TimeoutCallback")
    }
}

/// 监听器选项（部分）
#[derive(Builder, Default, Debug, Clone)]
pub struct ListenerOptions {
    /// 本监听器执行后停止本轮分发
    stop_here: Option<bool>,
    /// 超时时长；到期后执行超时回调并（默认）退订
    timeout: Option<Duration>,
    timeout_callback: Option<TimeoutCallback>,
    /// 超时时若主结果仍未结算则以 `Timeout` 拒绝
    throw_on_timeout: Option<bool>,
    #[builder(into)]
    catchup: Option<Catchup>,
    once: Option<bool>,
    race: Option<bool>,
    predicate: Option<Predicate>,
    locally_exclusive: Option<bool>,
    globally_exclusive: Option<bool>,
    replace: Option<bool>,
    debounce: Option<Duration>,
    throttle: Option<Duration>,
    serial: Option<bool>,
    /// 透传给回调上下文的附加数据
    extra: Option<Value>,
    /// 以 info 级别记录该监听器的生命周期
    trace: Option<bool>,
}

/// 监听器设置（完整）
#[derive(Clone, Debug)]
pub struct ListenerSettings {
    pub stop_here: bool,
    pub timeout: Option<Duration>,
    pub timeout_callback: Option<TimeoutCallback>,
    pub throw_on_timeout: bool,
    pub catchup: Catchup,
    pub once: bool,
    pub race: bool,
    pub predicate: Option<Predicate>,
    pub locally_exclusive: bool,
    pub globally_exclusive: bool,
    pub replace: bool,
    pub wrapping: Wrapping,
    pub extra: Option<Value>,
    pub trace: bool,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            stop_here: false,
            timeout: None,
            timeout_callback: None,
            throw_on_timeout: false,
            catchup: Catchup::Within(Duration::from_millis(100)),
            once: false,
            race: false,
            predicate: None,
            locally_exclusive: false,
            globally_exclusive: false,
            replace: false,
            wrapping: Wrapping::default(),
            extra: None,
            trace: false,
        }
    }
}

impl ListenerSettings {
    /// 以 `overrides` 中给出的字段覆盖当前设置
    pub fn merge(&self, overrides: &ListenerOptions) -> Self {
        let o = overrides;
        Self {
            stop_here: o.stop_here.unwrap_or(self.stop_here),
            timeout: o.timeout.or(self.timeout),
            timeout_callback: o
                .timeout_callback
                .clone()
                .or_else(|| self.timeout_callback.clone()),
            throw_on_timeout: o.throw_on_timeout.unwrap_or(self.throw_on_timeout),
            catchup: o.catchup.unwrap_or(self.catchup),
            once: o.once.unwrap_or(self.once),
            race: o.race.unwrap_or(self.race),
            predicate: o.predicate.clone().or_else(|| self.predicate.clone()),
            locally_exclusive: o.locally_exclusive.unwrap_or(self.locally_exclusive),
            globally_exclusive: o.globally_exclusive.unwrap_or(self.globally_exclusive),
            replace: o.replace.unwrap_or(self.replace),
            wrapping: Wrapping {
                debounce: o.debounce.or(self.wrapping.debounce),
                throttle: o.throttle.or(self.wrapping.throttle),
                serial: o.serial.unwrap_or(self.wrapping.serial),
            },
            extra: o.extra.clone().or_else(|| self.extra.clone()),
            trace: o.trace.unwrap_or(self.trace),
        }
    }

    pub fn is_exclusive(&self) -> bool {
        self.locally_exclusive || self.globally_exclusive
    }
}

impl ListenerOptions {
    /// 强制 once（`subscribe_once` 使用）
    pub(crate) fn force_once(mut self) -> Self {
        self.once = Some(true);
        self
    }
}
