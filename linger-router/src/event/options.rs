//! 事件选项
//!
use crate::timer::MAX_DELAY;
use bon::Builder;
use std::time::Duration;

/// 滞留时长
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Linger {
    /// 不滞留
    Off,
    For(Duration),
    /// 无限滞留（截断到定时器上限）
    Unlimited,
}

impl Linger {
    /// 衰减定时器的延迟；不滞留时为 None
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Off => None,
            Self::For(d) if d.is_zero() => None,
            Self::For(d) => Some((*d).min(MAX_DELAY)),
            Self::Unlimited => Some(MAX_DELAY),
        }
    }
}

impl From<Duration> for Linger {
    fn from(value: Duration) -> Self {
        Self::For(value)
    }
}

/// 事件选项（部分）
#[derive(Builder, Default, Debug, Clone)]
pub struct EventOptions {
    #[builder(into)]
    linger: Option<Linger>,
    /// 诱饵：只供一个后来的监听器消费，消费后立即丢弃
    bait: Option<bool>,
    /// 广播范围描述，例如 `"first-parent"`、`"broadcast"`
    #[builder(into)]
    range: Option<String>,
    /// 链式分发：每个监听器的输出作为下一个监听器的输入
    chain: Option<bool>,
    /// 未被消费时以 `Unconsumed` 拒绝
    reject_unconsumed: Option<bool>,
    locally_exclusive: Option<bool>,
    globally_exclusive: Option<bool>,
    replace: Option<bool>,
    trace: Option<bool>,
}

/// 事件设置（完整）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventSettings {
    pub linger: Linger,
    pub bait: bool,
    pub range: Option<String>,
    pub chain: bool,
    pub reject_unconsumed: bool,
    pub locally_exclusive: bool,
    pub globally_exclusive: bool,
    pub replace: bool,
    pub trace: bool,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            linger: Linger::For(Duration::from_millis(500)),
            bait: false,
            range: None,
            chain: false,
            reject_unconsumed: false,
            locally_exclusive: false,
            globally_exclusive: false,
            replace: false,
            trace: false,
        }
    }
}

impl EventSettings {
    /// 以 `overrides` 中给出的字段覆盖当前设置；诱饵未指定滞留时长时视为无限滞留
    pub fn merge(&self, overrides: &EventOptions) -> Self {
        let o = overrides;
        let bait = o.bait.unwrap_or(self.bait);
        let linger = match o.linger {
            Some(linger) => linger,
            None if bait => Linger::Unlimited,
            None => self.linger,
        };
        Self {
            linger,
            bait,
            range: o.range.clone().or_else(|| self.range.clone()),
            chain: o.chain.unwrap_or(self.chain),
            reject_unconsumed: o.reject_unconsumed.unwrap_or(self.reject_unconsumed),
            locally_exclusive: o.locally_exclusive.unwrap_or(self.locally_exclusive),
            globally_exclusive: o.globally_exclusive.unwrap_or(self.globally_exclusive),
            replace: o.replace.unwrap_or(self.replace),
            trace: o.trace.unwrap_or(self.trace),
        }
    }

    pub fn is_exclusive(&self) -> bool {
        self.locally_exclusive || self.globally_exclusive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bait_without_linger_is_unlimited() {
        let merged = EventSettings::default().merge(&EventOptions::builder().bait(true).build());
        assert_eq!(merged.linger, Linger::Unlimited);
        assert_eq!(merged.linger.delay(), Some(MAX_DELAY));

        let explicit = EventSettings::default().merge(
            &EventOptions::builder()
                .bait(true)
                .linger(Duration::from_millis(50))
                .build(),
        );
        assert_eq!(explicit.linger, Linger::For(Duration::from_millis(50)));
    }

    #[test]
    fn zero_linger_means_off() {
        assert_eq!(Linger::For(Duration::ZERO).delay(), None);
        assert_eq!(Linger::Off.delay(), None);
        assert_eq!(
            EventSettings::default().linger.delay(),
            Some(Duration::from_millis(500))
        );
    }
}
