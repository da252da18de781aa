//! 路由器配置（RouterConfig）
//!
//! 监听器与事件的默认设置，调用方给出的选项在此基础上合并。
//!
use crate::event::EventSettings;
use crate::listener::ListenerSettings;
use bon::Builder;

/// 默认的最大层级深度，超过视为环
pub const DEFAULT_MAX_DEPTH: u32 = 1024;

#[derive(Builder, Clone, Debug)]
pub struct RouterConfig {
    /// 监听器默认设置
    #[builder(default)]
    pub listener_defaults: ListenerSettings,
    /// 事件默认设置（默认滞留 500ms）
    #[builder(default)]
    pub event_defaults: EventSettings,
    /// 计算层级时沿父链行走的最大步数
    #[builder(default = DEFAULT_MAX_DEPTH)]
    pub max_depth: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            listener_defaults: ListenerSettings::default(),
            event_defaults: EventSettings::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Linger;
    use std::time::Duration;

    #[test]
    fn builder_falls_back_to_defaults() {
        let config = RouterConfig::builder()
            .event_defaults(EventSettings {
                linger: Linger::Off,
                ..EventSettings::default()
            })
            .build();

        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.event_defaults.linger, Linger::Off);
        assert_eq!(
            config.listener_defaults.catchup,
            crate::listener::Catchup::Within(Duration::from_millis(100))
        );
    }
}
