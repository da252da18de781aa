//! 标识符
//!
//! 监听器、调用与事件的标识，以及订阅方/发布方的不透明令牌 `SubscriberId`。
//!
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// 监听器 ID（路由器内单调递增）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

/// 单次回调调用 ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvocationId(pub u64);

/// 事件 ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ListenerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl Display for InvocationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "I{}", self.0)
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// 订阅方/发布方令牌：限定局部独占范围与批量退订
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(Arc<str>);

impl SubscriberId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// 生成一个全新的随机令牌
    pub fn unique() -> Self {
        Self::new(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriberId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SubscriberId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl Display for SubscriberId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_subscriber_ids_differ() {
        let a = SubscriberId::unique();
        let b = SubscriberId::unique();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn subscriber_id_from_str_compares_by_value() {
        assert_eq!(SubscriberId::from("panel"), SubscriberId::new(String::from("panel")));
        assert_eq!(SubscriberId::from("panel").to_string(), "panel");
    }

    #[test]
    fn subscriber_id_serializes_as_plain_string() {
        let id = SubscriberId::from("panel");
        let encoded = serde_json::to_value(&id).unwrap();
        assert_eq!(encoded, serde_json::json!("panel"));
        assert_eq!(serde_json::from_value::<SubscriberId>(encoded).unwrap(), id);
    }
}
