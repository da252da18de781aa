//! 广播范围（BroadcastRange）
//!
//! 由范围描述（如 `"first-parent"`、`"descendants"`、`"broadcast"`）解析而来，
//! 按发布方层级从监听器列表中选出分组：向上（由近及远）、同层、向下（由近及远）。
//! 带 `stop` 时，分发在第一个实际执行了监听器的分组之后停止。
//!
//! 描述以 `-`、`,` 或空白分隔，单数形式表示"仅最近一层"并带 `stop`，复数形式不带。
//!
use crate::error::{RouterError, RouterResult};
use crate::hierarchy::NodeId;
use crate::id::SubscriberId;
use crate::listener::Listener;
use std::str::FromStr;
use std::sync::Arc;

/// 某一方向上的范围
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Reach {
    #[default]
    None,
    /// 最近的一个有监听器的层级
    Nearest,
    Unbounded,
}

impl Reach {
    fn widen(self, other: Reach) -> Reach {
        match (self, other) {
            (Reach::Unbounded, _) | (_, Reach::Unbounded) => Reach::Unbounded,
            (Reach::Nearest, _) | (_, Reach::Nearest) => Reach::Nearest,
            _ => Reach::None,
        }
    }
}

/// 按注册时间排序
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgeOrder {
    Oldest,
    Youngest,
}

/// 已解析的广播范围
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastRange {
    pub up: Reach,
    pub down: Reach,
    /// 同层其他订阅方
    pub sides: bool,
    /// 同层发布方自身
    pub include_self: bool,
    /// 只投递给发布方自身
    pub self_only: bool,
    pub stop: bool,
    pub age: Option<AgeOrder>,
    /// 按年龄排序后保留整列（`from-oldest`），否则只取最极端的一个
    pub full_run: bool,
}

impl Default for BroadcastRange {
    /// 最近的父级，没有则最近的同级，命中即停
    fn default() -> Self {
        Self {
            up: Reach::Nearest,
            down: Reach::None,
            sides: true,
            include_self: false,
            self_only: false,
            stop: true,
            age: None,
            full_run: false,
        }
    }
}

/// 发布方位置
#[derive(Clone, Copy, Debug)]
pub struct Emitter<'a> {
    pub id: &'a SubscriberId,
    pub origin: Option<NodeId>,
    pub level: u32,
}

impl Emitter<'_> {
    fn owns(&self, listener: &Listener) -> bool {
        match (self.origin, listener.origin()) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => listener.subscriber() == self.id,
        }
    }
}

impl BroadcastRange {
    pub fn parse(spec: &str) -> RouterResult<Self> {
        let tokens: Vec<&str> = spec
            .split(|c: char| c == '-' || c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return Ok(Self::default());
        }

        let mut range = Self {
            up: Reach::None,
            down: Reach::None,
            sides: false,
            include_self: false,
            self_only: false,
            stop: false,
            age: None,
            full_run: false,
        };
        let mut directed = false;
        let mut wants_self = false;

        for token in &tokens {
            match token.to_ascii_lowercase().as_str() {
                "child" => {
                    range.down = range.down.widen(Reach::Nearest);
                    range.stop = true;
                    directed = true;
                }
                "children" => {
                    range.down = range.down.widen(Reach::Nearest);
                    directed = true;
                }
                "descendant" | "descendent" => {
                    range.down = Reach::Unbounded;
                    range.stop = true;
                    directed = true;
                }
                "descendants" | "descendents" => {
                    range.down = Reach::Unbounded;
                    directed = true;
                }
                "parent" => {
                    range.up = range.up.widen(Reach::Nearest);
                    range.stop = true;
                    directed = true;
                }
                "parents" => {
                    range.up = range.up.widen(Reach::Nearest);
                    directed = true;
                }
                "ancestor" => {
                    range.up = Reach::Unbounded;
                    range.stop = true;
                    directed = true;
                }
                "ancestors" => {
                    range.up = Reach::Unbounded;
                    directed = true;
                }
                "sibling" => {
                    range.sides = true;
                    range.stop = true;
                    directed = true;
                }
                "siblings" => {
                    range.sides = true;
                    directed = true;
                }
                "kin" | "family" => {
                    range.up = range.up.widen(Reach::Nearest);
                    range.down = range.down.widen(Reach::Nearest);
                    range.sides = true;
                    range.stop = true;
                    directed = true;
                }
                "kins" | "families" => {
                    range.up = range.up.widen(Reach::Nearest);
                    range.down = range.down.widen(Reach::Nearest);
                    range.sides = true;
                    directed = true;
                }
                "broadcast" => {
                    range.up = Reach::Unbounded;
                    range.down = Reach::Unbounded;
                    range.sides = true;
                    range.include_self = true;
                    directed = true;
                }
                "self" => wants_self = true,
                "self_only" => range.self_only = true,
                "first" | "1st" => range.stop = true,
                "oldest" => range.age = Some(AgeOrder::Oldest),
                "youngest" | "newest" => range.age = Some(AgeOrder::Youngest),
                "from" => range.full_run = true,
                _ => {
                    return Err(RouterError::UnknownRangeToken {
                        token: token.to_string(),
                        range: spec.to_string(),
                    });
                }
            }
        }

        if wants_self {
            if directed {
                range.include_self = true;
            } else {
                range.self_only = true;
            }
        } else if !directed && !range.self_only {
            // 只有修饰词（first / oldest 等）时沿用默认方向
            let defaults = Self::default();
            range.up = defaults.up;
            range.sides = defaults.sides;
        }
        Ok(range)
    }

    /// 选出分组；`origin` 为空的发布方不参与层级计算，所有监听器构成一组
    pub fn resolve(
        &self,
        listeners: &[Arc<Listener>],
        emitter: &Emitter<'_>,
    ) -> Vec<Vec<Arc<Listener>>> {
        let active = listeners.iter().filter(|l| l.is_active()).cloned();

        let groups: Vec<Vec<Arc<Listener>>> = if self.self_only {
            vec![active.filter(|l| emitter.owns(l)).collect()]
        } else if emitter.origin.is_none() {
            vec![active.collect()]
        } else {
            self.by_level(active.collect(), emitter)
        };

        let groups: Vec<_> = groups.into_iter().filter(|g| !g.is_empty()).collect();
        match self.age {
            None => groups,
            Some(order) => self.by_age(groups, order),
        }
    }

    /// 是否在首个命中分组后停止
    pub fn stops(&self) -> bool {
        self.stop
    }

    fn by_level(
        &self,
        mut sorted: Vec<Arc<Listener>>,
        emitter: &Emitter<'_>,
    ) -> Vec<Vec<Arc<Listener>>> {
        // 稳定排序，同层保持注册顺序
        sorted.sort_by_key(|l| l.level());
        let lo = sorted.partition_point(|l| l.level() < emitter.level);
        let hi = sorted.partition_point(|l| l.level() <= emitter.level);

        let mut groups = Vec::new();

        let up: Vec<Vec<Arc<Listener>>> = sorted[..lo]
            .chunk_by(|a, b| a.level() == b.level())
            .rev()
            .map(<[_]>::to_vec)
            .collect();
        groups.extend(take_reach(up, self.up));

        let same: Vec<Arc<Listener>> = sorted[lo..hi]
            .iter()
            .filter(|l| {
                if emitter.owns(l) {
                    self.include_self
                } else {
                    self.sides
                }
            })
            .cloned()
            .collect();
        groups.push(same);

        let down: Vec<Vec<Arc<Listener>>> = sorted[hi..]
            .chunk_by(|a, b| a.level() == b.level())
            .map(<[_]>::to_vec)
            .collect();
        groups.extend(take_reach(down, self.down));

        groups
    }

    fn by_age(&self, groups: Vec<Vec<Arc<Listener>>>, order: AgeOrder) -> Vec<Vec<Arc<Listener>>> {
        let mut flat: Vec<Arc<Listener>> = groups.into_iter().flatten().collect();
        flat.sort_by_key(|l| (l.registered_at(), l.id()));
        if order == AgeOrder::Youngest {
            flat.reverse();
        }
        if !self.full_run {
            flat.truncate(1);
        }
        flat.into_iter().map(|l| vec![l]).collect()
    }
}

fn take_reach(groups: Vec<Vec<Arc<Listener>>>, reach: Reach) -> Vec<Vec<Arc<Listener>>> {
    match reach {
        Reach::None => Vec::new(),
        Reach::Nearest => groups.into_iter().take(1).collect(),
        Reach::Unbounded => groups,
    }
}

impl FromStr for BroadcastRange {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
