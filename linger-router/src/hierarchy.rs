//! 层级（Hierarchy）
//!
//! 路由器对宿主节点树只依赖一项能力：给定节点返回其父节点（若有）。
//! 节点以稳定标识 `NodeId` 表示；层级为到根节点的距离，根为 0。
//!
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// 宿主节点的稳定标识
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// 父节点查询
pub trait Hierarchy: Send + Sync {
    fn parent(&self, node: NodeId) -> Option<NodeId>;
}

impl<F> Hierarchy for F
where
    F: Fn(NodeId) -> Option<NodeId> + Send + Sync,
{
    fn parent(&self, node: NodeId) -> Option<NodeId> {
        (self)(node)
    }
}

/// 扁平层级：所有节点都位于根层
#[derive(Clone, Copy, Debug, Default)]
pub struct Flat;

impl Hierarchy for Flat {
    fn parent(&self, _node: NodeId) -> Option<NodeId> {
        None
    }
}

/// 以父节点表维护的简单树
#[derive(Debug, Default)]
pub struct Tree {
    parents: DashMap<NodeId, NodeId>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// 将 `child` 挂到 `parent` 之下（覆盖原有父节点）
    pub fn attach(&self, child: NodeId, parent: NodeId) {
        self.parents.insert(child, parent);
    }

    /// 使 `child` 成为根节点
    pub fn detach(&self, child: NodeId) -> Option<NodeId> {
        self.parents.remove(&child).map(|(_, parent)| parent)
    }
}

impl Hierarchy for Tree {
    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.parents.get(&node).map(|p| *p)
    }
}

/// 沿父链计算层级；超过 `max_depth` 视为环并截断
pub(crate) fn level_of(hierarchy: &dyn Hierarchy, node: NodeId, max_depth: u32) -> u32 {
    let mut level = 0;
    let mut current = node;
    while let Some(parent) = hierarchy.parent(current) {
        level += 1;
        if level >= max_depth {
            warn!(node = ?node, max_depth, "hierarchy walk exceeded max depth, truncating");
            break;
        }
        current = parent;
    }
    level
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_levels_follow_parent_links() {
        let tree = Tree::new();
        tree.attach(NodeId(2), NodeId(1));
        tree.attach(NodeId(3), NodeId(2));
        tree.attach(NodeId(4), NodeId(2));

        assert_eq!(level_of(&tree, NodeId(1), 64), 0);
        assert_eq!(level_of(&tree, NodeId(2), 64), 1);
        assert_eq!(level_of(&tree, NodeId(4), 64), 2);

        assert_eq!(tree.detach(NodeId(2)), Some(NodeId(1)));
        assert_eq!(level_of(&tree, NodeId(4), 64), 1);
    }

    #[test]
    fn closures_act_as_hierarchies() {
        let parent_of = |node: NodeId| (node.0 > 0).then(|| NodeId(node.0 - 1));
        assert_eq!(level_of(&parent_of, NodeId(5), 64), 5);
        assert_eq!(level_of(&Flat, NodeId(5), 64), 0);
    }

    #[test]
    fn cycles_are_cut_at_max_depth() {
        let tree = Tree::new();
        tree.attach(NodeId(1), NodeId(2));
        tree.attach(NodeId(2), NodeId(1));
        assert_eq!(level_of(&tree, NodeId(1), 8), 8);
    }
}
