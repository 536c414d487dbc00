use super::TreeError;

/// Stable identifier of a node; ids are never reused within a tree.
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Length of the branch leading to the parent.
    pub branch_length: Option<f64>,
    pub name: Option<String>,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A rooted tree stored as an arena of nodes.
///
/// Unrooted trees are represented with a multifurcating root (usually of
/// degree three); the root carries no branch.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Tree {
    /// Creates a tree reduced to its root.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                id: 0,
                parent: None,
                children: Vec::new(),
                branch_length: None,
                name: None,
            }],
            root: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Adds a new node below `parent` and returns its id.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: Option<String>,
        branch_length: Option<f64>,
    ) -> Result<NodeId, TreeError> {
        self.node(parent)?;
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            parent: Some(parent),
            children: Vec::new(),
            branch_length,
            name,
        });
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.nodes.get(id).ok_or(TreeError::NodeNotFound { id })
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.nodes.get_mut(id).ok_or(TreeError::NodeNotFound { id })
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn number_of_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_leaf(&self, id: NodeId) -> Result<bool, TreeError> {
        Ok(self.node(id)?.is_leaf())
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, TreeError> {
        Ok(self.node(id)?.parent)
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId], TreeError> {
        Ok(&self.node(id)?.children)
    }

    /// Every node except the root, i.e. every node carrying a branch.
    pub fn branch_nodes(&self) -> Vec<NodeId> {
        self.postorder()
            .into_iter()
            .filter(|&id| id != self.root)
            .collect()
    }

    /// Leaf ids in post-order.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.postorder()
            .into_iter()
            .filter(|&id| self.nodes[id].is_leaf())
            .collect()
    }

    pub fn number_of_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf() && self.is_attached(n.id))
            .count()
    }

    /// Leaf names in post-order; unnamed leaves are reported as their id.
    pub fn leaf_names(&self) -> Vec<String> {
        self.leaves()
            .into_iter()
            .map(|id| {
                self.nodes[id]
                    .name
                    .clone()
                    .unwrap_or_else(|| id.to_string())
            })
            .collect()
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| n.name.as_deref() == Some(name))
            .map(|n| n.id)
    }

    /// Node ids in post-order (children before parents).
    pub fn postorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
            } else {
                stack.push((id, true));
                for &c in self.nodes[id].children.iter().rev() {
                    stack.push((c, false));
                }
            }
        }
        order
    }

    /// Nodes from `id` up to and including the root.
    pub fn path_to_root(&self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        let mut path = vec![id];
        let mut current = self.node(id)?.parent;
        while let Some(p) = current {
            path.push(p);
            current = self.nodes[p].parent;
        }
        Ok(path)
    }

    pub fn branch_length(&self, id: NodeId) -> Result<Option<f64>, TreeError> {
        Ok(self.node(id)?.branch_length)
    }

    pub fn set_branch_length(&mut self, id: NodeId, length: f64) -> Result<(), TreeError> {
        self.node_mut(id)?.branch_length = Some(length);
        Ok(())
    }

    /// Sum of all branch lengths; missing lengths count as zero.
    pub fn total_length(&self) -> f64 {
        self.nodes
            .iter()
            .filter(|n| n.id != self.root)
            .filter_map(|n| n.branch_length)
            .sum()
    }

    /// Multiplies every branch length by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for node in &mut self.nodes {
            if let Some(l) = node.branch_length.as_mut() {
                *l *= factor;
            }
        }
    }

    /// Other children of the parent of `id`.
    pub fn siblings(&self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        match self.node(id)?.parent {
            Some(p) => Ok(self.nodes[p]
                .children
                .iter()
                .copied()
                .filter(|&c| c != id)
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    /// Exchanges the subtrees rooted at `a` and `b`.
    ///
    /// Both nodes keep their branch length. Neither node may be an ancestor of
    /// the other, and neither may be the root.
    pub fn swap_subtrees(&mut self, a: NodeId, b: NodeId) -> Result<(), TreeError> {
        let pa = self.node(a)?.parent.ok_or(TreeError::InvalidMove {
            reason: format!("node {a} is the root"),
        })?;
        let pb = self.node(b)?.parent.ok_or(TreeError::InvalidMove {
            reason: format!("node {b} is the root"),
        })?;
        if a == b || self.path_to_root(a)?.contains(&b) || self.path_to_root(b)?.contains(&a) {
            return Err(TreeError::InvalidMove {
                reason: format!("nodes {a} and {b} are nested"),
            });
        }
        if pa == pb {
            return Ok(());
        }
        for child in self.nodes[pa].children.iter_mut() {
            if *child == a {
                *child = b;
            }
        }
        for child in self.nodes[pb].children.iter_mut() {
            if *child == b {
                *child = a;
            }
        }
        self.nodes[a].parent = Some(pb);
        self.nodes[b].parent = Some(pa);
        Ok(())
    }

    fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.root {
                return true;
            }
            match self.nodes[current].parent {
                Some(p) => current = p,
                None => return false,
            }
        }
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ((A,B)x,C,D) with x = node 1.
    fn quartet() -> Tree {
        let mut t = Tree::new();
        let x = t.add_child(0, None, Some(0.1)).unwrap();
        t.add_child(x, Some("A".into()), Some(0.2)).unwrap();
        t.add_child(x, Some("B".into()), Some(0.3)).unwrap();
        t.add_child(0, Some("C".into()), Some(0.4)).unwrap();
        t.add_child(0, Some("D".into()), Some(0.5)).unwrap();
        t
    }

    #[test]
    fn postorder_visits_children_first() {
        let t = quartet();
        assert_eq!(t.postorder(), vec![2, 3, 1, 4, 5, 0]);
        assert_eq!(t.leaf_names(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn swap_subtrees_moves_nodes_between_parents() {
        let mut t = quartet();
        let a = t.node_by_name("A").unwrap();
        let c = t.node_by_name("C").unwrap();
        t.swap_subtrees(a, c).unwrap();
        assert_eq!(t.parent(a).unwrap(), Some(0));
        assert_eq!(t.parent(c).unwrap(), Some(1));
        assert_eq!(t.branch_length(a).unwrap(), Some(0.2));
        assert_eq!(t.number_of_leaves(), 4);
    }

    #[test]
    fn swapping_nested_nodes_is_rejected() {
        let mut t = quartet();
        let a = t.node_by_name("A").unwrap();
        assert!(matches!(
            t.swap_subtrees(1, a),
            Err(TreeError::InvalidMove { .. })
        ));
    }

    #[test]
    fn unknown_node_reports_id() {
        let t = quartet();
        assert!(matches!(t.node(42), Err(TreeError::NodeNotFound { id: 42 })));
    }

    #[test]
    fn scale_multiplies_all_lengths() {
        let mut t = quartet();
        let before = t.total_length();
        t.scale(2.0);
        assert!((t.total_length() - 2.0 * before).abs() < 1e-12);
    }
}
