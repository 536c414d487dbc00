use crate::core::tree::NodeId;
use nalgebra::DMatrix;
use std::collections::HashMap;

/// Transition matrices of every branch, one per rate class.
///
/// Entries are replaced whenever the branch length, the model of the branch
/// or the rate distribution changes; derivative matrices are computed on
/// demand and never cached.
#[derive(Debug, Default, Clone)]
pub struct TransitionCache {
    data: HashMap<NodeId, Vec<DMatrix<f64>>>,
}

impl TransitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: NodeId, matrices: Vec<DMatrix<f64>>) {
        self.data.insert(node, matrices);
    }

    /// Matrices of the branch above `node`, indexed by rate class.
    pub fn get(&self, node: NodeId) -> Option<&[DMatrix<f64>]> {
        self.data.get(&node).map(Vec::as_slice)
    }

    pub fn class(&self, node: NodeId, class: usize) -> Option<&DMatrix<f64>> {
        self.data.get(&node).and_then(|m| m.get(class))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_one_matrix_per_class() {
        let mut cache = TransitionCache::new();
        cache.insert(3, vec![DMatrix::identity(4, 4), DMatrix::zeros(4, 4)]);
        assert_eq!(cache.get(3).map(<[_]>::len), Some(2));
        assert_eq!(cache.class(3, 0), Some(&DMatrix::identity(4, 4)));
        assert!(cache.class(3, 2).is_none());
        assert!(cache.get(1).is_none());
        cache.clear();
        assert!(cache.is_empty());
    }
}
