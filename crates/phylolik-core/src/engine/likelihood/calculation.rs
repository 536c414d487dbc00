use crate::core::data::{Alignment, SitePatterns};
use crate::core::tree::{NodeId, Tree};
use crate::engine::cache::TransitionCache;
use crate::engine::error::EngineError;
use nalgebra::DMatrix;
use std::collections::BTreeSet;

/// Partials whose largest entry falls below this value are rescaled.
const SCALING_THRESHOLD: f64 = 1e-100;

/// Conditional likelihood arrays of every node of a tree.
///
/// `partials[node]` holds, for every pattern, rate class and state, the
/// probability of the data below `node` given that state at `node`, divided
/// by `exp(log_scales[node][pattern])`. Since each node stores partials built
/// from the already-rescaled partials of its children, the true root
/// likelihood of a pattern is the stored one times the exponential of the
/// sum of the log-scales of all nodes.
#[derive(Debug, Clone)]
pub(crate) struct LikelihoodData {
    patterns: SitePatterns,
    classes: usize,
    states: usize,
    partials: Vec<Vec<f64>>,
    log_scales: Vec<Vec<f64>>,
}

impl LikelihoodData {
    /// Compresses `alignment` on the leaves of `tree` and initializes the
    /// leaf partials. Internal partials are left at zero until computed.
    pub(crate) fn new(tree: &Tree, alignment: &Alignment, classes: usize, states: usize) -> Result<Self, EngineError> {
        let leaves = tree.leaves();
        let mut names = Vec::with_capacity(leaves.len());
        for &leaf in &leaves {
            let name = tree.node(leaf)?.name.clone().ok_or_else(|| {
                EngineError::Initialization(format!("leaf {leaf} has no name to match a sequence"))
            })?;
            names.push(name);
        }
        let patterns = SitePatterns::compress(alignment, &names)?;
        let n_patterns = patterns.number_of_patterns();
        let block = n_patterns * classes * states;

        let mut partials = vec![Vec::new(); tree.number_of_nodes()];
        for node in tree.postorder() {
            partials[node] = vec![0.0; block];
        }
        for (leaf_index, &leaf) in leaves.iter().enumerate() {
            let observed = patterns.leaf_states(leaf_index);
            let partial = &mut partials[leaf];
            for (p, set) in observed.iter().enumerate() {
                for c in 0..classes {
                    for s in 0..states {
                        partial[(p * classes + c) * states + s] = if set.contains(s) { 1.0 } else { 0.0 };
                    }
                }
            }
        }
        Ok(Self {
            patterns,
            classes,
            states,
            partials,
            log_scales: vec![vec![0.0; n_patterns]; tree.number_of_nodes()],
        })
    }

    pub(crate) fn patterns(&self) -> &SitePatterns {
        &self.patterns
    }

    pub(crate) fn number_of_patterns(&self) -> usize {
        self.patterns.number_of_patterns()
    }

    pub(crate) fn number_of_classes(&self) -> usize {
        self.classes
    }

    fn index(&self, pattern: usize, class: usize, state: usize) -> usize {
        (pattern * self.classes + class) * self.states + state
    }

    /// Recomputes every internal node.
    pub(crate) fn compute_all(&mut self, tree: &Tree, transitions: &TransitionCache) -> Result<(), EngineError> {
        for node in tree.postorder() {
            if !tree.is_leaf(node)? {
                self.compute_node(tree, node, transitions)?;
            }
        }
        Ok(())
    }

    /// Recomputes the internal nodes of `dirty`, children before parents.
    ///
    /// `dirty` must be closed upwards: every ancestor of a dirty node is
    /// dirty too.
    pub(crate) fn compute_dirty(
        &mut self,
        tree: &Tree,
        transitions: &TransitionCache,
        dirty: &BTreeSet<NodeId>,
    ) -> Result<(), EngineError> {
        for node in tree.postorder() {
            if dirty.contains(&node) && !tree.is_leaf(node)? {
                self.compute_node(tree, node, transitions)?;
            }
        }
        Ok(())
    }

    fn compute_node(&mut self, tree: &Tree, node: NodeId, transitions: &TransitionCache) -> Result<(), EngineError> {
        let (classes, states) = (self.classes, self.states);
        let mut partial = vec![1.0; self.partials[node].len()];
        for &child in tree.children(node)? {
            let matrices = transitions
                .get(child)
                .ok_or_else(|| EngineError::Internal(format!("no transition matrix for node {child}")))?;
            multiply_child(&mut partial, &self.partials[child], matrices, classes, states);
        }
        self.log_scales[node] = rescale(&mut partial, classes * states);
        self.partials[node] = partial;
        Ok(())
    }

    /// Sum over all nodes of the log-scales of each pattern.
    pub(crate) fn total_log_scales(&self) -> Vec<f64> {
        let mut total = vec![0.0; self.number_of_patterns()];
        for scales in &self.log_scales {
            for (t, s) in total.iter_mut().zip(scales) {
                *t += s;
            }
        }
        total
    }

    /// Stored (rescaled) root partials.
    pub(crate) fn root_partials(&self, tree: &Tree) -> &[f64] {
        &self.partials[tree.root()]
    }

    /// Per-pattern, per-class likelihoods at the root, in the rescaled unit:
    /// `Σ_s π_{c,s} · partial[p][c][s]`, with one root distribution per class.
    pub(crate) fn class_likelihoods(&self, root: &[f64], root_frequencies: &[Vec<f64>]) -> Vec<Vec<f64>> {
        (0..self.number_of_patterns())
            .map(|p| {
                root_frequencies
                    .iter()
                    .take(self.classes)
                    .enumerate()
                    .map(|(c, frequencies)| {
                        frequencies
                            .iter()
                            .enumerate()
                            .map(|(s, f)| f * root[self.index(p, c, s)])
                            .sum()
                    })
                    .collect()
            })
            .collect()
    }

    /// Per-pattern likelihoods in the rescaled unit, mixed over classes.
    pub(crate) fn pattern_likelihoods(
        &self,
        root: &[f64],
        root_frequencies: &[Vec<f64>],
        class_probabilities: &[f64],
    ) -> Vec<f64> {
        self.class_likelihoods(root, root_frequencies)
            .into_iter()
            .map(|per_class| per_class.iter().zip(class_probabilities).map(|(l, w)| l * w).sum())
            .collect()
    }

    /// Root partials of the tree in which the branch above `node` uses
    /// `replacement` instead of its transition matrices.
    ///
    /// Only the path from `node` to the root is recomputed, and each node of
    /// the path is divided by its stored scale, so the result is in the same
    /// unit as [`Self::root_partials`]. Feeding derivative matrices yields
    /// the derivative of the root partials with respect to the branch length.
    pub(crate) fn root_partials_with_branch(
        &self,
        tree: &Tree,
        transitions: &TransitionCache,
        node: NodeId,
        replacement: &[DMatrix<f64>],
    ) -> Result<Vec<f64>, EngineError> {
        let (classes, states) = (self.classes, self.states);
        let mut below = node;
        let mut modified: Option<Vec<f64>> = None;
        while let Some(parent) = tree.parent(below)? {
            let mut partial = vec![1.0; self.partials[parent].len()];
            for &child in tree.children(parent)? {
                if child != below {
                    let matrices = transitions
                        .get(child)
                        .ok_or_else(|| EngineError::Internal(format!("no transition matrix for node {child}")))?;
                    multiply_child(&mut partial, &self.partials[child], matrices, classes, states);
                } else if let Some(child_partial) = modified.as_deref() {
                    let matrices = transitions
                        .get(child)
                        .ok_or_else(|| EngineError::Internal(format!("no transition matrix for node {child}")))?;
                    multiply_child(&mut partial, child_partial, matrices, classes, states);
                } else {
                    multiply_child(&mut partial, &self.partials[child], replacement, classes, states);
                }
            }
            let block = classes * states;
            for (p, scale) in self.log_scales[parent].iter().enumerate() {
                let factor = (-scale).exp();
                partial[p * block..(p + 1) * block].iter_mut().for_each(|x| *x *= factor);
            }
            modified = Some(partial);
            below = parent;
        }
        modified.ok_or_else(|| EngineError::Internal(format!("node {node} has no branch")))
    }
}

/// `partial[p][c][s] *= Σ_j P_c[s][j] · child[p][c][j]`
fn multiply_child(partial: &mut [f64], child: &[f64], matrices: &[DMatrix<f64>], classes: usize, states: usize) {
    let block = classes * states;
    let patterns = partial.len() / block.max(1);
    for p in 0..patterns {
        for (c, matrix) in matrices.iter().enumerate().take(classes) {
            let offset = (p * classes + c) * states;
            let below = &child[offset..offset + states];
            for s in 0..states {
                let mut sum = 0.0;
                for (j, b) in below.iter().enumerate() {
                    sum += matrix[(s, j)] * b;
                }
                partial[offset + s] *= sum;
            }
        }
    }
}

/// Divides each pattern block by its largest entry when that entry is tiny
/// and returns the natural log of the factors.
fn rescale(partial: &mut [f64], block: usize) -> Vec<f64> {
    partial
        .chunks_mut(block.max(1))
        .map(|chunk| {
            let max = chunk.iter().copied().fold(0.0, f64::max);
            if max > 0.0 && max < SCALING_THRESHOLD {
                chunk.iter_mut().for_each(|x| *x /= max);
                max.ln()
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescaling_only_touches_tiny_blocks() {
        let mut partial = vec![1e-120, 2e-120, 0.5, 0.25];
        let scales = rescale(&mut partial, 2);
        assert!((partial[1] - 1.0).abs() < 1e-12);
        assert!((partial[0] - 0.5).abs() < 1e-12);
        assert!((scales[0] - 2e-120_f64.ln()).abs() < 1e-9);
        assert_eq!(scales[1], 0.0);
        assert_eq!(partial[2], 0.5);
    }

    #[test]
    fn child_contribution_is_a_matrix_vector_product() {
        let mut partial = vec![1.0; 2];
        let child = vec![1.0, 0.0];
        let p = DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.2, 0.8]);
        multiply_child(&mut partial, &child, &[p], 1, 2);
        assert_eq!(partial, vec![0.9, 0.2]);
    }
}
