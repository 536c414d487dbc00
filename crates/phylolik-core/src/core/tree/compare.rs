use super::TreeError;
use super::arena::Tree;
use std::collections::{BTreeSet, HashMap};

/// Non-trivial bipartitions of the leaf set induced by the branches of `tree`.
///
/// Each split is encoded as the sorted list of leaf indices on the side that
/// does not contain the leaf with index 0, so that the encoding is independent
/// of where the tree is rooted.
fn splits(tree: &Tree, leaf_index: &HashMap<String, usize>) -> Result<BTreeSet<Vec<usize>>, TreeError> {
    let n = leaf_index.len();
    let mut below: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut result = BTreeSet::new();
    for id in tree.postorder() {
        let node = tree.node(id)?;
        let mut set = if node.is_leaf() {
            let name = node.name.clone().unwrap_or_else(|| id.to_string());
            let &leaf = leaf_index
                .get(&name)
                .ok_or(TreeError::LeafSetMismatch { name })?;
            vec![leaf]
        } else {
            let mut set = Vec::new();
            for c in &node.children {
                set.extend(below.remove(c).unwrap_or_default());
            }
            set
        };
        set.sort_unstable();
        if id != tree.root() && set.len() > 1 && set.len() + 1 < n {
            let canonical = if set.first() == Some(&0) {
                (0..n).filter(|i| set.binary_search(i).is_err()).collect()
            } else {
                set.clone()
            };
            result.insert(canonical);
        }
        below.insert(id, set);
    }
    Ok(result)
}

/// Robinson–Foulds distance between two trees on the same leaf set.
///
/// Counts the bipartitions present in exactly one of the two trees. Roots are
/// ignored: a rooted and an unrooted version of the same topology are at
/// distance 0.
///
/// # Errors
///
/// Returns [`TreeError::LeafSetMismatch`] if the leaf names differ.
pub fn robinson_foulds_distance(a: &Tree, b: &Tree) -> Result<usize, TreeError> {
    let mut names_a = a.leaf_names();
    let mut names_b = b.leaf_names();
    names_a.sort();
    names_b.sort();
    if names_a != names_b {
        let name = names_a
            .iter()
            .zip(names_b.iter())
            .find(|(x, y)| x != y)
            .map(|(x, _)| x.clone())
            .or_else(|| names_a.last().cloned())
            .unwrap_or_default();
        return Err(TreeError::LeafSetMismatch { name });
    }
    let leaf_index: HashMap<String, usize> = names_a
        .into_iter()
        .enumerate()
        .map(|(i, n)| (n, i))
        .collect();
    let sa = splits(a, &leaf_index)?;
    let sb = splits(b, &leaf_index)?;
    Ok(sa.symmetric_difference(&sb).count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tree::parse_newick;

    #[test]
    fn same_topology_with_different_rooting_has_zero_distance() {
        let a = parse_newick("((A,B),C,(D,E));").unwrap();
        let b = parse_newick("(((A,B),C),(D,E));").unwrap();
        assert_eq!(robinson_foulds_distance(&a, &b).unwrap(), 0);
    }

    #[test]
    fn one_nni_apart_gives_distance_two() {
        let a = parse_newick("((A,B),C,(D,E));").unwrap();
        let b = parse_newick("((A,C),B,(D,E));").unwrap();
        assert_eq!(robinson_foulds_distance(&a, &b).unwrap(), 2);
    }

    #[test]
    fn child_order_does_not_matter() {
        let a = parse_newick("((A,B),(C,D),E);").unwrap();
        let b = parse_newick("(E,(D,C),(B,A));").unwrap();
        assert_eq!(robinson_foulds_distance(&a, &b).unwrap(), 0);
    }

    #[test]
    fn different_leaf_sets_are_rejected() {
        let a = parse_newick("((A,B),C,D);").unwrap();
        let b = parse_newick("((A,B),C,E);").unwrap();
        assert!(matches!(
            robinson_foulds_distance(&a, &b),
            Err(TreeError::LeafSetMismatch { .. })
        ));
    }
}
