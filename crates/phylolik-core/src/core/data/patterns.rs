use super::DataError;
use super::alignment::Alignment;
use crate::core::alphabet::StateSet;
use std::collections::HashMap;

/// An alignment compressed into its distinct columns.
///
/// Leaves are indexed in the order given at compression time; each pattern
/// remembers how many sites it stands for, and every site remembers its
/// pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct SitePatterns {
    leaf_names: Vec<String>,
    /// `[leaf][pattern]`
    states: Vec<Vec<StateSet>>,
    weights: Vec<f64>,
    site_to_pattern: Vec<usize>,
}

impl SitePatterns {
    /// Compresses the columns of `alignment` restricted to `leaf_names`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MissingSequence`] if a leaf has no sequence and
    /// [`DataError::Empty`] if the alignment has no site.
    pub fn compress<S: AsRef<str>>(
        alignment: &Alignment,
        leaf_names: &[S],
    ) -> Result<Self, DataError> {
        let columns: Vec<&[StateSet]> = leaf_names
            .iter()
            .map(|n| {
                alignment
                    .states(n.as_ref())
                    .ok_or_else(|| DataError::MissingSequence {
                        name: n.as_ref().to_string(),
                    })
            })
            .collect::<Result<_, _>>()?;
        let n_sites = alignment.number_of_sites();
        if n_sites == 0 {
            return Err(DataError::Empty);
        }

        let mut index: HashMap<Vec<StateSet>, usize> = HashMap::new();
        let mut states: Vec<Vec<StateSet>> = vec![Vec::new(); leaf_names.len()];
        let mut weights = Vec::new();
        let mut site_to_pattern = Vec::with_capacity(n_sites);

        for site in 0..n_sites {
            let column: Vec<StateSet> = columns.iter().map(|seq| seq[site]).collect();
            let pattern = match index.get(&column) {
                Some(&p) => {
                    weights[p] += 1.0;
                    p
                }
                None => {
                    let p = weights.len();
                    for (leaf, &s) in column.iter().enumerate() {
                        states[leaf].push(s);
                    }
                    weights.push(1.0);
                    index.insert(column, p);
                    p
                }
            };
            site_to_pattern.push(pattern);
        }

        Ok(Self {
            leaf_names: leaf_names.iter().map(|n| n.as_ref().to_string()).collect(),
            states,
            weights,
            site_to_pattern,
        })
    }

    pub fn leaf_names(&self) -> &[String] {
        &self.leaf_names
    }

    pub fn number_of_patterns(&self) -> usize {
        self.weights.len()
    }

    pub fn number_of_sites(&self) -> usize {
        self.site_to_pattern.len()
    }

    /// Multiplicity of each pattern.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn site_to_pattern(&self) -> &[usize] {
        &self.site_to_pattern
    }

    /// Pattern index of `site`.
    pub fn pattern_of_site(&self, site: usize) -> Result<usize, DataError> {
        self.site_to_pattern
            .get(site)
            .copied()
            .ok_or(DataError::SiteOutOfRange {
                site,
                len: self.site_to_pattern.len(),
            })
    }

    /// Observed states of leaf `leaf` for every pattern.
    pub fn leaf_states(&self, leaf: usize) -> &[StateSet] {
        &self.states[leaf]
    }

    pub fn leaf_index(&self, name: &str) -> Option<usize> {
        self.leaf_names.iter().position(|n| n == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alphabet::Alphabet;

    fn alignment() -> Alignment {
        Alignment::from_pairs(
            Alphabet::Dna,
            [("a", "AACGA"), ("b", "AACGA"), ("c", "ATCTA")],
        )
        .unwrap()
    }

    #[test]
    fn identical_columns_share_a_pattern() {
        let p = SitePatterns::compress(&alignment(), &["a", "b", "c"]).unwrap();
        assert_eq!(p.number_of_patterns(), 4);
        assert_eq!(p.number_of_sites(), 5);
        assert_eq!(p.site_to_pattern(), &[0, 1, 2, 3, 0]);
        assert_eq!(p.weights(), &[2.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn weights_sum_to_the_number_of_sites() {
        let p = SitePatterns::compress(&alignment(), &["c", "a"]).unwrap();
        let total: f64 = p.weights().iter().sum();
        assert_eq!(total, 5.0);
    }

    #[test]
    fn leaf_order_follows_the_request() {
        let p = SitePatterns::compress(&alignment(), &["c", "a"]).unwrap();
        assert_eq!(p.leaf_index("a"), Some(1));
        assert_eq!(p.leaf_states(0)[1], StateSet::single(3));
    }

    #[test]
    fn missing_leaf_is_reported() {
        let result = SitePatterns::compress(&alignment(), &["a", "zz"]);
        assert!(matches!(result, Err(DataError::MissingSequence { name }) if name == "zz"));
    }

    #[test]
    fn site_out_of_range_carries_index() {
        let p = SitePatterns::compress(&alignment(), &["a"]).unwrap();
        assert!(matches!(
            p.pattern_of_site(9),
            Err(DataError::SiteOutOfRange { site: 9, len: 5 })
        ));
    }
}
