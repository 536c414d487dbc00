use super::PhyloLikelihood;
use crate::engine::error::EngineError;

impl PhyloLikelihood {
    /// Pattern index of an alignment site.
    pub fn site_index(&self, site: usize) -> Result<usize, EngineError> {
        Ok(self.data.patterns().pattern_of_site(site)?)
    }

    /// Likelihood of every site, in alignment order.
    pub fn likelihood_for_each_site(&self) -> Vec<f64> {
        self.log_likelihood_for_each_site().into_iter().map(f64::exp).collect()
    }

    /// Log-likelihood of every site, in alignment order.
    pub fn log_likelihood_for_each_site(&self) -> Vec<f64> {
        let likelihoods = self.data.pattern_likelihoods(
            self.data.root_partials(&self.tree),
            &self.class_root_frequencies(),
            &self.class_probabilities(),
        );
        let scales = self.data.total_log_scales();
        let per_pattern: Vec<f64> = likelihoods.iter().zip(&scales).map(|(l, s)| l.ln() + s).collect();
        self.expand(&per_pattern)
    }

    /// `[site][class]` likelihoods conditional on each site class.
    pub fn likelihood_for_each_site_for_each_class(&self) -> Vec<Vec<f64>> {
        let per_pattern = self.data.class_likelihoods(
            self.data.root_partials(&self.tree),
            &self.class_root_frequencies(),
        );
        let scales = self.data.total_log_scales();
        let per_pattern: Vec<Vec<f64>> = per_pattern
            .into_iter()
            .zip(&scales)
            .map(|(classes, s)| classes.into_iter().map(|l| l * s.exp()).collect())
            .collect();
        self.expand(&per_pattern)
    }

    /// `[site][state]` likelihoods conditional on each root state, mixed
    /// over site classes.
    pub fn likelihood_for_each_site_for_each_state(&self) -> Vec<Vec<f64>> {
        let probabilities = self.class_probabilities();
        self.likelihood_for_each_site_for_each_class_for_each_state()
            .into_iter()
            .map(|classes| {
                let states = classes.first().map_or(0, Vec::len);
                (0..states)
                    .map(|s| classes.iter().zip(&probabilities).map(|(c, p)| p * c[s]).sum())
                    .collect()
            })
            .collect()
    }

    /// `[site][class][state]` likelihoods conditional on a site class and a
    /// root state.
    pub fn likelihood_for_each_site_for_each_class_for_each_state(&self) -> Vec<Vec<Vec<f64>>> {
        let root = self.data.root_partials(&self.tree);
        let classes = self.data.number_of_classes();
        let states = self.model_set.number_of_states();
        let scales = self.data.total_log_scales();
        let per_pattern: Vec<Vec<Vec<f64>>> = scales
            .iter()
            .enumerate()
            .map(|(p, s)| {
                let factor = s.exp();
                (0..classes)
                    .map(|c| {
                        let offset = (p * classes + c) * states;
                        root[offset..offset + states].iter().map(|x| x * factor).collect()
                    })
                    .collect()
            })
            .collect();
        self.expand(&per_pattern)
    }

    /// `[site][class]` posterior probability of each site class.
    pub fn posterior_probabilities_of_each_class(&self) -> Vec<Vec<f64>> {
        let probabilities = self.class_probabilities();
        // Scale factors cancel in the ratio.
        let per_pattern: Vec<Vec<f64>> = self
            .data
            .class_likelihoods(self.data.root_partials(&self.tree), &self.class_root_frequencies())
            .into_iter()
            .map(|classes| {
                let joint: Vec<f64> = classes.iter().zip(&probabilities).map(|(l, p)| l * p).collect();
                let total: f64 = joint.iter().sum();
                joint.into_iter().map(|j| j / total).collect()
            })
            .collect();
        self.expand(&per_pattern)
    }

    /// Index of the most probable site class at every site.
    pub fn class_with_max_post_prob_of_each_site(&self) -> Vec<usize> {
        self.posterior_probabilities_of_each_class()
            .iter()
            .map(|posteriors| {
                posteriors
                    .iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (c, &p)| if p > best.1 { (c, p) } else { best })
                    .0
            })
            .collect()
    }

    /// Posterior mean rate of every site.
    pub fn posterior_rate_of_each_site(&self) -> Vec<f64> {
        let rates = self.class_rates();
        self.posterior_probabilities_of_each_class()
            .iter()
            .map(|posteriors| posteriors.iter().zip(&rates).map(|(p, r)| p * r).sum())
            .collect()
    }

    fn expand<T: Clone>(&self, per_pattern: &[T]) -> Vec<T> {
        self.data
            .patterns()
            .site_to_pattern()
            .iter()
            .map(|&p| per_pattern[p].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{alignment, five_taxa, homogeneous};
    use crate::core::alphabet::Alphabet;
    use crate::core::models::{GammaDiscreteDistribution, NucleotideModel, NucleotideModelKind};
    use crate::core::tree::parse_newick;
    use crate::engine::error::EngineError;
    use crate::engine::likelihood::PhyloLikelihood;

    fn gamma_likelihood() -> PhyloLikelihood {
        let tree = parse_newick("((A:0.1,B:0.2):0.05,C:0.3,(D:0.1,E:0.1):0.2);").unwrap();
        let model = NucleotideModel::new(NucleotideModelKind::K80, Alphabet::Dna);
        PhyloLikelihood::homogeneous(
            tree,
            five_taxa(),
            Box::new(model),
            Box::new(GammaDiscreteDistribution::new(4, 0.5).unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn identical_sites_share_their_likelihood() {
        let lik = homogeneous(
            "(A:0.1,B:0.1,C:0.1);",
            alignment(&[("A", "ACA"), ("B", "ACA"), ("C", "AGA")]),
            NucleotideModelKind::Jc69,
        );
        let sites = lik.likelihood_for_each_site();
        assert_eq!(sites.len(), 3);
        assert_eq!(sites[0], sites[2]);
        assert_eq!(lik.site_index(0).unwrap(), lik.site_index(2).unwrap());
        assert!(matches!(lik.site_index(3), Err(EngineError::Data(_))));
    }

    #[test]
    fn class_and_state_views_are_consistent() {
        let lik = gamma_likelihood();
        let sites = lik.likelihood_for_each_site();
        let per_class = lik.likelihood_for_each_site_for_each_class();
        let probabilities = lik.rate_distribution().probabilities().to_vec();
        for (site, classes) in per_class.iter().enumerate() {
            let mixed: f64 = classes.iter().zip(&probabilities).map(|(l, p)| l * p).sum();
            assert!(((mixed - sites[site]) / sites[site]).abs() < 1e-10);
        }
        let per_state = lik.likelihood_for_each_site_for_each_state();
        for (site, states) in per_state.iter().enumerate() {
            let mixed: f64 = states.iter().map(|l| 0.25 * l).sum();
            assert!(((mixed - sites[site]) / sites[site]).abs() < 1e-10);
        }
    }

    #[test]
    fn posteriors_are_distributions() {
        let lik = gamma_likelihood();
        let categories = lik.rate_distribution().categories().to_vec();
        for posteriors in lik.posterior_probabilities_of_each_class() {
            assert!((posteriors.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
        let best = lik.class_with_max_post_prob_of_each_site();
        assert!(best.iter().all(|&c| c < 4));
        for rate in lik.posterior_rate_of_each_site() {
            assert!(rate >= categories[0] - 1e-12 && rate <= categories[3] + 1e-12);
        }
    }
}
