use super::error::EngineError;
use super::function::{Function, TracingListener};
use super::likelihood::{MIN_BRANCH_LENGTH, PhyloLikelihood, branch_length_parameter_name};
use super::optimizers::{
    BrentOneDimension, IterationMode, MetaOptimizer, OptimizerGroup, SimpleMultiDimensions, StopCondition,
};
use super::progress::{Progress, ProgressReporter};
use crate::core::data::Alignment;
use crate::core::models::{DiscreteDistribution, SubstitutionModel};
use crate::core::parameters::ParameterList;
use crate::core::tree::{DistanceMatrix, Tree};
use tracing::{debug, info, instrument, warn};

const INITIAL_DISTANCE: f64 = 0.1;

/// Maximum-likelihood distances between pairs of sequences.
///
/// Each pair is placed on a two-leaf tree; the length of one branch is
/// optimized while the other is held at [`MIN_BRANCH_LENGTH`], and the
/// distance is their sum. Additional model or rate parameters can be
/// re-estimated for every pair; those estimates are not kept.
#[derive(Debug, Clone)]
pub struct DistanceEstimation {
    model: Box<dyn SubstitutionModel>,
    rate_distribution: Box<dyn DiscreteDistribution>,
    alignment: Alignment,
    additional: Vec<String>,
    tolerance: f64,
    max_evaluations: usize,
}

impl DistanceEstimation {
    pub fn new(
        model: Box<dyn SubstitutionModel>,
        rate_distribution: Box<dyn DiscreteDistribution>,
        alignment: Alignment,
    ) -> Self {
        Self {
            model,
            rate_distribution,
            alignment,
            additional: Vec::new(),
            tolerance: 1e-6,
            max_evaluations: 1_000_000,
        }
    }

    pub fn with_stop_condition(mut self, tolerance: f64, max_evaluations: usize) -> Self {
        self.tolerance = tolerance;
        self.max_evaluations = max_evaluations;
        self
    }

    pub fn model(&self) -> &dyn SubstitutionModel {
        self.model.as_ref()
    }

    pub fn rate_distribution(&self) -> &dyn DiscreteDistribution {
        self.rate_distribution.as_ref()
    }

    pub fn data(&self) -> &Alignment {
        &self.alignment
    }

    /// Model and rate parameters re-estimated together with each distance.
    pub fn additional_parameters(&self) -> &[String] {
        &self.additional
    }

    /// Selects the parameters re-estimated for every pair. Names that belong
    /// to neither the model nor the rate distribution are dropped with a
    /// warning.
    pub fn set_additional_parameters(&mut self, names: Vec<String>) {
        self.additional = names
            .into_iter()
            .filter(|name| {
                let known = self.model.parameters().contains(name) || self.rate_distribution.parameters().contains(name);
                if !known {
                    warn!(parameter = %name, "Not a model or rate parameter, ignored for distance estimation.");
                }
                known
            })
            .collect();
    }

    pub fn reset_additional_parameters(&mut self) {
        self.additional.clear();
    }

    /// Copies matching values into the model and the rate distribution.
    pub fn update_parameters(&mut self, values: &ParameterList) -> Result<(), EngineError> {
        self.model.set_parameter_values(values)?;
        self.rate_distribution.set_parameter_values(values)?;
        Ok(())
    }

    /// Distance between the sequences `a` and `b`.
    pub fn pairwise_distance(&self, a: &str, b: &str) -> Result<f64, EngineError> {
        let mut tree = Tree::new();
        let root = tree.root();
        let first = tree.add_child(root, Some(a.to_string()), Some(INITIAL_DISTANCE))?;
        let second = tree.add_child(root, Some(b.to_string()), Some(MIN_BRANCH_LENGTH))?;
        let pair = self.alignment.subset(&[a, b])?;
        let mut likelihood =
            PhyloLikelihood::homogeneous(tree, pair, self.model.clone(), self.rate_distribution.clone())?;

        let length = branch_length_parameter_name(first);
        let stop = StopCondition::new(self.tolerance, self.max_evaluations);
        let mut groups = vec![OptimizerGroup::new(
            "Distance",
            vec![length.clone()],
            Box::new(BrentOneDimension::new()),
            IterationMode::Full,
        )];
        if !self.additional.is_empty() {
            groups.push(OptimizerGroup::new(
                "Additional parameters",
                self.additional.clone(),
                Box::new(SimpleMultiDimensions::new()),
                IterationMode::Step(1),
            ));
        }
        MetaOptimizer::new(groups).run(&mut likelihood, &stop, &mut TracingListener)?;

        let distance = likelihood.parameter_value(&length)?
            + likelihood.parameter_value(&branch_length_parameter_name(second))?;
        debug!(a, b, distance, value = likelihood.value(), "Pairwise distance estimated.");
        Ok(distance)
    }

    /// Distances between all pairs of sequences.
    #[instrument(skip_all, name = "distance_matrix")]
    pub fn compute_matrix(&self, reporter: &ProgressReporter) -> Result<DistanceMatrix, EngineError> {
        let names = self.alignment.names();
        let n = names.len();
        let mut matrix = DistanceMatrix::new(names.clone());
        reporter.report(Progress::TaskStart {
            total_steps: (n * n.saturating_sub(1) / 2) as u64,
        });
        for i in 0..n {
            for j in (i + 1)..n {
                let distance = self.pairwise_distance(&names[i], &names[j])?;
                matrix.set(i, j, distance);
                reporter.report(Progress::TaskIncrement);
            }
        }
        reporter.report(Progress::TaskFinish);
        info!(sequences = n, "Distance matrix computed.");
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alphabet::Alphabet;
    use crate::core::models::{ConstantDistribution, NucleotideModel, NucleotideModelKind};
    use crate::engine::likelihood::tests::{alignment, five_taxa};

    fn estimation(kind: NucleotideModelKind, data: Alignment) -> DistanceEstimation {
        DistanceEstimation::new(
            Box::new(NucleotideModel::new(kind, Alphabet::Dna)),
            Box::new(ConstantDistribution::new()),
            data,
        )
        .with_stop_condition(1e-10, 10_000)
    }

    #[test]
    fn jukes_cantor_distance_has_a_closed_form() {
        // 3 differences over 20 sites.
        let data = alignment(&[("a", "ACGTACGTACGTACGTACGT"), ("b", "ACGTACGTACGTACGAAAGA")]);
        let p: f64 = 3.0 / 20.0;
        let expected = -0.75 * (1.0 - 4.0 * p / 3.0).ln();
        let distance = estimation(NucleotideModelKind::Jc69, data).pairwise_distance("a", "b").unwrap();
        assert!((distance - expected).abs() < 1e-4);
    }

    #[test]
    fn matrix_is_symmetric_with_a_zero_diagonal() {
        let matrix = estimation(NucleotideModelKind::Jc69, five_taxa())
            .compute_matrix(&ProgressReporter::new())
            .unwrap();
        assert_eq!(matrix.len(), 5);
        for i in 0..5 {
            assert_eq!(matrix.get(i, i), 0.0);
            for j in 0..5 {
                assert_eq!(matrix.get(i, j), matrix.get(j, i));
            }
        }
        // A and B are closer than A and E.
        assert!(matrix.get(0, 1) < matrix.get(0, 4));
    }

    #[test]
    fn unknown_additional_parameters_are_dropped() {
        let mut estimation = estimation(NucleotideModelKind::K80, five_taxa());
        estimation.set_additional_parameters(vec!["kappa".into(), "nope".into()]);
        assert_eq!(estimation.additional_parameters(), ["kappa".to_string()]);
        let distance = estimation.pairwise_distance("A", "E").unwrap();
        assert!(distance > 0.0);
        // Per-pair estimates are not kept.
        assert_eq!(estimation.model().parameter_value("kappa").unwrap(), 2.0);
    }
}
