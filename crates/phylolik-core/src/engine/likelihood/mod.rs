//! Likelihood of an alignment given a tree, a model set and a rate
//! distribution.
//!
//! [`PhyloLikelihood`] owns copies of its inputs and exposes every free
//! quantity (branch lengths, model parameters, root frequencies, rate
//! distribution parameters) through one global [`ParameterList`]. A dispatch
//! table parallel to that list routes each changed value to the component it
//! belongs to, and only the partials that depend on it are recomputed.
//!
//! Site classes are the rate classes of the distribution, crossed with the
//! sub-models when the set holds a [`MixedSubstitutionModel`]: every site
//! evolves under one sub-model over the whole tree, so the likelihood of a
//! site is `Σ_k Σ_r w_k p_r L_{k,r}(site)`. Classes are ordered sub-model
//! first, rate second.

mod calculation;
mod queries;

use self::calculation::LikelihoodData;
use super::cache::TransitionCache;
use super::error::EngineError;
use super::function::Function;
use crate::core::data::Alignment;
use crate::core::models::{
    DiscreteDistribution, MixedSubstitutionModel, ModelError, SubstitutionModel, SubstitutionModelSet,
};
use crate::core::parameters::{Constraint, Parameter, ParameterError, ParameterList};
use crate::core::tree::{NodeId, Tree, TreeError};
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};

/// Smallest branch length the likelihood accepts.
pub const MIN_BRANCH_LENGTH: f64 = 1e-6;

/// Constraint of every `BrLen` parameter.
pub const BRANCH_LENGTH_CONSTRAINT: Constraint = Constraint::Lower {
    bound: MIN_BRANCH_LENGTH,
    strict: false,
};

/// Name of the parameter holding the length of the branch above `node`.
pub fn branch_length_parameter_name(node: NodeId) -> String {
    format!("BrLen{node}")
}

/// Component owning a global parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParameterTarget {
    Branch(NodeId),
    Model,
    RootFrequencies,
    Rate,
}

/// A likelihood function over a tree with a substitution model set and a
/// discrete rate distribution.
///
/// The objective seen by optimizers through [`Function`] is `-lnL`.
#[derive(Debug, Clone)]
pub struct PhyloLikelihood {
    tree: Tree,
    alignment: Alignment,
    model_set: SubstitutionModelSet,
    rate_distribution: Box<dyn DiscreteDistribution>,
    parameters: ParameterList,
    targets: Vec<ParameterTarget>,
    /// Sub-models of the mixture of the set, one without a mixture.
    components: usize,
    data: LikelihoodData,
    transitions: TransitionCache,
    log_likelihood: f64,
    derivatives: bool,
}

impl PhyloLikelihood {
    /// Builds the likelihood and computes it once.
    ///
    /// # Arguments
    ///
    /// * `tree` - A tree whose leaves are named after the sequences and whose
    ///   branches all carry a length.
    /// * `alignment` - The sequences.
    /// * `model_set` - A model set fully set up for `tree`.
    /// * `rate_distribution` - Rate classes across sites.
    ///
    /// # Errors
    ///
    /// Fails if the model set does not cover the tree, if its alphabet
    /// differs from the alignment's, if it holds more than one mixture, if a
    /// branch has no length, or if a leaf has no sequence.
    pub fn new(
        mut tree: Tree,
        alignment: Alignment,
        model_set: SubstitutionModelSet,
        rate_distribution: Box<dyn DiscreteDistribution>,
    ) -> Result<Self, EngineError> {
        if alignment.alphabet() != model_set.alphabet() {
            return Err(ModelError::AlphabetMismatch {
                expected: model_set.alphabet(),
                found: alignment.alphabet(),
            }
            .into());
        }
        if !model_set.is_fully_set_up_for(&tree) {
            return Err(EngineError::Initialization(
                "the substitution model set is not fully set up for the tree".to_string(),
            ));
        }
        let components = mixture_components(&model_set)?;

        let mut parameters = ParameterList::new();
        let mut targets = Vec::new();
        for node in tree.branch_nodes() {
            let length = tree
                .branch_length(node)?
                .ok_or(TreeError::MissingBranchLength { id: node })?;
            let length = if length < MIN_BRANCH_LENGTH {
                warn!(node, length, "Branch length below minimum, set to {MIN_BRANCH_LENGTH}.");
                tree.set_branch_length(node, MIN_BRANCH_LENGTH)?;
                MIN_BRANCH_LENGTH
            } else {
                length
            };
            parameters.add(Parameter::new(
                branch_length_parameter_name(node),
                length,
                BRANCH_LENGTH_CONSTRAINT,
            )?)?;
            targets.push(ParameterTarget::Branch(node));
        }
        for parameter in model_set.parameters() {
            parameters.add(parameter.clone())?;
            targets.push(if model_set.is_root_frequency_parameter(parameter.name()) {
                ParameterTarget::RootFrequencies
            } else {
                ParameterTarget::Model
            });
        }
        for parameter in rate_distribution.parameters() {
            parameters.add(parameter.clone())?;
            targets.push(ParameterTarget::Rate);
        }

        let data = LikelihoodData::new(
            &tree,
            &alignment,
            components * rate_distribution.number_of_categories(),
            model_set.number_of_states(),
        )?;
        let mut likelihood = Self {
            tree,
            alignment,
            model_set,
            rate_distribution,
            parameters,
            targets,
            components,
            data,
            transitions: TransitionCache::new(),
            log_likelihood: 0.0,
            derivatives: true,
        };
        likelihood.compute_tree_likelihood()?;
        debug!(
            parameters = likelihood.parameters.len(),
            patterns = likelihood.data.number_of_patterns(),
            log_likelihood = likelihood.log_likelihood,
            "Likelihood initialized."
        );
        Ok(likelihood)
    }

    /// Builds a likelihood where one model serves every branch.
    ///
    /// All the parameters of the model are exposed, and the root
    /// distribution is the model's equilibrium.
    pub fn homogeneous(
        tree: Tree,
        alignment: Alignment,
        model: Box<dyn SubstitutionModel>,
        rate_distribution: Box<dyn DiscreteDistribution>,
    ) -> Result<Self, EngineError> {
        let mut model_set = SubstitutionModelSet::new_stationary(model.alphabet());
        let names = model.parameters().names();
        model_set.add_model(model, &tree.branch_nodes(), &names)?;
        Self::new(tree, alignment, model_set, rate_distribution)
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn data(&self) -> &Alignment {
        &self.alignment
    }

    pub fn model_set(&self) -> &SubstitutionModelSet {
        &self.model_set
    }

    pub fn rate_distribution(&self) -> &dyn DiscreteDistribution {
        self.rate_distribution.as_ref()
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn parameter_value(&self, name: &str) -> Result<f64, EngineError> {
        Ok(self.parameters.value(name)?)
    }

    /// Replaces the alignment, recompressing its patterns.
    pub fn set_data(&mut self, alignment: Alignment) -> Result<(), EngineError> {
        if alignment.alphabet() != self.model_set.alphabet() {
            return Err(ModelError::AlphabetMismatch {
                expected: self.model_set.alphabet(),
                found: alignment.alphabet(),
            }
            .into());
        }
        self.data = LikelihoodData::new(
            &self.tree,
            &alignment,
            self.components * self.rate_distribution.number_of_categories(),
            self.model_set.number_of_states(),
        )?;
        self.alignment = alignment;
        self.compute_tree_likelihood()
    }

    /// Copies the values of the parameters that `values` shares with the
    /// global list, ignoring the others, and updates the likelihood.
    ///
    /// # Return
    ///
    /// The names whose value changed.
    pub fn match_parameters_values(&mut self, values: &ParameterList) -> Result<Vec<String>, EngineError> {
        let mut staged = self.parameters.clone();
        let changed = staged.match_values(values)?;
        self.commit_parameters(staged, &changed)?;
        Ok(changed)
    }

    /// Recomputes every transition matrix and every partial.
    pub fn compute_tree_likelihood(&mut self) -> Result<(), EngineError> {
        let branches: BTreeSet<NodeId> = self.tree.branch_nodes().into_iter().collect();
        self.update_transitions(&branches)?;
        self.data.compute_all(&self.tree, &self.transitions)?;
        self.update_log_likelihood();
        Ok(())
    }

    /// Exchanges the subtrees rooted at `a` and `b` and recomputes the
    /// likelihood. Branch lengths move with their subtree.
    pub fn swap_subtrees(&mut self, a: NodeId, b: NodeId) -> Result<(), EngineError> {
        self.tree.swap_subtrees(a, b)?;
        self.data.compute_all(&self.tree, &self.transitions)?;
        self.update_log_likelihood();
        Ok(())
    }

    /// Puts back a topology and parameter values recorded earlier from this
    /// likelihood.
    pub(crate) fn restore(&mut self, tree: Tree, values: &ParameterList) -> Result<(), EngineError> {
        let structural = self.tree != tree;
        self.tree = tree;
        let mut staged = self.parameters.clone();
        let changed = staged.match_values(values)?;
        self.commit_parameters(staged, &changed)?;
        if structural {
            self.data.compute_all(&self.tree, &self.transitions)?;
            self.update_log_likelihood();
        }
        Ok(())
    }

    /// Allows or forbids analytic derivatives with respect to branch lengths.
    pub fn enable_derivatives(&mut self, yes: bool) {
        self.derivatives = yes;
    }

    /// Makes `staged` the global list, where `changed` are the names whose
    /// value differs from the current one, and recomputes what depends on
    /// them.
    ///
    /// The components take the new values before the list is replaced; if
    /// one of them rejects its values, every component and the list are left
    /// as they were.
    fn commit_parameters(&mut self, staged: ParameterList, changed: &[String]) -> Result<(), EngineError> {
        if changed.is_empty() {
            return Ok(());
        }
        let mut lengths = Vec::new();
        let mut model_values = ParameterList::new();
        let mut rate_values = ParameterList::new();
        for name in changed {
            let index = staged.index_of(name).ok_or_else(|| {
                EngineError::Internal(format!("changed parameter '{name}' is not in the global list"))
            })?;
            let value = staged.at(index)?.value();
            match self.targets[index] {
                ParameterTarget::Branch(node) => lengths.push((node, value)),
                ParameterTarget::Model | ParameterTarget::RootFrequencies => {
                    model_values.add(Parameter::unconstrained(name.clone(), value))?;
                }
                ParameterTarget::Rate => rate_values.add(Parameter::unconstrained(name.clone(), value))?,
            }
        }

        let tree_before = (!lengths.is_empty()).then(|| self.tree.clone());
        let models_before = (!model_values.is_empty()).then(|| self.model_set.clone());
        let rates_before = (!rate_values.is_empty()).then(|| self.rate_distribution.clone());
        if let Err(e) = self.push_values(&lengths, &model_values, &rate_values) {
            debug!(error = %e, "A component rejected new parameter values; rolling back.");
            if let Some(tree) = tree_before {
                self.tree = tree;
            }
            if let Some(model_set) = models_before {
                self.model_set = model_set;
            }
            if let Some(rate_distribution) = rates_before {
                self.rate_distribution = rate_distribution;
            }
            return Err(e);
        }
        self.parameters = staged;

        let mut touched: BTreeSet<NodeId> = lengths.iter().map(|&(node, _)| node).collect();
        for name in model_values.names() {
            touched.extend(self.model_set.nodes_with_parameter(&name));
        }
        if !rate_values.is_empty() {
            touched.extend(self.tree.branch_nodes());
        }
        self.update_transitions(&touched)?;
        let mut dirty = BTreeSet::new();
        for &node in &touched {
            for ancestor in self.tree.path_to_root(node)?.into_iter().skip(1) {
                if !dirty.insert(ancestor) {
                    break;
                }
            }
        }
        trace!(touched = touched.len(), dirty = dirty.len(), "Recomputing partials.");
        self.data.compute_dirty(&self.tree, &self.transitions, &dirty)?;
        self.update_log_likelihood();
        Ok(())
    }

    fn push_values(
        &mut self,
        lengths: &[(NodeId, f64)],
        model_values: &ParameterList,
        rate_values: &ParameterList,
    ) -> Result<(), EngineError> {
        if !model_values.is_empty() {
            self.model_set.set_parameter_values(model_values)?;
        }
        if !rate_values.is_empty() {
            self.rate_distribution.set_parameter_values(rate_values)?;
        }
        for &(node, length) in lengths {
            self.tree.set_branch_length(node, length)?;
        }
        Ok(())
    }

    /// The mixture model of the set, if it has one.
    fn mixture(&self) -> Option<&dyn MixedSubstitutionModel> {
        self.model_set
            .model_ids()
            .iter()
            .find_map(|&id| self.model_set.model(id).and_then(|m| m.as_mixed()))
    }

    /// Number of site classes: sub-models times rate classes.
    pub fn number_of_classes(&self) -> usize {
        self.data.number_of_classes()
    }

    /// Prior probability of every site class.
    pub fn class_probabilities(&self) -> Vec<f64> {
        let rates = self.rate_distribution.probabilities();
        let weights = self
            .mixture()
            .map_or_else(|| vec![1.0], |m| m.probabilities().to_vec());
        weights
            .iter()
            .flat_map(|w| rates.iter().map(move |p| w * p))
            .collect()
    }

    /// Rate multiplier of every site class.
    pub fn class_rates(&self) -> Vec<f64> {
        let rates = self.rate_distribution.categories();
        (0..self.components).flat_map(|_| rates.iter().copied()).collect()
    }

    /// Root distribution of every site class.
    ///
    /// In a stationary set whose first model is the mixture, each sub-model
    /// starts from its own equilibrium.
    fn class_root_frequencies(&self) -> Vec<Vec<f64>> {
        let root = self.model_set.root_frequencies();
        let stationary_mixture = if self.model_set.is_stationary() {
            self.model_set
                .model_ids()
                .first()
                .and_then(|&id| self.model_set.model(id))
                .and_then(|m| m.as_mixed())
        } else {
            None
        };
        let rates = self.rate_distribution.number_of_categories();
        (0..self.components)
            .flat_map(|k| {
                let frequencies = stationary_mixture
                    .and_then(|m| m.n_model(k))
                    .map_or_else(|| root.clone(), |m| m.frequencies().to_vec());
                std::iter::repeat_n(frequencies, rates)
            })
            .collect()
    }

    fn update_transitions(&mut self, nodes: &BTreeSet<NodeId>) -> Result<(), EngineError> {
        for &node in nodes {
            let matrices = self.branch_matrices(node, |model, t| model.transition_probabilities(t), 0)?;
            self.transitions.insert(node, matrices);
        }
        Ok(())
    }

    /// Per-class matrices of the branch above `node`, where `compute` gives
    /// the matrix (or its derivative) at a time and `order` is the order of
    /// the derivative with respect to the branch length.
    fn branch_matrices(
        &self,
        node: NodeId,
        compute: impl Fn(&dyn SubstitutionModel, f64) -> nalgebra::DMatrix<f64>,
        order: i32,
    ) -> Result<Vec<nalgebra::DMatrix<f64>>, EngineError> {
        let model = self
            .model_set
            .model_for_node(node)
            .ok_or_else(|| EngineError::Internal(format!("node {node} has no model")))?;
        let length = self
            .tree
            .branch_length(node)?
            .ok_or(TreeError::MissingBranchLength { id: node })?;
        let rates = self.rate_distribution.categories();
        let per_rate = |sub: &dyn SubstitutionModel| -> Vec<nalgebra::DMatrix<f64>> {
            rates
                .iter()
                .map(|&rate| compute(sub, rate * length) * rate.powi(order))
                .collect()
        };
        match model.as_mixed() {
            Some(mixture) => {
                let mut matrices = Vec::with_capacity(self.components * rates.len());
                for k in 0..mixture.number_of_models() {
                    let sub = mixture
                        .n_model(k)
                        .ok_or_else(|| EngineError::Internal(format!("mixture has no sub-model {k}")))?;
                    matrices.extend(per_rate(sub));
                }
                Ok(matrices)
            }
            None if self.components == 1 => Ok(per_rate(model)),
            // Branches outside the mixture share their matrices across sub-models.
            None => Ok(per_rate(model)
                .iter()
                .cycle()
                .take(self.components * rates.len())
                .cloned()
                .collect()),
        }
    }

    fn update_log_likelihood(&mut self) {
        let pattern_likelihoods = self.data.pattern_likelihoods(
            self.data.root_partials(&self.tree),
            &self.class_root_frequencies(),
            &self.class_probabilities(),
        );
        let scales = self.data.total_log_scales();
        self.log_likelihood = pattern_likelihoods
            .iter()
            .zip(&scales)
            .zip(self.data.patterns().weights())
            .map(|((l, s), w)| w * (l.ln() + s))
            .sum();
    }

    /// First and second derivatives of lnL with respect to the length of
    /// the branch above `node`.
    fn branch_log_likelihood_derivatives(&self, node: NodeId, second: bool) -> Result<(f64, f64), EngineError> {
        let frequencies = self.class_root_frequencies();
        let probabilities = self.class_probabilities();
        let likelihoods =
            self.data
                .pattern_likelihoods(self.data.root_partials(&self.tree), &frequencies, &probabilities);

        let first_matrices = self.branch_matrices(node, |model, t| model.first_derivative(t), 1)?;
        let first_root = self
            .data
            .root_partials_with_branch(&self.tree, &self.transitions, node, &first_matrices)?;
        let first = self.data.pattern_likelihoods(&first_root, &frequencies, &probabilities);

        let second_values = if second {
            let second_matrices = self.branch_matrices(node, |model, t| model.second_derivative(t), 2)?;
            let second_root =
                self.data
                    .root_partials_with_branch(&self.tree, &self.transitions, node, &second_matrices)?;
            Some(self.data.pattern_likelihoods(&second_root, &frequencies, &probabilities))
        } else {
            None
        };

        let weights = self.data.patterns().weights();
        let mut d1 = 0.0;
        let mut d2 = 0.0;
        for (p, (&l, &w)) in likelihoods.iter().zip(weights).enumerate() {
            let ratio = first[p] / l;
            d1 += w * ratio;
            if let Some(second) = &second_values {
                d2 += w * (second[p] / l - ratio * ratio);
            }
        }
        Ok((d1, d2))
    }

    fn branch_of(&self, name: &str) -> Result<NodeId, EngineError> {
        let index = self.parameters.index_of(name).ok_or_else(|| ParameterError::NotFound {
            name: name.to_string(),
        })?;
        match self.targets[index] {
            ParameterTarget::Branch(node) if self.derivatives => Ok(node),
            _ => Err(EngineError::NotDerivable { name: name.to_string() }),
        }
    }

    fn parameters_with_target(&self, keep: impl Fn(ParameterTarget) -> bool) -> ParameterList {
        // Names are unique in the global list, so no sublist can fail.
        ParameterList::from_parameters(
            self.parameters
                .iter()
                .zip(&self.targets)
                .filter(|(_, target)| keep(**target))
                .map(|(parameter, _)| parameter.clone()),
        )
        .unwrap_or_default()
    }

    /// The `BrLen` parameters.
    pub fn branch_lengths_parameters(&self) -> ParameterList {
        self.parameters_with_target(|t| matches!(t, ParameterTarget::Branch(_)))
    }

    /// Model parameters, root frequencies excluded.
    pub fn substitution_model_parameters(&self) -> ParameterList {
        self.parameters_with_target(|t| t == ParameterTarget::Model)
    }

    pub fn root_frequencies_parameters(&self) -> ParameterList {
        self.parameters_with_target(|t| t == ParameterTarget::RootFrequencies)
    }

    pub fn rate_distribution_parameters(&self) -> ParameterList {
        self.parameters_with_target(|t| t == ParameterTarget::Rate)
    }

    /// Parameters with analytic derivatives.
    pub fn derivable_parameters(&self) -> ParameterList {
        self.branch_lengths_parameters()
    }

    pub fn non_derivable_parameters(&self) -> ParameterList {
        self.parameters_with_target(|t| !matches!(t, ParameterTarget::Branch(_)))
    }
}

impl Function for PhyloLikelihood {
    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameters(&mut self, values: &ParameterList) -> Result<(), EngineError> {
        let mut staged = self.parameters.clone();
        let changed = staged.set_values(values)?;
        self.commit_parameters(staged, &changed)
    }

    fn value(&self) -> f64 {
        -self.log_likelihood
    }

    fn first_order_derivative(&self, name: &str) -> Result<f64, EngineError> {
        let node = self.branch_of(name)?;
        let (d1, _) = self.branch_log_likelihood_derivatives(node, false)?;
        Ok(-d1)
    }

    fn second_order_derivative(&self, name: &str) -> Result<f64, EngineError> {
        let node = self.branch_of(name)?;
        let (_, d2) = self.branch_log_likelihood_derivatives(node, true)?;
        Ok(-d2)
    }

    fn enable_first_order_derivatives(&mut self, yes: bool) {
        self.enable_derivatives(yes);
    }

    fn enable_second_order_derivatives(&mut self, yes: bool) {
        if yes {
            self.enable_derivatives(true);
        }
    }
}

/// Number of sub-models of the mixture of the set, one if it has none.
fn mixture_components(model_set: &SubstitutionModelSet) -> Result<usize, EngineError> {
    let mixtures: Vec<usize> = model_set
        .model_ids()
        .iter()
        .filter_map(|&id| model_set.model(id).and_then(|m| m.as_mixed()))
        .map(|m| m.number_of_models())
        .collect();
    match mixtures.as_slice() {
        [] => Ok(1),
        [components] => Ok(*components),
        _ => Err(ModelError::SeveralMixtures { count: mixtures.len() }.into()),
    }
}
