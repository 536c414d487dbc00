use super::{Optimizer, StopCondition};
use crate::engine::error::EngineError;
use crate::engine::function::{Function, OptimizationListener};
use crate::engine::state::OptimizationSummary;
use tracing::{debug, info, warn};

/// How much work a group's optimizer does in each round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationMode {
    /// A fixed number of iterations per round.
    Step(usize),
    /// Runs to convergence in every round.
    Full,
}

/// A named set of parameters optimized together by one method.
pub struct OptimizerGroup {
    pub name: String,
    pub names: Vec<String>,
    pub optimizer: Box<dyn Optimizer>,
    pub mode: IterationMode,
}

impl OptimizerGroup {
    pub fn new(name: impl Into<String>, names: Vec<String>, optimizer: Box<dyn Optimizer>, mode: IterationMode) -> Self {
        Self {
            name: name.into(),
            names,
            optimizer,
            mode,
        }
    }
}

/// Optimizes groups of parameters in turn until a whole round improves the
/// objective by less than the tolerance.
///
/// Groups with no parameter are skipped. The evaluation budget is shared by
/// all groups and all rounds.
pub struct MetaOptimizer {
    groups: Vec<OptimizerGroup>,
}

impl MetaOptimizer {
    pub fn new(groups: Vec<OptimizerGroup>) -> Self {
        Self {
            groups: groups.into_iter().filter(|g| !g.names.is_empty()).collect(),
        }
    }

    pub fn groups(&self) -> &[OptimizerGroup] {
        &self.groups
    }

    /// Names of all optimized parameters, in group order.
    pub fn names(&self) -> Vec<String> {
        self.groups.iter().flat_map(|g| g.names.iter().cloned()).collect()
    }

    /// Runs rounds until convergence, exhaustion of the budget or of
    /// `stop.max_iterations` rounds.
    pub fn run(
        &mut self,
        function: &mut dyn Function,
        stop: &StopCondition,
        listener: &mut dyn OptimizationListener,
    ) -> Result<OptimizationSummary, EngineError> {
        let mut summary = OptimizationSummary::new(function.value());
        if self.groups.is_empty() {
            summary.converged = true;
            return Ok(summary);
        }
        let mut current = function.value();
        loop {
            if stop.iterations_exhausted(summary.iterations) {
                break;
            }
            let round_start = current;
            for group in &mut self.groups {
                let budget = stop.max_evaluations.saturating_sub(summary.evaluations);
                if budget == 0 {
                    break;
                }
                let mut group_stop = StopCondition::new(stop.tolerance, budget);
                if let IterationMode::Step(steps) = group.mode {
                    group_stop = group_stop.with_max_iterations(steps);
                }
                let outcome = group.optimizer.optimize(function, &group.names, &group_stop, listener)?;
                debug!(
                    group = %group.name,
                    optimizer = group.optimizer.name(),
                    value = outcome.value,
                    evaluations = outcome.evaluations,
                    "Group optimized."
                );
                summary.evaluations += outcome.evaluations;
                current = outcome.value;
            }
            summary.iterations += 1;
            summary.value = current;
            info!(round = summary.iterations, value = current, "Optimization round done.");
            if (round_start - current).abs() < stop.tolerance {
                summary.converged = true;
                break;
            }
            if summary.evaluations >= stop.max_evaluations {
                warn!(
                    evaluations = summary.evaluations,
                    "Optimization stopped before convergence: evaluation budget exhausted."
                );
                break;
            }
        }
        summary.value = function.value();
        Ok(summary)
    }
}

impl Optimizer for MetaOptimizer {
    fn name(&self) -> &'static str {
        "Meta"
    }

    /// Runs only the groups' parameters that are also listed in `names`.
    fn optimize(
        &mut self,
        function: &mut dyn Function,
        names: &[String],
        stop: &StopCondition,
        listener: &mut dyn OptimizationListener,
    ) -> Result<OptimizationSummary, EngineError> {
        for group in &mut self.groups {
            group.names.retain(|n| names.contains(n));
        }
        self.groups.retain(|g| !g.names.is_empty());
        self.run(function, stop, listener)
    }
}
