//! Nearest-neighbor interchange (NNI) search on a likelihood.
//!
//! A move is identified by a node `n` whose parent `p` is not the root: it
//! exchanges the subtree of `n` with the subtree of the first sibling of `p`
//! (its "uncle"). The two moves of the children of `p` give the two
//! alternative topologies around the branch above `p`, called the central
//! branch. A move is scored by the change of `-lnL` after the length of the
//! central branch has been re-optimized.

use super::config::NniMethod;
use super::error::EngineError;
use super::function::{Function, TracingListener};
use super::likelihood::{PhyloLikelihood, branch_length_parameter_name};
use super::optimizers::{BrentOneDimension, Optimizer, StopCondition};
use super::state::Scored;
use super::transaction::transaction;
use crate::core::tree::{NodeId, Tree};
use std::collections::BinaryHeap;
use tracing::{debug, info, instrument, trace};

/// Smallest decrease of `-lnL` for a move to be accepted.
const MIN_IMPROVEMENT: f64 = 1e-8;
const CENTRAL_BRANCH_TOLERANCE: f64 = 1e-6;
const CENTRAL_BRANCH_MAX_EVALUATIONS: usize = 500;

/// Notified by [`NniSearch`] about the moves it considers.
pub trait TopologyListener {
    /// A move has been scored; the likelihood is back to its state before
    /// the move.
    fn topology_change_tested(&mut self, _likelihood: &PhyloLikelihood) {}

    /// A move has been applied to the likelihood.
    fn topology_change_successful(&mut self, likelihood: &mut PhyloLikelihood) -> Result<(), EngineError>;
}

/// Outcome of a scored move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NniMove {
    pub node: NodeId,
    pub uncle: NodeId,
    /// Node whose branch is the central branch.
    pub central: NodeId,
    /// Optimized length of the central branch after the move.
    pub length: f64,
    /// Change of `-lnL`; negative when the move improves the likelihood.
    pub difference: f64,
}

/// Result of a search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NniSummary {
    pub tested: usize,
    pub accepted: usize,
    pub log_likelihood: f64,
}

/// Nodes that identify a move, with their uncle and the central branch.
pub fn candidate_moves(tree: &Tree) -> Result<Vec<(NodeId, NodeId, NodeId)>, EngineError> {
    let mut moves = Vec::new();
    for node in tree.postorder() {
        let Some(parent) = tree.parent(node)? else {
            continue;
        };
        if tree.parent(parent)?.is_none() {
            continue;
        }
        if let Some(&uncle) = tree.siblings(parent)?.first() {
            moves.push((node, uncle, parent));
        }
    }
    Ok(moves)
}

/// Scores the move of `node` without changing the likelihood.
pub fn test_nni(likelihood: &mut PhyloLikelihood, node: NodeId) -> Result<NniMove, EngineError> {
    let tree = likelihood.tree();
    let parent = tree
        .parent(node)?
        .ok_or_else(|| EngineError::Internal(format!("node {node} is the root")))?;
    let uncle = tree
        .siblings(parent)?
        .first()
        .copied()
        .ok_or_else(|| EngineError::Internal(format!("node {parent} has no sibling")))?;
    let before = likelihood.value();
    let central = branch_length_parameter_name(parent);

    let (length, after) = transaction(likelihood, |lik| {
        lik.swap_subtrees(node, uncle)?;
        let stop = StopCondition::new(CENTRAL_BRANCH_TOLERANCE, CENTRAL_BRANCH_MAX_EVALUATIONS);
        BrentOneDimension::new().optimize(lik, std::slice::from_ref(&central), &stop, &mut TracingListener)?;
        Ok((lik.parameter_value(&central)?, lik.value()))
    })?;

    let scored = NniMove {
        node,
        uncle,
        central: parent,
        length,
        difference: after - before,
    };
    trace!(node, uncle, difference = scored.difference, "NNI tested.");
    Ok(scored)
}

/// Applies a move scored by [`test_nni`].
pub fn do_nni(likelihood: &mut PhyloLikelihood, scored: &NniMove) -> Result<(), EngineError> {
    likelihood.swap_subtrees(scored.node, scored.uncle)?;
    let name = branch_length_parameter_name(scored.central);
    let values = likelihood.parameters().sublist(&[name])?.with_values(&[scored.length])?;
    likelihood.set_parameters(&values)
}

/// NNI hill climbing.
///
/// [`NniMethod::Fast`] applies the first improving move found and starts
/// over; [`NniMethod::Better`] scores every move and applies the best one.
/// The search ends when no move improves `-lnL` by more than a small
/// threshold.
pub struct NniSearch<'a> {
    method: NniMethod,
    listeners: Vec<&'a mut dyn TopologyListener>,
}

impl<'a> NniSearch<'a> {
    pub fn new(method: NniMethod) -> Self {
        Self {
            method,
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: &'a mut dyn TopologyListener) {
        self.listeners.push(listener);
    }

    #[instrument(skip_all, name = "nni_search")]
    pub fn search(&mut self, likelihood: &mut PhyloLikelihood) -> Result<NniSummary, EngineError> {
        let mut summary = NniSummary {
            tested: 0,
            accepted: 0,
            log_likelihood: likelihood.log_likelihood(),
        };
        info!(method = %self.method, log_likelihood = summary.log_likelihood, "Starting NNI search.");
        while let Some(best) = self.next_move(likelihood, &mut summary)? {
            do_nni(likelihood, &best)?;
            summary.accepted += 1;
            debug!(
                node = best.node,
                uncle = best.uncle,
                log_likelihood = likelihood.log_likelihood(),
                "NNI accepted."
            );
            for listener in &mut self.listeners {
                listener.topology_change_successful(likelihood)?;
            }
        }
        summary.log_likelihood = likelihood.log_likelihood();
        info!(
            accepted = summary.accepted,
            tested = summary.tested,
            log_likelihood = summary.log_likelihood,
            "NNI search done."
        );
        Ok(summary)
    }

    fn next_move(
        &mut self,
        likelihood: &mut PhyloLikelihood,
        summary: &mut NniSummary,
    ) -> Result<Option<NniMove>, EngineError> {
        let mut heap = BinaryHeap::new();
        for (node, _, _) in candidate_moves(likelihood.tree())? {
            let scored = test_nni(likelihood, node)?;
            summary.tested += 1;
            for listener in &mut self.listeners {
                listener.topology_change_tested(likelihood);
            }
            if scored.difference < -MIN_IMPROVEMENT {
                if self.method == NniMethod::Fast {
                    return Ok(Some(scored));
                }
                heap.push(Scored {
                    gain: -scored.difference,
                    item: scored,
                });
            }
        }
        Ok(heap.pop().map(|s| s.item))
    }
}
