use super::error::EngineError;
use super::function::Function;
use super::likelihood::PhyloLikelihood;

/// Runs `action` on the likelihood, then puts the topology and every
/// parameter back to their values before the call.
///
/// The state is restored whether `action` succeeds or fails; an error from
/// `action` takes precedence over one from the restoration.
pub fn transaction<F, R>(likelihood: &mut PhyloLikelihood, action: F) -> Result<R, EngineError>
where
    F: FnOnce(&mut PhyloLikelihood) -> Result<R, EngineError>,
{
    // 1. Record the original state.
    let tree = likelihood.tree().clone();
    let values = likelihood.parameters().clone();

    // 2. Execute the action.
    let result = action(likelihood);

    // 3. Revert.
    let restored = likelihood.restore(tree, &values);
    let result = result?;
    restored?;
    Ok(result)
}
