use super::config::ConfigError;
use crate::core::data::DataError;
use crate::core::models::{DistributionError, ModelError, ModelSetError};
use crate::core::parameters::ParameterError;
use crate::core::tree::TreeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    ModelSet(#[from] ModelSetError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("This is a {expected}-parameter function, got {found} parameter(s)")]
    Arity { expected: usize, found: usize },

    #[error("The function is not derivable with respect to '{name}'")]
    NotDerivable { name: String },

    /// The objective evaluated to NaN; `dump` is where the diagnostic dump was written.
    #[error("Optimization failed because likelihood function returned NaN.")]
    NotANumber { dump: PathBuf },

    #[error("Failed to write diagnostic dump to '{path}': {source}")]
    Dump {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Optimization phase '{phase}' failed: {reason}")]
    PhaseFailed { phase: &'static str, reason: String },

    #[error("Internal logic error: {0}")]
    Internal(String),
}
