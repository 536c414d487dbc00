use super::error::EngineError;
use super::function::Function;
use super::likelihood::PhyloLikelihood;
use crate::core::parameters::ParameterList;
use crate::core::tree::to_newick;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::error;

/// Turns a NaN likelihood into a fatal error.
///
/// After every move the objective is checked; a NaN value writes the
/// current parameters, tree and sequences to the dump file and fails with
/// [`EngineError::NotANumber`].
pub struct NanWatcher<'l> {
    likelihood: &'l mut PhyloLikelihood,
    dump_path: PathBuf,
}

impl<'l> NanWatcher<'l> {
    pub fn new(likelihood: &'l mut PhyloLikelihood, dump_path: impl Into<PathBuf>) -> Self {
        Self {
            likelihood,
            dump_path: dump_path.into(),
        }
    }

    pub fn dump_path(&self) -> &Path {
        &self.dump_path
    }

    pub fn likelihood(&self) -> &PhyloLikelihood {
        self.likelihood
    }

    fn dump(&self) -> Result<(), EngineError> {
        fs::write(&self.dump_path, dump_text(self.likelihood)).map_err(|source| EngineError::Dump {
            path: self.dump_path.clone(),
            source,
        })
    }
}

/// Diagnostic report of a likelihood: parameters, Newick tree and FASTA
/// sequences, in three labelled sections.
pub fn dump_text(likelihood: &PhyloLikelihood) -> String {
    let mut text = String::from("<<< PARAMETERS >>>\n");
    for parameter in likelihood.parameters() {
        let _ = writeln!(text, "{}={}", parameter.name(), parameter.value());
    }
    text.push_str("\n<<< TREE >>>\n");
    text.push_str(&to_newick(likelihood.tree()));
    text.push_str("\n\n<<< SEQUENCES >>>\n");
    text.push_str(&likelihood.data().to_fasta());
    text
}

impl Function for NanWatcher<'_> {
    fn parameters(&self) -> &ParameterList {
        self.likelihood.parameters()
    }

    fn set_parameters(&mut self, values: &ParameterList) -> Result<(), EngineError> {
        self.likelihood.set_parameters(values)?;
        if self.likelihood.value().is_nan() {
            error!(dump = %self.dump_path.display(), "Likelihood is NaN, dumping state.");
            self.dump()?;
            return Err(EngineError::NotANumber {
                dump: self.dump_path.clone(),
            });
        }
        Ok(())
    }

    fn value(&self) -> f64 {
        self.likelihood.value()
    }

    fn first_order_derivative(&self, name: &str) -> Result<f64, EngineError> {
        self.likelihood.first_order_derivative(name)
    }

    fn second_order_derivative(&self, name: &str) -> Result<f64, EngineError> {
        self.likelihood.second_order_derivative(name)
    }

    fn enable_first_order_derivatives(&mut self, yes: bool) {
        self.likelihood.enable_first_order_derivatives(yes);
    }

    fn enable_second_order_derivatives(&mut self, yes: bool) {
        self.likelihood.enable_second_order_derivatives(yes);
    }
}
