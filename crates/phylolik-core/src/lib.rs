//! # phylolik
//!
//! Maximum-likelihood inference on phylogenetic trees: substitution models,
//! likelihood computation, numerical optimization of branch lengths and model
//! parameters, and tree search.
//!
//! ## Architecture
//!
//! The library is split into three layers:
//!
//! - **[`core`]: The Foundation.** Stateless data models: parameters and
//!   constraints, alphabets, alignments and site patterns, trees with Newick
//!   I/O and distance-based reconstruction, substitution models, rate
//!   distributions and model sets.
//!
//! - **[`engine`]: The Logic Core.** The stateful likelihood with incremental
//!   recomputation and analytic branch-length derivatives, the optimizers and
//!   the function wrappers they run through, NNI moves and pairwise distances.
//!
//! - **[`workflows`]: The Public API.** Complete procedures (parameter
//!   optimization, topology search, distance-tree building) driven by typed
//!   configurations.

pub mod core;
pub mod engine;
pub mod workflows;
