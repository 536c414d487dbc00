//! # Core Module
//!
//! The stateless foundation of the library: the containers and mathematical
//! objects that the likelihood engine consumes.
//!
//! ## Overview
//!
//! Everything in this module is a value type with a parameter-list protocol
//! and no knowledge of optimization. The [`engine`](crate::engine) layer owns
//! instances of these types and drives their parameters.
//!
//! ## Architecture
//!
//! - **Parameters** ([`parameters`]) - Named, constrained scalars and ordered, uniquely named lists
//! - **Alphabets** ([`alphabet`]) - Nucleotide state spaces with IUPAC ambiguity codes
//! - **Sequence Data** ([`data`]) - Aligned sequences and their compression into site patterns
//! - **Trees** ([`tree`]) - Arena trees with stable node ids, Newick I/O, RF distance, NJ and UPGMA
//! - **Models** ([`models`]) - Substitution models, frequency sets, mixtures, rate
//!   distributions and branch-heterogeneous model sets

pub mod alphabet;
pub mod data;
pub mod models;
pub mod parameters;
pub mod tree;
