//! # Engine Module
//!
//! Likelihood computation and the numerical machinery that maximizes it.
//!
//! ## Overview
//!
//! [`likelihood::PhyloLikelihood`] evaluates the likelihood of an alignment on
//! a tree and exposes every free quantity through one parameter list. It is
//! seen by the optimizers as a [`function::Function`] to minimize (`-lnL`),
//! possibly through wrappers that add behavior:
//!
//! - [`nan_watcher`] - Turns a NaN value into a fatal error with a diagnostic dump
//! - [`reparametrization`] - Removes parameter constraints by a change of variables
//! - [`derivatives`] - Finite-difference derivatives for parameters without analytic ones
//! - [`scale`] - One-parameter view scaling all branch lengths together
//!
//! ## Architecture
//!
//! - **Optimizers** ([`optimizers`]) - Brent, conjugate gradient, pseudo-Newton,
//!   downhill simplex, coordinate sweeps and a meta-optimizer over parameter groups
//! - **Topology** ([`topology`]) - NNI hill climbing with listeners
//! - **Distances** ([`distance`]) - Pairwise maximum-likelihood distances
//! - **Configuration** ([`config`]) - Typed settings with builders
//! - **Progress Monitoring** ([`progress`]) - Phase and task events for front ends
//! - **Error Handling** ([`error`]) - Engine-level error type wrapping the core errors

pub(crate) mod cache;
pub mod config;
pub mod derivatives;
pub mod distance;
pub mod error;
pub mod function;
pub mod likelihood;
pub mod nan_watcher;
pub mod optimizers;
pub mod progress;
pub mod reparametrization;
pub mod scale;
pub mod state;
pub mod topology;
pub mod transaction;
