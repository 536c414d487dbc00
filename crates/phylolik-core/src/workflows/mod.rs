//! # Workflows Module
//!
//! High-level procedures that tie the engine together into complete
//! analyses. They are the entry points of front ends such as the CLI.
//!
//! ## Architecture
//!
//! - **Optimization** ([`optimize`]) - Tree scaling, grouped or single-optimizer
//!   numerical optimization, and the configuration-driven [`optimize::optimize_parameters`]
//! - **Topology Search** ([`nni`]) - NNI search with periodic numerical re-optimization
//! - **Distance Trees** ([`distance_tree`]) - Distance matrix, agglomerative
//!   reconstruction and optional iterative re-estimation
//!
//! Every workflow reports its phases through a
//! [`ProgressReporter`](crate::engine::progress::ProgressReporter) and logs
//! through `tracing`.

pub mod distance_tree;
pub mod nni;
pub mod optimize;
