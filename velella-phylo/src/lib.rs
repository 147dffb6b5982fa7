//! Phylogenetic trees and stochastic topology search for Velella.
//!
//! The centerpiece is an MCMC search over gene-tree topologies:
//!
//! - **Tree data structures** — rooted binary trees with in-place rerooting
//! - **Newick parsing** — read and write the standard tree format
//! - **Tree construction** — distance matrices and neighbor-joining
//! - **Reconciliation** — gene-to-species mapping, event labeling, loss counts
//! - **Topology moves** — NNI proposals with exact undo
//! - **Scoring** — parsimony and HKY85 branch-length fitters,
//!   duplication/loss likelihood
//! - **Search** — Metropolis driver with topology-keyed score memoization
//!
//! A typical run builds a starting tree with [`construct::initial_tree`],
//! then drives [`search::search_mcmc`] with an [`propose::NniProposer`]
//! and a fitter/likelihood pair from [`score`].

pub mod construct;
pub mod distance;
pub mod models;
pub mod newick;
pub mod propose;
pub mod recon;
pub mod score;
pub mod search;
pub mod topology;
pub mod tree;

pub use propose::NniProposer;
pub use score::{BranchLengthFitter, LikelihoodFn};
pub use search::{search_mcmc, SearchConfig, SearchResult};
pub use topology::{topology_key, TopologyKey};
pub use tree::{Node, NodeId, PhyloTree};
