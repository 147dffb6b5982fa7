//! Metropolis MCMC search over tree topologies.
//!
//! The driver owns one live tree that the proposer mutates in place.
//! Each iteration: propose, score (through the topology cache), then
//! accept or reject. An adaptive tolerance ("speed") term loosens the
//! Metropolis criterion while the chain explores and cools toward plain
//! hill-climbing as better trees are found.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use rand::Rng;
use tracing::{debug, trace};

use crate::newick;
use crate::propose::NniProposer;
use crate::score::{BranchLengthFitter, LikelihoodFn};
use crate::topology::{topology_key, TopologyKey};
use crate::tree::PhyloTree;
use velella_core::{Result, Scored, Summarizable};

/// Search loop knobs.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Reuse a cached score when a topology is revisited. When false the
    /// key is still computed and the cache still filled, but every
    /// iteration re-fits and re-scores.
    pub reuse_cached_scores: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            reuse_cached_scores: true,
        }
    }
}

/// A scored topology snapshot, independent of the live tree.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub tree: PhyloTree,
    pub score: f64,
}

impl Scored for CacheEntry {
    fn score(&self) -> f64 {
        self.score
    }
}

/// Memo of every topology visited during one run.
pub type TopologyCache = HashMap<TopologyKey, CacheEntry>;

/// Outcome of a search run.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub best_tree: PhyloTree,
    pub best_score: f64,
    pub iterations: usize,
    pub accepted: usize,
    /// Every topology visited during the run, each holding the best
    /// score ever observed for it.
    pub cache: TopologyCache,
}

impl Scored for SearchResult {
    fn score(&self) -> f64 {
        self.best_score
    }
}

/// Run the MCMC topology search from `init` until the proposer's
/// iteration budget runs out, returning the best tree found.
///
/// The acceptance rule is `next > current`, or
/// `next - current + speed > ln(U)` for uniform `U`. Acceptance halves
/// `speed`; a new best resets it to zero; rejection reverts the proposal
/// and leaves `speed` unchanged.
pub fn search_mcmc<R: Rng>(
    init: &PhyloTree,
    proposer: &mut NniProposer<'_>,
    fitter: &dyn BranchLengthFitter,
    likelihood: &dyn LikelihoodFn,
    config: &SearchConfig,
    rng: &mut R,
) -> Result<SearchResult> {
    let mut tree = init.clone();
    let mut score = fitter.fit(&mut tree)? + likelihood.score(&tree)?;
    let mut best_tree = tree.clone();
    let mut best_score = score;
    debug!(score, tree = %tree.summary(), "starting search");

    let mut cache = TopologyCache::new();
    let mut speed = 0.0f64;
    let mut iterations = 0;
    let mut accepted = 0;

    while proposer.more() {
        iterations += 1;
        proposer.propose(&mut tree, rng)?;

        let key = topology_key(&tree)?;
        let cached = if config.reuse_cached_scores {
            cache.get(&key).map(Scored::score)
        } else {
            None
        };
        let next = match cached {
            Some(score) => {
                trace!(iterations, score, "cache hit");
                score
            }
            None => {
                let next = fitter.fit(&mut tree)? + likelihood.score(&tree)?;
                // Keep the best score ever seen for a topology.
                match cache.entry(key) {
                    Entry::Occupied(mut slot) => {
                        if next > slot.get().score {
                            slot.insert(CacheEntry {
                                tree: tree.clone(),
                                score: next,
                            });
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(CacheEntry {
                            tree: tree.clone(),
                            score: next,
                        });
                    }
                }
                next
            }
        };

        if next > score || next - score + speed > rng.gen::<f64>().ln() {
            trace!(iterations, next, score, "accept");
            accepted += 1;
            score = next;
            speed /= 2.0;
            if score > best_score {
                best_score = score;
                best_tree = tree.clone();
                speed = 0.0;
                debug!(
                    iterations,
                    score = best_score,
                    newick = %newick::write(&best_tree),
                    "new best tree"
                );
            }
        } else {
            trace!(iterations, next, score, "reject");
            proposer.revert(&mut tree)?;
        }
    }

    debug!(iterations, accepted, best_score, "search finished");
    Ok(SearchResult {
        best_tree,
        best_score,
        iterations,
        accepted,
        cache,
    })
}
