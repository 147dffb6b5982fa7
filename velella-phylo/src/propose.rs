//! Topology move proposal and exact reversal.
//!
//! The only move kind is nearest-neighbor interchange (NNI): two subtrees
//! on opposite sides of an internal edge trade places. A proposal may
//! chain a second NNI and a reroot on top of the first; [`NniProposer`]
//! records everything it did so [`NniProposer::revert`] can undo the
//! moves in reverse order.

use rand::Rng;
use tracing::trace;

use crate::recon::{recon_root, SpeciesMap};
use crate::tree::{NodeId, PhyloTree};
use velella_core::{Result, VelellaError};

/// Chance that a proposal applies a second, independent NNI.
const DOUBLE_NNI_PROB: f64 = 0.3;
/// Chance that a proposal re-roots by reconciliation (when a species map
/// is configured).
const REROOT_PROB: f64 = 1.0;

/// Index-preserving subtree exchange; parents must already be resolved.
fn swap_subtrees(tree: &mut PhyloTree, a: NodeId, pa: NodeId, b: NodeId, pb: NodeId) -> Result<()> {
    let ia = tree
        .node(pa)
        .children
        .iter()
        .position(|&c| c == a)
        .ok_or_else(|| VelellaError::InvalidInput(format!("broken parent link at {a}")))?;
    let ib = tree
        .node(pb)
        .children
        .iter()
        .position(|&c| c == b)
        .ok_or_else(|| VelellaError::InvalidInput(format!("broken parent link at {b}")))?;

    tree.node_mut(pa).children[ia] = b;
    tree.node_mut(pb).children[ib] = a;
    tree.node_mut(a).parent = Some(pb);
    tree.node_mut(b).parent = Some(pa);
    Ok(())
}

/// Swap the subtrees rooted at `a` and `b` (explicit-pair NNI form).
///
/// Their parents must be joined by an edge; the swap crosses that edge.
/// Each subtree keeps its own branch length, and both child-list
/// positions are preserved, so applying the same swap twice is a no-op.
pub fn nni_swap(tree: &mut PhyloTree, a: NodeId, b: NodeId) -> Result<()> {
    let pa = tree
        .node(a)
        .parent
        .ok_or_else(|| VelellaError::InvalidInput(format!("node {a} has no parent")))?;
    let pb = tree
        .node(b)
        .parent
        .ok_or_else(|| VelellaError::InvalidInput(format!("node {b} has no parent")))?;
    if tree.node(pa).parent != Some(pb) && tree.node(pb).parent != Some(pa) {
        return Err(VelellaError::InvalidInput(format!(
            "nodes {a} and {b} are not on opposite sides of an edge"
        )));
    }
    swap_subtrees(tree, a, pa, b, pb)
}

/// Single-edge NNI form: swap `child` (a child of `node1`) with the
/// uncle subtree on the far side of the edge between `node1` and `node2`.
///
/// Naming the root edge redirects the move to the internal edge on the
/// other side of the root. Returns `false` without mutating when the
/// designated edge admits no interchange (a degenerate move, not an
/// error); passing nodes that do not share an edge is an error.
pub fn nni_edge(
    tree: &mut PhyloTree,
    node1: NodeId,
    node2: NodeId,
    child: NodeId,
) -> Result<bool> {
    // Orient so node1 is the child end of the edge.
    let (node1, mut node2) = if tree.node(node1).parent == Some(node2) {
        (node1, node2)
    } else if tree.node(node2).parent == Some(node1) {
        (node2, node1)
    } else {
        return Err(VelellaError::InvalidInput(format!(
            "nodes {node1} and {node2} do not share an edge"
        )));
    };

    if node2 == tree.root() {
        // Root edge named: redirect to node1's sibling side.
        let redirected = tree.sibling(node1).ok_or_else(|| {
            VelellaError::InvalidInput("root is not bifurcating".to_string())
        })?;
        if tree.node(redirected).children.len() < 2 {
            return Ok(false);
        }
        node2 = redirected;
    }

    let root = tree.root();
    let uncle = if tree.node(node1).parent == Some(root) && tree.node(node2).parent == Some(root)
    {
        // Edge crosses the root; the uncle comes from below node2.
        let c = &tree.node(node2).children;
        if c.len() < 2
            || (tree.node(c[0]).children.len() < 2 && tree.node(c[1]).children.len() < 2)
        {
            return Ok(false);
        }
        c[0]
    } else {
        *tree
            .node(node2)
            .children
            .iter()
            .find(|&&c| c != node1)
            .ok_or_else(|| {
                VelellaError::InvalidInput(format!("node {node2} has no uncle for {node1}"))
            })?
    };

    if !tree.node(node1).children.contains(&child) {
        return Err(VelellaError::InvalidInput(format!(
            "node {child} is not a child of {node1}"
        )));
    }
    let pu = tree
        .node(uncle)
        .parent
        .ok_or_else(|| VelellaError::InvalidInput(format!("broken parent link at {uncle}")))?;
    swap_subtrees(tree, child, node1, uncle, pu)?;
    Ok(true)
}

/// Pick a uniform random NNI move, as a pair of subtrees to swap.
///
/// The internal edge is chosen by picking an internal non-root node `x`;
/// the swap trades a random child of `x` with `x`'s sibling. Returns
/// `None` when the tree has no internal edge (fewer than four leaves).
pub fn random_nni<R: Rng>(tree: &PhyloTree, rng: &mut R) -> Option<(NodeId, NodeId)> {
    let candidates: Vec<NodeId> = (0..tree.node_count())
        .filter(|&id| tree.node(id).parent.is_some() && !tree.node(id).children.is_empty())
        .collect();
    if candidates.is_empty() {
        return None;
    }
    let x = candidates[rng.gen_range(0..candidates.len())];
    let children = &tree.node(x).children;
    let a = children[rng.gen_range(0..children.len())];
    let b = tree.sibling(x)?;
    Some((a, b))
}

/// One applied NNI, kept so it can be undone.
#[derive(Debug, Clone, Copy)]
struct Move {
    a: NodeId,
    b: NodeId,
}

/// Everything a single proposal changed.
#[derive(Debug, Clone, Default)]
struct Proposal {
    first: Option<Move>,
    second: Option<Move>,
    /// The root's two children before any reroot.
    old_root: Option<(NodeId, NodeId)>,
}

/// Stateful proposer that mutates a tree in place and can undo exactly
/// one outstanding proposal.
///
/// Each proposal applies one NNI, a second NNI with a fixed probability,
/// and, when a species map is configured, re-roots the tree by
/// reconciliation. Without a species map moves are topology-only.
/// Degenerate trees (too small for any NNI) still produce an empty,
/// revertible proposal.
pub struct NniProposer<'a> {
    species: Option<&'a SpeciesMap>,
    niter: usize,
    iter: usize,
    last: Option<Proposal>,
}

impl<'a> NniProposer<'a> {
    pub fn new(niter: usize) -> Self {
        Self {
            species: None,
            niter,
            iter: 0,
            last: None,
        }
    }

    /// A proposer that also re-roots each proposal by reconciliation
    /// against the given species map.
    pub fn with_species(niter: usize, species: &'a SpeciesMap) -> Self {
        Self {
            species: Some(species),
            niter,
            iter: 0,
            last: None,
        }
    }

    /// Whether the iteration budget allows another proposal.
    pub fn more(&self) -> bool {
        self.iter < self.niter
    }

    /// Apply a new proposal to `tree`, replacing any outstanding one.
    pub fn propose<R: Rng>(&mut self, tree: &mut PhyloTree, rng: &mut R) -> Result<()> {
        self.iter += 1;
        let mut proposal = Proposal::default();

        if let Some((a, b)) = random_nni(tree, rng) {
            nni_swap(tree, a, b)?;
            proposal.first = Some(Move { a, b });

            if rng.gen::<f64>() < DOUBLE_NNI_PROB {
                if let Some((a, b)) = random_nni(tree, rng) {
                    nni_swap(tree, a, b)?;
                    proposal.second = Some(Move { a, b });
                }
            }
        }

        // Snapshot the rooting only now: an NNI across a root edge can
        // change which nodes sit under the root.
        if let Some(map) = self.species {
            if rng.gen::<f64>() < REROOT_PROB {
                let root_children = &tree.node(tree.root()).children;
                if root_children.len() == 2 {
                    proposal.old_root = Some((root_children[0], root_children[1]));
                    recon_root(tree, map)?;
                }
            }
        }

        trace!(
            first = ?proposal.first,
            second = ?proposal.second,
            "proposed topology move"
        );
        self.last = Some(proposal);
        Ok(())
    }

    /// Undo the outstanding proposal, restoring the previous topology.
    ///
    /// Moves are unwound in reverse order: rooting first, then the
    /// second NNI, then the first. A no-op when nothing is outstanding.
    pub fn revert(&mut self, tree: &mut PhyloTree) -> Result<()> {
        let Some(proposal) = self.last.take() else {
            return Ok(());
        };

        if let Some((r1, r2)) = proposal.old_root {
            // After rerooting elsewhere, one of the old root's children
            // became the parent of the other; rerooting at the child
            // re-splits that edge and restores the old rooting.
            if tree.node(r1).parent == Some(r2) {
                tree.reroot(r1)?;
            } else if tree.node(r2).parent == Some(r1) {
                tree.reroot(r2)?;
            }
        }
        if let Some(m) = proposal.second {
            nni_swap(tree, m.a, m.b)?;
        }
        if let Some(m) = proposal.first {
            nni_swap(tree, m.a, m.b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::topology_key;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn caterpillar() -> PhyloTree {
        PhyloTree::from_newick("(((a:1,b:1):1,c:1):1,d:1);").unwrap()
    }

    fn leaf(tree: &PhyloTree, name: &str) -> NodeId {
        (0..tree.node_count())
            .find(|&id| tree.node(id).name.as_deref() == Some(name))
            .unwrap()
    }

    #[test]
    fn caterpillar_nni_swaps_cherry_member_out() {
        let mut tree = caterpillar();
        let before = topology_key(&tree).unwrap();
        let a = leaf(&tree, "a");
        let c = leaf(&tree, "c");
        nni_swap(&mut tree, a, c).unwrap();
        tree.check_structure().unwrap();
        let after = topology_key(&tree).unwrap();
        assert_ne!(before, after);
        // a and c traded parents, so the cherry is now (c, b).
        assert_eq!(tree.sibling(c), Some(leaf(&tree, "b")));
    }

    #[test]
    fn nni_swap_is_self_inverse() {
        let mut tree = caterpillar();
        let before = topology_key(&tree).unwrap();
        let a = leaf(&tree, "a");
        let c = leaf(&tree, "c");
        nni_swap(&mut tree, a, c).unwrap();
        nni_swap(&mut tree, a, c).unwrap();
        assert_eq!(topology_key(&tree).unwrap(), before);
    }

    #[test]
    fn nni_swap_rejects_distant_pair() {
        let mut tree = caterpillar();
        let a = leaf(&tree, "a");
        let d = leaf(&tree, "d");
        assert!(nni_swap(&mut tree, a, d).is_err());
    }

    #[test]
    fn nni_edge_swaps_across_internal_edge() {
        let mut tree = caterpillar();
        let a = leaf(&tree, "a");
        let node1 = tree.node(a).parent.unwrap();
        let node2 = tree.node(node1).parent.unwrap();
        assert!(nni_edge(&mut tree, node1, node2, a).unwrap());
        tree.check_structure().unwrap();
        // a traded places with its uncle c.
        assert_eq!(tree.sibling(leaf(&tree, "c")), Some(leaf(&tree, "b")));
        assert_eq!(tree.node(a).parent, Some(node2));
    }

    #[test]
    fn nni_edge_root_edge_redirects() {
        // Naming the root edge from the (a,b) side redirects the move to
        // the internal edge on the ((c,d),e) side.
        let mut tree =
            PhyloTree::from_newick("((a:1,b:1):1,((c:1,d:1):1,e:1):1);").unwrap();
        let ab = tree.node(leaf(&tree, "a")).parent.unwrap();
        let a = leaf(&tree, "a");
        let root = tree.root();
        assert!(nni_edge(&mut tree, ab, root, a).unwrap());
        tree.check_structure().unwrap();
        assert!(tree.is_binary());
        // a crossed the root.
        assert_ne!(tree.node(a).parent, Some(ab));
    }

    #[test]
    fn nni_edge_declines_when_no_internal_edge() {
        // In ((a,b),(c,d)) the redirected side has only leaf children,
        // so the move must decline without touching the tree.
        let mut tree = PhyloTree::from_newick("((a:1,b:1):1,(c:1,d:1):1);").unwrap();
        let before = topology_key(&tree).unwrap();
        let ab = tree.node(leaf(&tree, "a")).parent.unwrap();
        let a = leaf(&tree, "a");
        let root = tree.root();
        assert!(!nni_edge(&mut tree, ab, root, a).unwrap());
        assert_eq!(topology_key(&tree).unwrap(), before);
    }

    #[test]
    fn nni_edge_rejects_non_edge() {
        let mut tree = caterpillar();
        let a = leaf(&tree, "a");
        let d = leaf(&tree, "d");
        assert!(nni_edge(&mut tree, a, d, a).is_err());
    }

    #[test]
    fn random_nni_none_on_tiny_tree() {
        let tree = PhyloTree::from_newick("(a:1,b:1);").unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(random_nni(&tree, &mut rng).is_none());
    }

    #[test]
    fn random_nni_yields_valid_swaps() {
        let tree = caterpillar();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let (a, b) = random_nni(&tree, &mut rng).unwrap();
            let mut copy = tree.clone();
            nni_swap(&mut copy, a, b).unwrap();
            copy.check_structure().unwrap();
        }
    }

    #[test]
    fn propose_then_revert_restores_topology() {
        let mut tree =
            PhyloTree::from_newick("(((a:1,b:1):1,(c:1,d:1):1):1,(e:1,f:1):1);").unwrap();
        let mut proposer = NniProposer::new(200);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..200 {
            let before = topology_key(&tree).unwrap();
            proposer.propose(&mut tree, &mut rng).unwrap();
            tree.check_structure().unwrap();
            proposer.revert(&mut tree).unwrap();
            tree.check_structure().unwrap();
            assert_eq!(topology_key(&tree).unwrap(), before);
        }
    }

    #[test]
    fn propose_with_recon_reroot_reverts_exactly() {
        use crate::recon::SpeciesMap;
        use std::collections::HashMap;

        let species = SpeciesMap::new(
            PhyloTree::from_newick("(((a:1,b:1):1,(c:1,d:1):1):1,(e:1,f:1):1);").unwrap(),
            HashMap::new(),
        )
        .unwrap();
        let mut tree =
            PhyloTree::from_newick("((a:1,(b:1,c:1):1):1,((d:1,e:1):1,f:1):1);").unwrap();
        let mut proposer = NniProposer::with_species(100, &species);
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        for _ in 0..100 {
            let before = topology_key(&tree).unwrap();
            proposer.propose(&mut tree, &mut rng).unwrap();
            tree.check_structure().unwrap();
            proposer.revert(&mut tree).unwrap();
            tree.check_structure().unwrap();
            assert_eq!(topology_key(&tree).unwrap(), before);
        }
    }

    #[test]
    fn revert_without_proposal_is_noop() {
        let mut tree = caterpillar();
        let before = topology_key(&tree).unwrap();
        let mut proposer = NniProposer::new(5);
        proposer.revert(&mut tree).unwrap();
        assert_eq!(topology_key(&tree).unwrap(), before);
    }

    #[test]
    fn proposer_honors_iteration_budget() {
        let mut tree = caterpillar();
        let mut proposer = NniProposer::new(3);
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut n = 0;
        while proposer.more() {
            proposer.propose(&mut tree, &mut rng).unwrap();
            proposer.revert(&mut tree).unwrap();
            n += 1;
        }
        assert_eq!(n, 3);
    }

    #[test]
    fn degenerate_tree_proposal_is_recorded_and_revertible() {
        let mut tree = PhyloTree::from_newick("(a:1,b:1);").unwrap();
        let before = topology_key(&tree).unwrap();
        let mut proposer = NniProposer::new(1);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        proposer.propose(&mut tree, &mut rng).unwrap();
        proposer.revert(&mut tree).unwrap();
        assert_eq!(topology_key(&tree).unwrap(), before);
    }
}
