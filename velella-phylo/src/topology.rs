//! Canonical topology keys for memoizing scored trees.
//!
//! Two trees receive the same key exactly when they have the same rooted
//! branching structure over the same leaf set, regardless of the order in
//! which children happen to be stored. Rooting is significant: the same
//! unrooted topology rooted on different edges produces different keys,
//! because reconciliation-based scores depend on the root.

use std::collections::HashMap;

use crate::tree::{NodeId, PhyloTree};
use velella_core::{Result, VelellaError};

/// Token emitted for an internal node in the canonical postorder stream.
const INTERNAL: i32 = -1;

/// A canonical, hashable encoding of a tree's rooted topology.
///
/// The encoding is a postorder token stream: a leaf emits its rank in the
/// sorted leaf-name table, an internal node emits its children's streams
/// (ordered by the smallest leaf rank in each subtree) followed by `-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopologyKey(Vec<i32>);

impl TopologyKey {
    /// The raw token sequence.
    pub fn tokens(&self) -> &[i32] {
        &self.0
    }
}

/// Compute the canonical topology key of a tree.
///
/// Every leaf must carry a name; names must be unique.
pub fn topology_key(tree: &PhyloTree) -> Result<TopologyKey> {
    let names = tree.leaf_names();
    let ranks: HashMap<&str, i32> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i as i32))
        .collect();
    if ranks.len() != tree.leaf_count() {
        return Err(VelellaError::InvalidInput(
            "topology key requires unique, named leaves".into(),
        ));
    }

    let mut tokens = Vec::with_capacity(tree.node_count());
    encode(tree, tree.root(), &ranks, &mut tokens)?;
    Ok(TopologyKey(tokens))
}

/// Emit the canonical stream for `id`, returning the subtree's minimum
/// leaf rank (the sort key for child ordering).
fn encode(
    tree: &PhyloTree,
    id: NodeId,
    ranks: &HashMap<&str, i32>,
    out: &mut Vec<i32>,
) -> Result<i32> {
    let node = tree.node(id);
    if node.is_leaf() {
        let name = node.name.as_deref().ok_or_else(|| {
            VelellaError::InvalidInput(format!("leaf {} has no name", id))
        })?;
        let rank = ranks[name];
        out.push(rank);
        return Ok(rank);
    }

    let mut parts: Vec<(i32, Vec<i32>)> = Vec::with_capacity(node.children.len());
    for &child in &node.children {
        let mut stream = Vec::new();
        let min = encode(tree, child, ranks, &mut stream)?;
        parts.push((min, stream));
    }
    parts.sort_by_key(|&(min, _)| min);
    let subtree_min = parts[0].0;
    for (_, stream) in parts {
        out.extend(stream);
    }
    out.push(INTERNAL);
    Ok(subtree_min)
}
