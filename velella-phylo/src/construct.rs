//! Distance-based construction of starting trees.

use crate::distance::{distance_matrix, DistanceMatrix};
use crate::recon::SpeciesMap;
use crate::tree::{Node, NodeId, PhyloTree};
use velella_core::{Result, VelellaError};

/// Build a tree with the Saitou-Nei neighbor-joining algorithm.
///
/// Deterministic given its input. The returned tree is rooted on the final
/// join, with every non-root node carrying a branch length.
pub fn neighbor_joining(distances: &DistanceMatrix, leaf_names: &[String]) -> Result<PhyloTree> {
    let n = distances.n();
    if n < 2 {
        return Err(VelellaError::InvalidInput(
            "neighbor joining needs at least 2 taxa".into(),
        ));
    }
    if leaf_names.len() != n {
        return Err(VelellaError::InvalidInput(format!(
            "{} names for {} taxa",
            leaf_names.len(),
            n
        )));
    }

    let mut nodes: Vec<Node> = leaf_names
        .iter()
        .enumerate()
        .map(|(id, name)| Node {
            id,
            parent: None,
            children: Vec::new(),
            branch_length: None,
            name: Some(name.clone()),
        })
        .collect();

    // Working copy of the distance matrix over currently active clusters.
    let mut dist = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            dist[i][j] = distances.get(i, j);
        }
    }
    let mut active: Vec<NodeId> = (0..n).collect();
    let mut m = n;

    while m > 2 {
        let row_sums: Vec<f64> = (0..m).map(|i| dist[i].iter().take(m).sum()).collect();

        // Minimize the Q criterion.
        let (mut bi, mut bj, mut best_q) = (0, 1, f64::INFINITY);
        for i in 0..m {
            for j in (i + 1)..m {
                let q = (m as f64 - 2.0) * dist[i][j] - row_sums[i] - row_sums[j];
                if q < best_q {
                    best_q = q;
                    bi = i;
                    bj = j;
                }
            }
        }

        let d_ij = dist[bi][bj];
        let b_i = d_ij / 2.0 + (row_sums[bi] - row_sums[bj]) / (2.0 * (m as f64 - 2.0));
        let b_j = d_ij - b_i;

        let joined = nodes.len();
        nodes.push(Node {
            id: joined,
            parent: None,
            children: vec![active[bi], active[bj]],
            branch_length: None,
            name: None,
        });
        nodes[active[bi]].parent = Some(joined);
        nodes[active[bi]].branch_length = Some(b_i.max(0.0));
        nodes[active[bj]].parent = Some(joined);
        nodes[active[bj]].branch_length = Some(b_j.max(0.0));

        // The joined cluster replaces slot bi; the last active slot fills bj.
        for k in 0..m {
            if k != bi && k != bj {
                let d_new = (dist[bi][k] + dist[bj][k] - d_ij) / 2.0;
                dist[bi][k] = d_new;
                dist[k][bi] = d_new;
            }
        }
        active[bi] = joined;
        let last = m - 1;
        if bj != last {
            active[bj] = active[last];
            for k in 0..m {
                // Keep the diagonal at zero: copying d(last, bj) into
                // dist[bj][bj] would poison every later row sum.
                if k == bj {
                    continue;
                }
                dist[bj][k] = dist[last][k];
                dist[k][bj] = dist[k][last];
            }
        }
        m -= 1;
    }

    // Root on the final edge.
    let d = dist[0][1];
    let root = nodes.len();
    nodes.push(Node {
        id: root,
        parent: None,
        children: vec![active[0], active[1]],
        branch_length: None,
        name: None,
    });
    for &child in &[active[0], active[1]] {
        nodes[child].parent = Some(root);
        nodes[child].branch_length = Some((d / 2.0).max(0.0));
    }

    PhyloTree::from_nodes(nodes, root)
}

/// Build the starting tree for a search: neighbor joining over Jukes-Cantor
/// distances, then rooting by reconciliation when a species map is given.
pub fn initial_tree(
    seqs: &[&[u8]],
    names: &[String],
    species: Option<&SpeciesMap>,
) -> Result<PhyloTree> {
    let matrix = distance_matrix(seqs)?;
    let mut tree = neighbor_joining(&matrix, names)?;
    if let Some(map) = species {
        crate::recon::recon_root(&mut tree, map)?;
    }
    Ok(tree)
}
