//! Gene-tree / species-tree reconciliation.
//!
//! Maps each gene-tree node onto the species tree by LCA mapping, labels
//! internal nodes as speciations or duplications, counts implied losses,
//! and finds the rooting of a gene tree that minimizes reconciliation cost.

use std::collections::HashMap;

use crate::tree::{NodeId, PhyloTree};
use velella_core::{Result, VelellaError};

/// Event type inferred for a gene-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A leaf: an extant gene.
    Gene,
    /// An internal node mapped strictly below both children's images.
    Speciation,
    /// An internal node sharing its species-tree image with a child.
    Duplication,
}

/// A reference species tree plus the gene-name → species-name lookup.
///
/// Gene names absent from the lookup are assumed to already be species
/// names (identity mapping).
#[derive(Debug, Clone)]
pub struct SpeciesMap {
    tree: PhyloTree,
    gene_to_species: HashMap<String, String>,
    species_leaves: HashMap<String, NodeId>,
}

impl SpeciesMap {
    pub fn new(tree: PhyloTree, gene_to_species: HashMap<String, String>) -> Result<Self> {
        let mut species_leaves = HashMap::new();
        for leaf in tree.leaves() {
            let name = tree.node(leaf).name.clone().ok_or_else(|| {
                VelellaError::InvalidInput(format!("species leaf {} has no name", leaf))
            })?;
            if species_leaves.insert(name.clone(), leaf).is_some() {
                return Err(VelellaError::InvalidInput(format!(
                    "duplicate species name {:?}",
                    name
                )));
            }
        }
        Ok(Self {
            tree,
            gene_to_species,
            species_leaves,
        })
    }

    /// The species tree.
    pub fn species_tree(&self) -> &PhyloTree {
        &self.tree
    }

    /// Resolve a gene name to its species-tree leaf.
    pub fn species_leaf(&self, gene_name: &str) -> Result<NodeId> {
        let species = self
            .gene_to_species
            .get(gene_name)
            .map(String::as_str)
            .unwrap_or(gene_name);
        self.species_leaves.get(species).copied().ok_or_else(|| {
            VelellaError::InvalidInput(format!(
                "gene {:?} maps to unknown species {:?}",
                gene_name, species
            ))
        })
    }
}

/// LCA-map every gene-tree node onto the species tree.
///
/// Returns a vector indexed by gene-tree `NodeId`: leaves map to their
/// species leaf, internal nodes to the MRCA of their children's images.
pub fn reconcile(gene: &PhyloTree, map: &SpeciesMap) -> Result<Vec<NodeId>> {
    let mut recon = vec![0; gene.node_count()];
    for id in gene.iter_postorder() {
        let node = gene.node(id);
        if node.is_leaf() {
            let name = node.name.as_deref().ok_or_else(|| {
                VelellaError::InvalidInput(format!("gene leaf {} has no name", id))
            })?;
            recon[id] = map.species_leaf(name)?;
        } else {
            let mut image = recon[node.children[0]];
            for &child in &node.children[1..] {
                image = map.species_tree().mrca(image, recon[child])?;
            }
            recon[id] = image;
        }
    }
    Ok(recon)
}

/// Label every gene-tree node with its inferred event.
///
/// An internal node whose species-tree image equals any child's image is a
/// duplication; other internal nodes are speciations; leaves are genes.
pub fn label_events(gene: &PhyloTree, recon: &[NodeId]) -> Vec<Event> {
    (0..gene.node_count())
        .map(|id| {
            let node = gene.node(id);
            if node.is_leaf() {
                Event::Gene
            } else if node.children.iter().any(|&c| recon[c] == recon[id]) {
                Event::Duplication
            } else {
                Event::Speciation
            }
        })
        .collect()
}

/// Count the gene losses implied by a reconciliation.
///
/// Each gene-tree edge whose endpoints map more than one species-tree edge
/// apart implies one loss per skipped species branch.
pub fn count_losses(gene: &PhyloTree, map: &SpeciesMap, recon: &[NodeId]) -> Result<usize> {
    let mut losses = 0;
    for id in gene.iter_postorder() {
        for &child in &gene.node(id).children {
            let span = map.species_tree().edges_between(recon[id], recon[child])?;
            if span > 1 {
                losses += span - 1;
            }
        }
    }
    Ok(losses)
}

/// Reconciliation cost of a gene tree: duplications plus losses.
pub fn recon_cost(gene: &PhyloTree, map: &SpeciesMap) -> Result<usize> {
    let recon = reconcile(gene, map)?;
    let dups = label_events(gene, &recon)
        .iter()
        .filter(|&&e| e == Event::Duplication)
        .count();
    Ok(dups + count_losses(gene, map, &recon)?)
}

/// Re-root `gene` in place on the edge minimizing duplication+loss cost.
///
/// Ties break toward the lowest candidate node id, so the result is
/// deterministic for a given input tree.
pub fn recon_root(gene: &mut PhyloTree, map: &SpeciesMap) -> Result<()> {
    let mut best: Option<(usize, NodeId)> = None;
    for id in 0..gene.node_count() {
        if id == gene.root() {
            continue;
        }
        let mut candidate = gene.clone();
        candidate.reroot(id)?;
        let cost = recon_cost(&candidate, map)?;
        if best.map_or(true, |(c, _)| cost < c) {
            best = Some((cost, id));
        }
    }
    if let Some((_, id)) = best {
        gene.reroot(id)?;
    }
    Ok(())
}
