//! Arena-backed rooted phylogenetic trees.
//!
//! Nodes live in a flat `Vec<Node>` and refer to each other by [`NodeId`]
//! (a `usize` index), so local rewiring — NNI swaps, rerooting — is plain
//! index assignment with no ownership hazards. Node identities are stable
//! for the life of a tree: no operation in this crate renumbers nodes.

use velella_core::{Result, Summarizable, VelellaError};

/// Index into a tree's node arena.
pub type NodeId = usize;

/// A single node in a phylogenetic tree.
#[derive(Debug, Clone)]
pub struct Node {
    /// Index of this node in the arena.
    pub id: NodeId,
    /// Parent node; `None` for the root.
    pub parent: Option<NodeId>,
    /// Child nodes.
    pub children: Vec<NodeId>,
    /// Length of the edge from this node up to its parent.
    pub branch_length: Option<f64>,
    /// Taxon label (leaves) or clade label.
    pub name: Option<String>,
}

impl Node {
    /// True if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True if this node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// True if this node has both a parent and children.
    pub fn is_internal(&self) -> bool {
        !self.is_leaf() && !self.is_root()
    }
}

/// A rooted phylogenetic tree stored as an arena of nodes.
#[derive(Debug, Clone)]
pub struct PhyloTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl PhyloTree {
    /// Create a tree with a single unnamed root node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                id: 0,
                parent: None,
                children: Vec::new(),
                branch_length: None,
                name: None,
            }],
            root: 0,
        }
    }

    /// Build a tree from pre-constructed nodes and a root index.
    pub fn from_nodes(nodes: Vec<Node>, root: NodeId) -> Result<Self> {
        if nodes.is_empty() {
            return Err(VelellaError::InvalidInput("empty node list".into()));
        }
        if root >= nodes.len() {
            return Err(VelellaError::InvalidInput(format!(
                "root index {} out of range ({})",
                root,
                nodes.len()
            )));
        }
        Ok(Self { nodes, root })
    }

    /// Append a child under `parent` and return its id.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: Option<String>,
        branch_length: Option<f64>,
    ) -> Result<NodeId> {
        if parent >= self.nodes.len() {
            return Err(VelellaError::InvalidInput(format!(
                "parent index {} out of range ({})",
                parent,
                self.nodes.len()
            )));
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            parent: Some(parent),
            children: Vec::new(),
            branch_length,
            name,
        });
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    /// Access a node, panicking on a bad id.
    ///
    /// All ids handed out by this tree are valid; out-of-range ids are
    /// programming errors.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Mutable access to a node, panicking on a bad id.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Checked access to a node.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Ids of all leaves.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.id)
            .collect()
    }

    /// Ids of all internal (non-leaf, non-root) nodes.
    pub fn internal_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_internal())
            .map(|n| n.id)
            .collect()
    }

    /// Sorted leaf names (unnamed leaves are skipped).
    pub fn leaf_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| n.is_leaf())
            .filter_map(|n| n.name.clone())
            .collect();
        names.sort();
        names
    }

    /// The other child of this node's parent, if the parent is binary.
    pub fn sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.nodes[id].parent?;
        let siblings = &self.nodes[parent].children;
        if siblings.len() != 2 {
            return None;
        }
        Some(if siblings[0] == id {
            siblings[1]
        } else {
            siblings[0]
        })
    }

    /// Sum of all branch lengths.
    pub fn total_branch_length(&self) -> f64 {
        self.nodes
            .iter()
            .filter_map(|n| n.branch_length)
            .sum()
    }

    /// Pre-order traversal (parent before children).
    pub fn iter_preorder(&self) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack = vec![self.root];
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            for &child in self.nodes[id].children.iter().rev() {
                stack.push(child);
            }
            Some(id)
        })
    }

    /// Post-order traversal (children before parent).
    pub fn iter_postorder(&self) -> impl Iterator<Item = NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            for &child in &self.nodes[id].children {
                stack.push(child);
            }
        }
        order.into_iter().rev()
    }

    /// Most recent common ancestor of two nodes.
    pub fn mrca(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        if a >= self.nodes.len() || b >= self.nodes.len() {
            return Err(VelellaError::InvalidInput("node id out of range".into()));
        }
        let mut ancestors = Vec::new();
        let mut cur = Some(a);
        while let Some(id) = cur {
            ancestors.push(id);
            cur = self.nodes[id].parent;
        }
        let mut cur = b;
        loop {
            if ancestors.contains(&cur) {
                return Ok(cur);
            }
            match self.nodes[cur].parent {
                Some(p) => cur = p,
                None => return Ok(self.root),
            }
        }
    }

    /// Number of edges on the path between two nodes.
    pub fn edges_between(&self, a: NodeId, b: NodeId) -> Result<usize> {
        let anc = self.mrca(a, b)?;
        let depth_from = |mut id: NodeId| {
            let mut d = 0;
            while id != anc {
                id = self.nodes[id].parent.expect("mrca is an ancestor");
                d += 1;
            }
            d
        };
        Ok(depth_from(a) + depth_from(b))
    }

    /// Re-seat the root on the edge between `at` and its parent, in place.
    ///
    /// The unrooted topology is unchanged and every node keeps its id: the
    /// existing root node is spliced out of its current position and
    /// re-inserted on the new root edge, with parent pointers along the
    /// path reversed. Rerooting on the current root edge is a no-op.
    pub fn reroot(&mut self, at: NodeId) -> Result<()> {
        if at >= self.nodes.len() {
            return Err(VelellaError::InvalidInput(format!(
                "reroot target {} out of range ({})",
                at,
                self.nodes.len()
            )));
        }
        let root = self.root;
        if at == root || self.nodes[at].parent == Some(root) {
            return Ok(());
        }
        if self.nodes[root].children.len() != 2 {
            return Err(VelellaError::InvalidInput(
                "reroot requires a bifurcating root".into(),
            ));
        }

        // Ancestor path from `at` up to the old root.
        let mut path = Vec::new();
        let mut cur = at;
        while let Some(p) = self.nodes[cur].parent {
            path.push(p);
            cur = p;
        }
        debug_assert_eq!(*path.last().expect("non-root node has ancestors"), root);
        // `chain` runs from parent(at) up to the root child on at's side.
        let chain = &path[..path.len() - 1];
        let top = *chain.last().expect("path below root is non-empty");

        // Splice the old root out: its two children are joined into one edge.
        let other = {
            let rc = &self.nodes[root].children;
            if rc[0] == top {
                rc[1]
            } else {
                rc[0]
            }
        };
        let joined = match (
            self.nodes[top].branch_length,
            self.nodes[other].branch_length,
        ) {
            (Some(x), Some(y)) => Some(x + y),
            (x, y) => x.or(y),
        };
        self.nodes[other].parent = Some(top);
        self.nodes[other].branch_length = joined;
        self.nodes[top].children.push(other);
        self.nodes[top].parent = None;
        self.nodes[root].children.clear();

        // Flip every edge on the chain; the edge length migrates to the
        // node that becomes the child.
        let flipped: Vec<(NodeId, NodeId, Option<f64>)> = chain
            .windows(2)
            .map(|w| (w[0], w[1], self.nodes[w[0]].branch_length))
            .collect();
        for (child, parent, length) in flipped {
            self.nodes[parent].children.retain(|&c| c != child);
            self.nodes[child].children.push(parent);
            self.nodes[parent].parent = Some(child);
            self.nodes[parent].branch_length = length;
        }

        // Seat the root node on the edge above `at`, splitting its length.
        let below = chain[0];
        let half = self.nodes[at].branch_length.map(|b| b / 2.0);
        self.nodes[below].children.retain(|&c| c != at);
        self.nodes[root].children = vec![at, below];
        self.nodes[at].parent = Some(root);
        self.nodes[at].branch_length = half;
        self.nodes[below].parent = Some(root);
        self.nodes[below].branch_length = half;
        self.nodes[root].parent = None;
        Ok(())
    }

    /// Verify structural invariants: one root, mutually consistent
    /// parent/child links, no duplicate children, all nodes reachable.
    pub fn check_structure(&self) -> Result<()> {
        let fail = |msg: String| Err(VelellaError::InvalidInput(msg));

        if self.nodes[self.root].parent.is_some() {
            return fail("root has a parent".into());
        }
        for node in &self.nodes {
            match node.parent {
                None => {
                    if node.id != self.root {
                        return fail(format!("node {} is a second root", node.id));
                    }
                }
                Some(p) => {
                    if p >= self.nodes.len() {
                        return fail(format!("node {} has dangling parent {}", node.id, p));
                    }
                    let refs = self.nodes[p]
                        .children
                        .iter()
                        .filter(|&&c| c == node.id)
                        .count();
                    if refs != 1 {
                        return fail(format!(
                            "node {} appears {} times in parent {}'s children",
                            node.id, refs, p
                        ));
                    }
                }
            }
            for (i, &c) in node.children.iter().enumerate() {
                if c >= self.nodes.len() {
                    return fail(format!("node {} has dangling child {}", node.id, c));
                }
                if self.nodes[c].parent != Some(node.id) {
                    return fail(format!("child {} does not point back to {}", c, node.id));
                }
                if node.children[i + 1..].contains(&c) {
                    return fail(format!("node {} lists child {} twice", node.id, c));
                }
            }
        }

        let reachable = self.iter_preorder().count();
        if reachable != self.nodes.len() {
            return fail(format!(
                "{} of {} nodes reachable from root",
                reachable,
                self.nodes.len()
            ));
        }
        Ok(())
    }

    /// True if every non-leaf node has exactly two children.
    pub fn is_binary(&self) -> bool {
        self.nodes
            .iter()
            .all(|n| n.is_leaf() || n.children.len() == 2)
    }

    /// Parse a Newick string.
    pub fn from_newick(input: &str) -> Result<Self> {
        crate::newick::parse(input)
    }

    /// Serialize to a Newick string.
    pub fn to_newick(&self) -> String {
        crate::newick::write(self)
    }
}

impl Default for PhyloTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Summarizable for PhyloTree {
    fn summary(&self) -> String {
        let leaves = self.leaf_count();
        format!(
            "PhyloTree: {} nodes ({} leaves, {} internal)",
            self.node_count(),
            leaves,
            self.node_count() - leaves
        )
    }
}
