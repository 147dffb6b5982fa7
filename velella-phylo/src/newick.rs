//! Newick tree format parsing and writing.
//!
//! Grammar handled:
//! ```text
//! tree     = subtree ';'
//! subtree  = '(' subtree (',' subtree)* ')' label | label
//! label    = name? (':' length)?
//! ```

use crate::tree::{Node, NodeId, PhyloTree};
use velella_core::{Result, VelellaError};

/// Parse a Newick string into a [`PhyloTree`].
pub fn parse(input: &str) -> Result<PhyloTree> {
    let mut cursor = Cursor {
        bytes: input.as_bytes(),
        pos: 0,
        nodes: Vec::new(),
    };
    let root = cursor.subtree(None)?;
    cursor.skip_ws();
    if !cursor.eat(b';') {
        return Err(cursor.error("expected ';' terminating tree"));
    }
    PhyloTree::from_nodes(cursor.nodes, root)
}

/// Serialize a [`PhyloTree`] to a Newick string.
pub fn write(tree: &PhyloTree) -> String {
    let mut out = String::new();
    write_node(tree, tree.root(), &mut out);
    out.push(';');
    out
}

fn write_node(tree: &PhyloTree, id: NodeId, out: &mut String) {
    let node = tree.node(id);
    if !node.is_leaf() {
        out.push('(');
        for (i, &child) in node.children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_node(tree, child, out);
        }
        out.push(')');
    }
    if let Some(name) = &node.name {
        out.push_str(name);
    }
    if let Some(len) = node.branch_length {
        out.push(':');
        let text = format!("{:.10}", len);
        out.push_str(text.trim_end_matches('0').trim_end_matches('.'));
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    nodes: Vec<Node>,
}

impl Cursor<'_> {
    fn subtree(&mut self, parent: Option<NodeId>) -> Result<NodeId> {
        self.skip_ws();
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            parent,
            children: Vec::new(),
            branch_length: None,
            name: None,
        });

        if self.eat(b'(') {
            loop {
                let child = self.subtree(Some(id))?;
                self.nodes[id].children.push(child);
                self.skip_ws();
                if !self.eat(b',') {
                    break;
                }
            }
            if !self.eat(b')') {
                return Err(self.error("expected ')' or ','"));
            }
        }

        let name = self.take_while(|b| !b",():;".contains(&b) && !b.is_ascii_whitespace());
        if !name.is_empty() {
            self.nodes[id].name = Some(name);
        }
        self.skip_ws();
        if self.eat(b':') {
            self.skip_ws();
            let text = self.take_while(|b| !b",();".contains(&b) && !b.is_ascii_whitespace());
            let len: f64 = text
                .parse()
                .map_err(|_| self.error("malformed branch length"))?;
            self.nodes[id].branch_length = Some(len);
        }
        Ok(id)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn error(&self, msg: &str) -> VelellaError {
        VelellaError::Parse(format!("{} at byte {}", msg, self.pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_four_leaves() {
        let tree = parse("((A:0.1,B:0.2):0.3,(C:0.4,D:0.5):0.6);").unwrap();
        assert_eq!(tree.leaf_count(), 4);
        assert_eq!(tree.leaf_names(), vec!["A", "B", "C", "D"]);
        assert!(tree.check_structure().is_ok());
    }

    #[test]
    fn parse_without_lengths() {
        let tree = parse("((A,B),C);").unwrap();
        assert_eq!(tree.leaf_count(), 3);
        assert!(tree.node(tree.leaves()[0]).branch_length.is_none());
    }

    #[test]
    fn parse_with_internal_labels() {
        let tree = parse("((A:1,B:1)ab:2,C:3)r;").unwrap();
        let root = tree.node(tree.root());
        assert_eq!(root.name.as_deref(), Some("r"));
    }

    #[test]
    fn roundtrip_preserves_text() {
        let text = "((A:0.1,B:0.2):0.3,(C:0.4,D:0.5):0.6);";
        let tree = parse(text).unwrap();
        assert_eq!(write(&tree), text);
    }

    #[test]
    fn rejects_missing_semicolon() {
        assert!(parse("(A,B)").is_err());
    }

    #[test]
    fn rejects_unbalanced_parens() {
        assert!(parse("((A,B);").is_err());
        assert!(parse("(A,B));").is_err());
    }

    #[test]
    fn rejects_bad_branch_length() {
        assert!(parse("(A:x,B:1);").is_err());
    }

    #[test]
    fn tolerates_whitespace() {
        let tree = parse("( (A:1, B:2) :3 , C:4 );").unwrap();
        assert_eq!(tree.leaf_names(), vec!["A", "B", "C"]);
    }
}
