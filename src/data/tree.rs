//! Phylogenetic tree over taxa, with Newick I/O and tip pruning.
//!
//! Nodes live in a flat arena and are referenced by [`NodeId`].

use crate::error::{AmpliconError, Result};
use std::collections::HashSet;
use std::path::Path;

/// Index into the tree's node arena.
pub type NodeId = usize;

/// A single node in the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Branch length from this node to its parent.
    pub branch_length: Option<f64>,
    pub name: Option<String>,
}

impl Node {
    fn empty(parent: Option<NodeId>) -> Self {
        Self {
            parent,
            children: Vec::new(),
            branch_length: None,
            name: None,
        }
    }

    /// True if this node has no children.
    pub fn is_tip(&self) -> bool {
        self.children.is_empty()
    }
}

/// A rooted phylogenetic tree whose tips are taxon IDs.
#[derive(Debug, Clone, PartialEq)]
pub struct PhyloTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl PhyloTree {
    /// Parse a Newick string.
    pub fn from_newick(input: &str) -> Result<Self> {
        let mut parser = NewickParser::new(input.as_bytes());
        let root = parser.parse_tree()?;
        let tree = Self {
            nodes: parser.nodes,
            root,
        };
        let tips = tree.tip_labels();
        let unique: HashSet<&String> = tips.iter().collect();
        if unique.len() != tips.len() {
            return Err(AmpliconError::TreeParse("duplicate tip labels".to_string()));
        }
        Ok(tree)
    }

    /// Read a Newick file.
    pub fn from_newick_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_newick(&text)
    }

    /// Serialize to Newick.
    pub fn to_newick(&self) -> String {
        let mut buf = String::new();
        self.write_subtree(self.root, &mut buf);
        buf.push(';');
        buf
    }

    fn write_subtree(&self, id: NodeId, buf: &mut String) {
        let node = &self.nodes[id];
        if !node.children.is_empty() {
            buf.push('(');
            for (i, &child) in node.children.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                self.write_subtree(child, buf);
            }
            buf.push(')');
        }
        if let Some(name) = &node.name {
            buf.push_str(name);
        }
        if let Some(len) = node.branch_length {
            buf.push(':');
            let s = format!("{:.10}", len);
            let s = s.trim_end_matches('0').trim_end_matches('.');
            buf.push_str(s);
        }
    }

    /// Root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Node by ID.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Number of nodes reachable from the root.
    pub fn node_count(&self) -> usize {
        self.preorder().len()
    }

    /// Tip labels in left-to-right order. Unnamed tips are skipped.
    pub fn tip_labels(&self) -> Vec<String> {
        self.preorder()
            .into_iter()
            .filter(|&id| self.nodes[id].is_tip())
            .filter_map(|id| self.nodes[id].name.clone())
            .collect()
    }

    /// Sum of all branch lengths.
    pub fn total_length(&self) -> f64 {
        self.preorder()
            .into_iter()
            .filter_map(|id| self.nodes[id].branch_length)
            .sum()
    }

    fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            for &child in self.nodes[id].children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    /// Return a new tree containing only the named tips.
    ///
    /// Internal nodes left with one child are collapsed, their branch lengths
    /// added to the surviving child's branch. Fails if no tip survives.
    pub fn prune_to(&self, keep: &[String]) -> Result<Self> {
        let keep: HashSet<&str> = keep.iter().map(|s| s.as_str()).collect();
        let mut nodes: Vec<Node> = Vec::new();
        let root = self
            .copy_pruned(self.root, None, &keep, &mut nodes)
            .ok_or_else(|| AmpliconError::EmptyData("pruning removed every tip".to_string()))?;
        // A root with a single child is replaced by that child.
        let mut root = root;
        while nodes[root].children.len() == 1 {
            let child = nodes[root].children[0];
            nodes[child].parent = None;
            nodes[child].branch_length = None;
            root = child;
        }
        Ok(Self { nodes, root }.compacted())
    }

    fn copy_pruned(
        &self,
        id: NodeId,
        parent: Option<NodeId>,
        keep: &HashSet<&str>,
        out: &mut Vec<Node>,
    ) -> Option<NodeId> {
        let node = &self.nodes[id];
        if node.is_tip() {
            let name = node.name.as_deref()?;
            if !keep.contains(name) {
                return None;
            }
            out.push(Node {
                parent,
                children: Vec::new(),
                branch_length: node.branch_length,
                name: node.name.clone(),
            });
            return Some(out.len() - 1);
        }

        let new_id = out.len();
        out.push(Node {
            parent,
            children: Vec::new(),
            branch_length: node.branch_length,
            name: node.name.clone(),
        });
        let kept: Vec<NodeId> = node
            .children
            .iter()
            .filter_map(|&child| self.copy_pruned(child, Some(new_id), keep, out))
            .collect();

        match kept.len() {
            0 => None,
            1 => {
                // Collapse unary node into its child.
                let child = kept[0];
                let extra = out[new_id].branch_length;
                out[child].parent = parent;
                out[child].branch_length = match (out[child].branch_length, extra) {
                    (Some(a), Some(b)) => Some(a + b),
                    (a, b) => a.or(b),
                };
                Some(child)
            }
            _ => {
                out[new_id].children = kept;
                Some(new_id)
            }
        }
    }

    /// Drop arena slots that are no longer reachable.
    fn compacted(self) -> Self {
        let order = self.preorder();
        let mut remap = vec![usize::MAX; self.nodes.len()];
        for (new, &old) in order.iter().enumerate() {
            remap[old] = new;
        }
        let nodes = order
            .iter()
            .map(|&old| {
                let n = &self.nodes[old];
                Node {
                    parent: n.parent.map(|p| remap[p]),
                    children: n.children.iter().map(|&c| remap[c]).collect(),
                    branch_length: n.branch_length,
                    name: n.name.clone(),
                }
            })
            .collect();
        Self { nodes, root: 0 }
    }
}

struct NewickParser<'a> {
    input: &'a [u8],
    pos: usize,
    nodes: Vec<Node>,
}

impl<'a> NewickParser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            nodes: Vec::new(),
        }
    }

    fn parse_tree(&mut self) -> Result<NodeId> {
        self.skip_whitespace();
        let root = self.parse_subtree(None)?;
        self.skip_whitespace();
        if self.peek() != Some(b';') {
            return Err(AmpliconError::TreeParse(
                "expected ';' at end of Newick string".to_string(),
            ));
        }
        self.pos += 1;
        Ok(root)
    }

    fn parse_subtree(&mut self, parent: Option<NodeId>) -> Result<NodeId> {
        self.skip_whitespace();
        let id = self.nodes.len();
        self.nodes.push(Node::empty(parent));

        if self.peek() == Some(b'(') {
            self.pos += 1;
            loop {
                let child = self.parse_subtree(Some(id))?;
                self.nodes[id].children.push(child);
                self.skip_whitespace();
                match self.peek() {
                    Some(b',') => self.pos += 1,
                    Some(b')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => {
                        return Err(AmpliconError::TreeParse(format!(
                            "expected ',' or ')' at byte {}",
                            self.pos
                        )))
                    }
                }
            }
        }

        self.parse_label(id)?;
        Ok(id)
    }

    fn parse_label(&mut self, id: NodeId) -> Result<()> {
        self.skip_whitespace();
        let name = if self.peek() == Some(b'\'') {
            self.parse_quoted()?
        } else {
            self.take_while(|b| !matches!(b, b':' | b',' | b')' | b'(' | b';') && !b.is_ascii_whitespace())
        };
        if !name.is_empty() {
            self.nodes[id].name = Some(name);
        }
        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_whitespace();
            let len_str = self.take_while(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'));
            let len: f64 = len_str.parse().map_err(|_| {
                AmpliconError::TreeParse(format!("invalid branch length '{}'", len_str))
            })?;
            self.nodes[id].branch_length = Some(len);
        }
        Ok(())
    }

    fn parse_quoted(&mut self) -> Result<String> {
        self.pos += 1;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'\'' {
                let name = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
                self.pos += 1;
                return Ok(name);
            }
            self.pos += 1;
        }
        Err(AmpliconError::TreeParse("unterminated quoted label".to_string()))
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if !pred(b) {
                break;
            }
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }
}
