//! Sparse Merkle tree of depth 256, stored path-compressed.
//!
//! Logically every 32-byte path owns one leaf and every empty subtree hashes to `EMPTY_HASH`.
//! Physically only the nodes with two non-empty children are stored, joined by edges that skip
//! the single-child runs in between. Nodes are immutable and shared through `Arc`, so cloning a
//! tree is cheap and an older clone keeps its root after the original is modified.

use std::sync::Arc;

use ethereum_types::H256;

use crate::{
    hash::{keccak256_concat, EMPTY_HASH},
    proof::Proof,
};

/// Number of bits in a path, which is also the depth of the leaves
pub const DEPTH: usize = 256;

/// Values stored in the leaves of a `PatriciaTree`
pub trait Leaf: Clone {
    /// Hash of this leaf as committed in the tree
    fn leaf_hash(&self) -> H256;
}

/// Bit of `path` that selects the child of the node at `depth`. Bit 0 is the most significant
/// bit of the first byte.
pub fn path_bit(path: &H256, depth: usize) -> u8 {
    (path.as_bytes()[depth / 8] >> (7 - depth % 8)) & 1
}

/// Index of the first bit in which two paths differ, or `DEPTH` if they are equal
fn first_difference(a: &H256, b: &H256) -> usize {
    for (i, (x, y)) in a.as_bytes().iter().zip(b.as_bytes()).enumerate() {
        let diff = x ^ y;
        if diff != 0 {
            return i * 8 + diff.leading_zeros() as usize;
        }
    }

    DEPTH
}

/// Hash of the node at depth `top` whose only non-empty descendant on `path` is the node at
/// depth `bottom` with hash `hash`
fn climb(path: &H256, mut hash: H256, bottom: usize, top: usize) -> H256 {
    for depth in (top..bottom).rev() {
        hash = if path_bit(path, depth) == 0 {
            keccak256_concat(&hash, &EMPTY_HASH)
        } else {
            keccak256_concat(&EMPTY_HASH, &hash)
        };
    }

    hash
}

#[derive(Clone, Debug)]
enum Node<V> {
    Leaf(V),
    // Children of a branch at depth `d` start at depth `d + 1` and are selected by bit `d`
    Branch([Arc<Edge<V>>; 2]),
}

#[derive(Debug)]
struct Edge<V> {
    from: usize,
    to: usize,
    // Any path below this edge. For leaf edges, the path of the leaf.
    path: H256,
    node: Node<V>,
    // Hash of the node at depth `to`
    node_hash: H256,
    // Hash of the subtree at depth `from`
    hash: H256,
}

impl<V: Leaf> Edge<V> {
    fn new(from: usize, to: usize, path: H256, node: Node<V>) -> Self {
        let node_hash = match &node {
            Node::Leaf(value) => value.leaf_hash(),
            Node::Branch([left, right]) => keccak256_concat(&left.hash, &right.hash),
        };
        let hash = climb(&path, node_hash, to, from);

        Edge {
            from,
            to,
            path,
            node,
            node_hash,
            hash,
        }
    }

    fn leaf(from: usize, path: H256, value: V) -> Self {
        Edge::new(from, DEPTH, path, Node::Leaf(value))
    }

    /// The same subtree, hanging from a different depth
    fn reattach(&self, from: usize) -> Self {
        Edge {
            from,
            to: self.to,
            path: self.path,
            node: self.node.clone(),
            node_hash: self.node_hash,
            hash: climb(&self.path, self.node_hash, self.to, from),
        }
    }
}

fn insert_into<V: Leaf>(edge: &Arc<Edge<V>>, path: H256, value: V) -> (Arc<Edge<V>>, Option<V>) {
    let split = first_difference(&path, &edge.path);
    if split < edge.to {
        // The new leaf leaves this edge at depth `split`: a new branch goes there
        let existing = Arc::new(edge.reattach(split + 1));
        let inserted = Arc::new(Edge::leaf(split + 1, path, value));
        let children = if path_bit(&path, split) == 0 {
            [inserted, existing]
        } else {
            [existing, inserted]
        };
        let branch = Edge::new(edge.from, split, path, Node::Branch(children));

        return (Arc::new(branch), None);
    }

    match &edge.node {
        Node::Leaf(old) => (
            Arc::new(Edge::leaf(edge.from, path, value)),
            Some(old.clone()),
        ),
        Node::Branch(children) => {
            let i = usize::from(path_bit(&path, edge.to));
            let (child, old) = insert_into(&children[i], path, value);
            let mut children = children.clone();
            children[i] = child;
            let branch = Edge::new(edge.from, edge.to, edge.path, Node::Branch(children));

            (Arc::new(branch), old)
        }
    }
}

/// Persistent sparse Merkle tree mapping 32-byte paths to leaves
#[derive(Clone, Debug)]
pub struct PatriciaTree<V> {
    root: Option<Arc<Edge<V>>>,
    len: usize,
}

impl<V> Default for PatriciaTree<V> {
    fn default() -> Self {
        PatriciaTree { root: None, len: 0 }
    }
}

impl<V: Leaf> PatriciaTree<V> {
    /// Empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of leaves
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the tree has no leaves
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Root hash. The empty tree has root `EMPTY_HASH`.
    pub fn root_hash(&self) -> H256 {
        self.root
            .as_ref()
            .map(|edge| edge.hash)
            .unwrap_or(EMPTY_HASH)
    }

    /// Set the leaf at `path`, returning the value it replaced
    pub fn insert(&mut self, path: H256, value: V) -> Option<V> {
        let (root, old) = match &self.root {
            None => (Arc::new(Edge::leaf(0, path, value)), None),
            Some(root) => insert_into(root, path, value),
        };
        self.root = Some(root);
        if old.is_none() {
            self.len += 1;
        }

        old
    }

    /// Leaf stored at `path`
    pub fn get(&self, path: &H256) -> Option<&V> {
        let mut edge = self.root.as_ref()?;
        loop {
            if first_difference(path, &edge.path) < edge.to {
                return None;
            }
            match &edge.node {
                Node::Leaf(value) => return Some(value),
                Node::Branch(children) => {
                    edge = &children[usize::from(path_bit(path, edge.to))];
                }
            }
        }
    }

    /// Proof for `path`, valid whether the path holds a leaf or not
    pub fn proof(&self, path: &H256) -> Proof {
        let mut siblings = vec![];
        let mut next = self.root.as_ref();
        while let Some(edge) = next {
            next = None;
            let split = first_difference(path, &edge.path);
            if split < edge.to {
                // Below `split` the path is empty, this whole edge is the only sibling left
                let sibling = climb(&edge.path, edge.node_hash, edge.to, split + 1);
                siblings.push((DEPTH - 1 - split, sibling));
            } else if let Node::Branch(children) = &edge.node {
                let i = usize::from(path_bit(path, edge.to));
                siblings.push((DEPTH - 1 - edge.to, children[1 - i].hash));
                next = Some(&children[i]);
            }
        }

        Proof::from_siblings(
            siblings
                .into_iter()
                .filter(|(_, hash)| *hash != EMPTY_HASH),
        )
    }

    /// Leaves in path order
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            stack: self.root.iter().map(|edge| edge.as_ref()).collect(),
        }
    }
}

/// Iterator over the `(path, leaf)` pairs of a `PatriciaTree`
pub struct Iter<'a, V> {
    stack: Vec<&'a Edge<V>>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a H256, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let edge = self.stack.pop()?;
            match &edge.node {
                Node::Leaf(value) => return Some((&edge.path, value)),
                Node::Branch([left, right]) => {
                    self.stack.push(right);
                    self.stack.push(left);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_are_msb_first() {
        let mut path = H256::zero();
        path.0[0] = 0b1000_0000;
        path.0[31] = 0b0000_0001;
        assert_eq!(path_bit(&path, 0), 1);
        assert_eq!(path_bit(&path, 1), 0);
        assert_eq!(path_bit(&path, 254), 0);
        assert_eq!(path_bit(&path, 255), 1);
    }

    #[test]
    fn first_difference_finds_bit() {
        let a = H256::zero();
        let mut b = H256::zero();
        assert_eq!(first_difference(&a, &b), DEPTH);
        b.0[2] = 0b0010_0000;
        assert_eq!(first_difference(&a, &b), 18);
    }
}
