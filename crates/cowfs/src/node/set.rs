//! Ordered, persistent node container.

use std::slice;
use std::sync::Arc;

use cowfs_types::Stamp;

use super::{Key, Mutator, Node};
use crate::error::{FsError, FsResult, corrupted};
use crate::path::is_valid_name;

/// Elements a single container holds before it splits.
pub const MAX_FANOUT: usize = 32;

/// Immutable ordered sequence of nodes.
///
/// Each element covers a key range (a single key for leaves, a span for
/// nested sets); ranges are non-overlapping and strictly increasing. A set
/// holds either only leaves or only nested sets, and every nested set is
/// non-empty, so all leaves sit at the same depth.
#[derive(Clone, Debug)]
pub struct NodeSet {
    stamp: Stamp,
    nodes: Vec<Node>,
}

/// Result of applying a mutation below one container.
enum Outcome {
    Unchanged,
    Rebuilt(Vec<Node>),
}

impl Default for NodeSet {
    fn default() -> Self {
        Self::from_nodes(Vec::new())
    }
}

impl NodeSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    fn from_nodes(nodes: Vec<Node>) -> Self {
        Self {
            stamp: Stamp::next(),
            nodes,
        }
    }

    /// Version stamp.
    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    /// Top-level elements (leaves or nested sets).
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of leaves, counting through nested sets.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Smallest key in the set.
    pub fn min_key(&self) -> Option<Key> {
        self.nodes.first().map(Node::min_key)
    }

    /// Largest key in the set.
    pub fn max_key(&self) -> Option<Key> {
        self.nodes.last().map(Node::max_key)
    }

    /// Point lookup of a leaf.
    pub fn get(&self, key: &Key) -> Option<&Node> {
        let i = self.nodes.partition_point(|n| n.max_key() < *key);
        match self.nodes.get(i)? {
            Node::Set(child) => child.get(key),
            leaf if leaf.min_key() == *key => Some(leaf),
            _ => None,
        }
    }

    /// Multi-level lookup: the first key selects a leaf here, the rest
    /// continue inside it (shard, directory).
    pub fn lookup(&self, path: &[Key]) -> Option<Node> {
        let (first, rest) = path.split_first()?;
        self.get(first)?.lookup(rest)
    }

    /// Leaves in key order.
    pub fn iter(&self) -> Leaves<'_> {
        Leaves {
            stack: vec![self.nodes.iter()],
        }
    }

    /// Leaves whose key is strictly greater than `key`, in order.
    pub fn iter_after(&self, key: &Key) -> Leaves<'_> {
        let mut stack = Vec::new();
        let mut set = self;
        loop {
            let i = set.nodes.partition_point(|n| n.max_key() <= *key);
            match set.nodes.get(i) {
                Some(Node::Set(child)) => {
                    stack.push(set.nodes[i + 1..].iter());
                    set = child.as_ref();
                }
                _ => {
                    stack.push(set.nodes[i..].iter());
                    break;
                }
            }
        }
        Leaves { stack }
    }

    /// Apply `f` to the slot addressed by `path`.
    ///
    /// The first key selects a slot in this set; remaining keys continue
    /// inside that slot's node. Returns `this` itself when nothing changed.
    pub fn mutate(this: &Arc<Self>, path: &[Key], f: &mut Mutator<'_>) -> FsResult<Arc<Self>> {
        let Some(key) = path.first() else {
            return Err(FsError::not_found(""));
        };
        if let Key::Name(name) = key {
            if !is_valid_name(name) {
                return Err(FsError::InvalidName(name.to_string()));
            }
        }

        match this.apply(path, f)? {
            Outcome::Unchanged => Ok(Arc::clone(this)),
            Outcome::Rebuilt(nodes) if nodes.len() > MAX_FANOUT => {
                Ok(Arc::new(Self::from_nodes(Vec::from(split(nodes)))))
            }
            Outcome::Rebuilt(mut nodes) if nodes.len() == 1 && !nodes[0].is_singleton() => {
                match nodes.pop() {
                    Some(Node::Set(only)) => Ok(only),
                    _ => corrupted("lost nested set while collapsing"),
                }
            }
            Outcome::Rebuilt(nodes) => Ok(Arc::new(Self::from_nodes(nodes))),
        }
    }

    fn apply(&self, path: &[Key], f: &mut Mutator<'_>) -> FsResult<Outcome> {
        let key = &path[0];
        let i = self.nodes.partition_point(|n| n.max_key() < *key);

        if let Some(Node::Set(_)) = self.nodes.first() {
            // An absent key joins the child it would border.
            let i = i.min(self.nodes.len() - 1);
            let Node::Set(child) = &self.nodes[i] else {
                corrupted(format_args!("leaf among nested sets at {key}"));
            };
            let Outcome::Rebuilt(sub) = child.apply(path, f)? else {
                return Ok(Outcome::Unchanged);
            };
            let mut nodes = self.nodes.clone();
            if sub.is_empty() {
                nodes.remove(i);
            } else if sub.len() > MAX_FANOUT {
                nodes.splice(i..=i, split(sub));
                check_order(&nodes, i, i + 2)?;
            } else {
                nodes[i] = Node::Set(Arc::new(Self::from_nodes(sub)));
                check_order(&nodes, i, i + 1)?;
            }
            return Ok(Outcome::Rebuilt(nodes));
        }

        let Some(existing) = self.nodes.get(i).filter(|n| n.min_key() <= *key) else {
            if path.len() > 1 {
                return Err(FsError::not_found(key.to_string()));
            }
            return match f(None)? {
                None => Ok(Outcome::Unchanged),
                Some(node) => {
                    check_slot(key, &node)?;
                    let mut nodes = Vec::with_capacity(self.nodes.len() + 1);
                    nodes.extend_from_slice(&self.nodes[..i]);
                    nodes.push(node);
                    nodes.extend_from_slice(&self.nodes[i..]);
                    Ok(Outcome::Rebuilt(nodes))
                }
            };
        };

        match existing.mutate(&path[1..], f)? {
            None => {
                let mut nodes = self.nodes.clone();
                nodes.remove(i);
                Ok(Outcome::Rebuilt(nodes))
            }
            Some(node) if node.same(existing) => Ok(Outcome::Unchanged),
            Some(node) => {
                check_slot(key, &node)?;
                let mut nodes = self.nodes.clone();
                nodes[i] = node;
                Ok(Outcome::Rebuilt(nodes))
            }
        }
    }

    pub(crate) fn dump(&self, out: &mut String, level: usize) {
        for node in self.iter() {
            node.dump(out, level);
        }
    }
}

/// A leaf replacing or filling a slot must carry exactly that slot's key.
fn check_slot(key: &Key, node: &Node) -> FsResult<()> {
    if node.is_singleton() && node.min_key() == *key {
        return Ok(());
    }
    let got = match node {
        Node::Set(_) => "nested set".to_string(),
        leaf => leaf.min_key().to_string(),
    };
    Err(FsError::NameMismatch {
        expected: key.to_string(),
        got,
    })
}

/// Rebuilt nested sets must still sit strictly between their neighbours.
fn check_order(nodes: &[Node], from: usize, to: usize) -> FsResult<()> {
    let last = nodes.len().saturating_sub(1);
    for j in from.max(1)..=to.min(last) {
        if nodes[j - 1].max_key() >= nodes[j].min_key() {
            return Err(FsError::InvalidName(nodes[j].min_key().to_string()));
        }
    }
    Ok(())
}

fn split(mut left: Vec<Node>) -> [Node; 2] {
    let right = left.split_off(left.len() / 2);
    [
        Node::Set(Arc::new(NodeSet::from_nodes(left))),
        Node::Set(Arc::new(NodeSet::from_nodes(right))),
    ]
}

/// In-order iterator over the leaves of a [`NodeSet`].
pub struct Leaves<'a> {
    stack: Vec<slice::Iter<'a, Node>>,
}

impl<'a> Iterator for Leaves<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<&'a Node> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                None => {
                    self.stack.pop();
                }
                Some(Node::Set(child)) => self.stack.push(child.nodes.iter()),
                Some(leaf) => return Some(leaf),
            }
        }
    }
}
