//! Arena-backed Prefix Index
//!
//! Keys are byte strings; every byte of a key is one edge in the tree. All
//! nodes live in a single `Vec` and refer to each other by index, so the
//! index never hands out pointers and a `NodeId` stays valid for the whole
//! life of the tree.
//!
//! ```text
//!            [root]
//!           /      \
//!         'u'      'c'
//!          |        |
//!         's'      'n'  ── "cn" = 7
//!          |
//!         ...
//!          |
//!         ':'
//!        /    \
//!      '1'    '2'
//!   "user:1"  "user:2"
//! ```
//!
//! ## Removal never prunes
//!
//! Removing a key only empties the slot of its terminal node. The node and
//! its ancestors stay in the arena, which keeps every `NodeId` handed out
//! earlier pointing at the same key.
//!
//! ## Child lookup
//!
//! Children are kept unsorted and scanned linearly. Fan-out per level is
//! small for cache keyspaces, and each node remembers the last child that
//! matched so repeated walks over the same edge skip the scan.

use bytes::Bytes;
use std::cell::Cell;

/// Index of a node inside the arena.
pub type NodeId = usize;

/// The root node. It has no edge byte and corresponds to the empty key.
pub const ROOT: NodeId = 0;

#[derive(Debug)]
struct Node<T> {
    /// Edge label from the parent
    byte: u8,
    /// Associated value, `None` when no live key ends here
    value: Option<T>,
    /// Child node ids, unsorted
    children: Vec<NodeId>,
    /// Position in `children` of the last matched edge
    last_match: Cell<usize>,
}

impl<T> Node<T> {
    fn new(byte: u8) -> Self {
        Self {
            byte,
            value: None,
            children: Vec::new(),
            last_match: Cell::new(0),
        }
    }
}

/// A byte-wise prefix tree mapping keys to values of type `T`.
///
/// # Example
///
/// ```
/// use triekv::storage::Trie;
///
/// let mut trie = Trie::new();
/// trie.insert(b"user:1", "alice");
/// trie.insert(b"user:2", "bob");
///
/// assert_eq!(trie.find(b"user:1"), Some(&"alice"));
/// assert_eq!(trie.search(b"user:").len(), 2);
/// ```
#[derive(Debug)]
pub struct Trie<T> {
    nodes: Vec<Node<T>>,
    /// Number of nodes whose slot is occupied
    live: usize,
}

impl<T> Default for Trie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Trie<T> {
    /// Creates an empty tree holding only the root node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(0)],
            live: 0,
        }
    }

    /// Number of keys with a live value.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of allocated nodes, including the root and emptied nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Finds the child of `parent` labelled `byte`.
    fn child(&self, parent: NodeId, byte: u8) -> Option<NodeId> {
        let node = &self.nodes[parent];

        // Fast path: the edge we matched last time
        if let Some(&id) = node.children.get(node.last_match.get()) {
            if self.nodes[id].byte == byte {
                return Some(id);
            }
        }

        let pos = node
            .children
            .iter()
            .position(|&id| self.nodes[id].byte == byte)?;
        node.last_match.set(pos);
        Some(node.children[pos])
    }

    /// Walks the path for `key`, returning its terminal node if every edge exists.
    pub fn find_node(&self, key: &[u8]) -> Option<NodeId> {
        let mut current = ROOT;
        for &byte in key {
            current = self.child(current, byte)?;
        }
        Some(current)
    }

    /// Walks the path for `key`, creating missing nodes.
    fn find_or_create(&mut self, key: &[u8]) -> NodeId {
        let mut current = ROOT;
        for &byte in key {
            current = match self.child(current, byte) {
                Some(id) => id,
                None => {
                    let id = self.nodes.len();
                    self.nodes.push(Node::new(byte));
                    let parent = &mut self.nodes[current];
                    parent.children.push(id);
                    parent.last_match.set(parent.children.len() - 1);
                    id
                }
            };
        }
        current
    }

    /// Stores `value` under `key`, returning the value it replaced.
    ///
    /// The caller owns the returned value and is responsible for disposing of it.
    pub fn insert(&mut self, key: &[u8], value: T) -> Option<T> {
        let id = self.find_or_create(key);
        self.replace(id, value)
    }

    /// Returns the value stored under `key`.
    pub fn find(&self, key: &[u8]) -> Option<&T> {
        self.find_node(key).and_then(|id| self.get(id))
    }

    /// Empties the slot of `key`. The tree shape is left untouched.
    pub fn remove(&mut self, key: &[u8]) -> Option<T> {
        let id = self.find_node(key)?;
        self.take(id)
    }

    /// Value held by node `id`.
    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.nodes.get(id).and_then(|node| node.value.as_ref())
    }

    /// Mutable value held by node `id`.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.nodes.get_mut(id).and_then(|node| node.value.as_mut())
    }

    /// Empties the slot of node `id`, returning its value.
    pub fn take(&mut self, id: NodeId) -> Option<T> {
        let old = self.nodes.get_mut(id)?.value.take();
        if old.is_some() {
            self.live -= 1;
        }
        old
    }

    /// Fills the slot of node `id`, returning the previous value.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not produced by this tree.
    pub fn replace(&mut self, id: NodeId, value: T) -> Option<T> {
        let old = self.nodes[id].value.replace(value);
        if old.is_none() {
            self.live += 1;
        }
        old
    }

    /// Collects `(key, node)` for every occupied node at or below `prefix`.
    ///
    /// Keys are rebuilt by appending edge bytes to `prefix` on the way down.
    /// The walk is depth-first, children visited in insertion order.
    pub fn search_nodes(&self, prefix: &[u8]) -> Vec<(Bytes, NodeId)> {
        let mut found = Vec::new();
        let Some(start) = self.find_node(prefix) else {
            return found;
        };

        if self.nodes[start].value.is_some() {
            found.push((Bytes::copy_from_slice(prefix), start));
        }

        let mut key = prefix.to_vec();
        // (node, length of its parent's key)
        let mut stack: Vec<(NodeId, usize)> = self.nodes[start]
            .children
            .iter()
            .rev()
            .map(|&id| (id, prefix.len()))
            .collect();

        while let Some((id, parent_len)) = stack.pop() {
            let node = &self.nodes[id];
            key.truncate(parent_len);
            key.push(node.byte);

            if node.value.is_some() {
                found.push((Bytes::copy_from_slice(&key), id));
            }

            let len = key.len();
            stack.extend(node.children.iter().rev().map(|&child| (child, len)));
        }

        found
    }

    /// Collects `(key, value)` for every live key starting with `prefix`.
    pub fn search(&self, prefix: &[u8]) -> Vec<(Bytes, &T)> {
        self.search_nodes(prefix)
            .into_iter()
            .filter_map(|(key, id)| self.get(id).map(|value| (key, value)))
            .collect()
    }

    /// Pre-order walk of the subtree rooted at `start`, calling `visit` on
    /// every node's slot. The visitor may empty or fill the slot.
    pub fn recurse<F>(&mut self, start: NodeId, mut visit: F)
    where
        F: FnMut(NodeId, &mut Option<T>),
    {
        if start >= self.nodes.len() {
            return;
        }

        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let node = &mut self.nodes[id];
            let was_live = node.value.is_some();
            visit(id, &mut node.value);

            match (was_live, node.value.is_some()) {
                (true, false) => self.live -= 1,
                (false, true) => self.live += 1,
                _ => {}
            }

            stack.extend(node.children.iter().rev());
        }
    }

    /// Drops every node except a fresh root.
    ///
    /// Values still in slots are dropped without inspection; callers that
    /// need to account for them must drain the tree with [`Trie::recurse`] first.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(Node::new(0));
        self.live = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn keys<T>(found: &[(Bytes, T)]) -> HashSet<Bytes> {
        found.iter().map(|(k, _)| k.clone()).collect()
    }

    #[test]
    fn test_insert_and_find() {
        let mut trie = Trie::new();
        assert_eq!(trie.insert(b"hello", 1), None);
        assert_eq!(trie.insert(b"help", 2), None);

        assert_eq!(trie.find(b"hello"), Some(&1));
        assert_eq!(trie.find(b"help"), Some(&2));
        assert_eq!(trie.find(b"hel"), None);
        assert_eq!(trie.find(b"helpme"), None);
        assert_eq!(trie.len(), 2);
    }

    #[test]
    fn test_insert_returns_previous() {
        let mut trie = Trie::new();
        trie.insert(b"k", "old");
        assert_eq!(trie.insert(b"k", "new"), Some("old"));
        assert_eq!(trie.find(b"k"), Some(&"new"));
        assert_eq!(trie.len(), 1);
    }

    #[test]
    fn test_remove_keeps_structure() {
        let mut trie = Trie::new();
        trie.insert(b"abc", 1);
        let nodes = trie.node_count();
        let id = trie.find_node(b"abc").unwrap();

        assert_eq!(trie.remove(b"abc"), Some(1));
        assert_eq!(trie.find(b"abc"), None);
        assert_eq!(trie.node_count(), nodes);
        assert_eq!(trie.find_node(b"abc"), Some(id));
        assert!(trie.is_empty());

        // Reinsert reuses the same node
        trie.insert(b"abc", 2);
        assert_eq!(trie.find_node(b"abc"), Some(id));
        assert_eq!(trie.node_count(), nodes);
    }

    #[test]
    fn test_remove_missing() {
        let mut trie: Trie<i32> = Trie::new();
        assert_eq!(trie.remove(b"nope"), None);
        trie.insert(b"ab", 1);
        assert_eq!(trie.remove(b"a"), None);
        assert_eq!(trie.len(), 1);
    }

    #[test]
    fn test_search_prefix_completeness() {
        let mut trie = Trie::new();
        for key in ["user:1", "user:2", "user:10", "users", "admin:1"] {
            trie.insert(key.as_bytes(), key.len());
        }

        let found = trie.search(b"user:");
        let expected: HashSet<Bytes> = ["user:1", "user:2", "user:10"]
            .into_iter()
            .map(Bytes::from)
            .collect();
        assert_eq!(found.len(), 3);
        assert_eq!(keys(&found), expected);

        for (key, value) in &found {
            assert_eq!(**value, key.len());
        }
    }

    #[test]
    fn test_search_includes_exact_match() {
        let mut trie = Trie::new();
        trie.insert(b"user", 0);
        trie.insert(b"user:1", 1);

        let found = trie.search(b"user");
        assert_eq!(keys(&found).len(), 2);
        assert!(keys(&found).contains(&Bytes::from("user")));
    }

    #[test]
    fn test_search_skips_tombstones() {
        let mut trie = Trie::new();
        trie.insert(b"a1", 1);
        trie.insert(b"a2", 2);
        trie.remove(b"a1");

        let found = trie.search(b"a");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, Bytes::from("a2"));
    }

    #[test]
    fn test_search_unknown_prefix() {
        let mut trie = Trie::new();
        trie.insert(b"abc", 1);
        assert!(trie.search(b"x").is_empty());
        assert!(trie.search(b"abcd").is_empty());
    }

    #[test]
    fn test_empty_prefix_lists_everything() {
        let mut trie = Trie::new();
        trie.insert(b"x", 1);
        trie.insert(b"y", 2);
        trie.insert(b"yz", 3);
        assert_eq!(trie.search(b"").len(), 3);
    }

    #[test]
    fn test_search_nodes_allows_in_place_removal() {
        let mut trie = Trie::new();
        trie.insert(b"p:1", 1);
        trie.insert(b"p:2", 2);
        trie.insert(b"q:1", 3);

        for (_, id) in trie.search_nodes(b"p:") {
            trie.take(id);
        }

        assert_eq!(trie.len(), 1);
        assert_eq!(trie.find(b"q:1"), Some(&3));
    }

    #[test]
    fn test_recurse_visits_every_node_and_tracks_len() {
        let mut trie = Trie::new();
        trie.insert(b"a", 1);
        trie.insert(b"ab", 2);
        trie.insert(b"b", 3);

        let mut visited = 0;
        trie.recurse(ROOT, |_, slot| {
            visited += 1;
            if matches!(slot, Some(v) if *v % 2 == 1) {
                slot.take();
            }
        });

        // root + a + ab + b
        assert_eq!(visited, 4);
        assert_eq!(trie.len(), 1);
        assert_eq!(trie.find(b"ab"), Some(&2));
    }

    #[test]
    fn test_recurse_preorder() {
        let mut trie = Trie::new();
        trie.insert(b"ab", 'b');
        trie.insert(b"a", 'a');
        trie.insert(b"ac", 'c');

        let mut order = Vec::new();
        trie.recurse(ROOT, |_, slot| {
            if let Some(v) = slot {
                order.push(*v);
            }
        });
        assert_eq!(order, vec!['a', 'b', 'c']);
    }

    #[test]
    fn test_last_match_cache_consistency() {
        let mut trie = Trie::new();
        trie.insert(b"ax", 1);
        trie.insert(b"ay", 2);
        trie.insert(b"az", 3);

        // Alternate between siblings so the cached edge keeps changing
        for _ in 0..3 {
            assert_eq!(trie.find(b"ax"), Some(&1));
            assert_eq!(trie.find(b"az"), Some(&3));
            assert_eq!(trie.find(b"ay"), Some(&2));
        }
    }

    #[test]
    fn test_clear() {
        let mut trie = Trie::new();
        trie.insert(b"abc", 1);
        trie.clear();
        assert!(trie.is_empty());
        assert_eq!(trie.node_count(), 1);
        assert_eq!(trie.find(b"abc"), None);
    }

    #[test]
    fn test_binary_keys() {
        let mut trie = Trie::new();
        trie.insert(&[0u8, 255, 10], "bin");
        assert_eq!(trie.find(&[0u8, 255, 10]), Some(&"bin"));
        assert_eq!(trie.search(&[0u8]).len(), 1);
    }
}
