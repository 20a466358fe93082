//! Arena-backed red-black tree.
//!
//! Nodes live in a `Vec` and refer to each other by index. Index 0 is the
//! shared black sentinel leaf; freed slots are recycled through a free
//! list. Keys are unique: inserting an existing key is a no-op, and so is
//! removing a missing one.

use std::cmp::Ordering;

const NIL: usize = 0;

#[derive(Debug, Clone)]
struct Node<K> {
    /// `None` for the sentinel and for freed slots.
    key: Option<K>,
    red: bool,
    parent: usize,
    left: usize,
    right: usize,
}

impl<K> Node<K> {
    fn sentinel() -> Self {
        Self {
            key: None,
            red: false,
            parent: NIL,
            left: NIL,
            right: NIL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RbTree<K> {
    nodes: Vec<Node<K>>,
    free: Vec<usize>,
    root: usize,
    len: usize,
}

impl<K: Ord> Default for RbTree<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord> RbTree<K> {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::sentinel()],
            free: Vec::new(),
            root: NIL,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Smallest key, if any.
    pub fn first(&self) -> Option<&K> {
        if self.root == NIL {
            return None;
        }
        self.nodes[self.minimum(self.root)].key.as_ref()
    }

    /// Keys in ascending order.
    pub fn iter(&self) -> Iter<'_, K> {
        let mut iter = Iter {
            tree: self,
            stack: Vec::new(),
        };
        iter.push_left_spine(self.root);
        iter
    }

    // -----------------------------------------------------------------------
    // Insert
    // -----------------------------------------------------------------------

    /// Inserts `key`. Returns `false` if it was already present.
    pub fn insert(&mut self, key: K) -> bool {
        let mut parent = NIL;
        let mut cursor = self.root;
        let mut went_left = false;
        while let Some(existing) = self.nodes[cursor].key.as_ref() {
            parent = cursor;
            match key.cmp(existing) {
                Ordering::Less => {
                    went_left = true;
                    cursor = self.nodes[cursor].left;
                }
                Ordering::Greater => {
                    went_left = false;
                    cursor = self.nodes[cursor].right;
                }
                Ordering::Equal => return false,
            }
        }

        let z = self.alloc(key, parent);
        if parent == NIL {
            self.root = z;
        } else if went_left {
            self.nodes[parent].left = z;
        } else {
            self.nodes[parent].right = z;
        }
        self.len += 1;
        self.insert_fixup(z);
        true
    }

    fn alloc(&mut self, key: K, parent: usize) -> usize {
        let node = Node {
            key: Some(key),
            red: true,
            parent,
            left: NIL,
            right: NIL,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn insert_fixup(&mut self, mut z: usize) {
        while self.is_red(self.parent(z)) {
            let p = self.parent(z);
            let g = self.parent(p);
            if p == self.nodes[g].left {
                let uncle = self.nodes[g].right;
                if self.is_red(uncle) {
                    self.set_red(p, false);
                    self.set_red(uncle, false);
                    self.set_red(g, true);
                    z = g;
                } else {
                    if z == self.nodes[p].right {
                        z = p;
                        self.rotate_left(z);
                    }
                    let p = self.parent(z);
                    let g = self.parent(p);
                    self.set_red(p, false);
                    self.set_red(g, true);
                    self.rotate_right(g);
                }
            } else {
                let uncle = self.nodes[g].left;
                if self.is_red(uncle) {
                    self.set_red(p, false);
                    self.set_red(uncle, false);
                    self.set_red(g, true);
                    z = g;
                } else {
                    if z == self.nodes[p].left {
                        z = p;
                        self.rotate_right(z);
                    }
                    let p = self.parent(z);
                    let g = self.parent(p);
                    self.set_red(p, false);
                    self.set_red(g, true);
                    self.rotate_left(g);
                }
            }
        }
        let root = self.root;
        self.set_red(root, false);
    }

    // -----------------------------------------------------------------------
    // Remove
    // -----------------------------------------------------------------------

    /// Removes `key`. Returns `false` if it was not present.
    ///
    /// A node with two children is replaced by its in-order predecessor.
    pub fn remove(&mut self, key: &K) -> bool {
        let Some(z) = self.find(key) else {
            return false;
        };

        let mut removed_red = self.nodes[z].red;
        let x;
        if self.nodes[z].left == NIL {
            x = self.nodes[z].right;
            self.transplant(z, x);
        } else if self.nodes[z].right == NIL {
            x = self.nodes[z].left;
            self.transplant(z, x);
        } else {
            let y = self.maximum(self.nodes[z].left);
            removed_red = self.nodes[y].red;
            x = self.nodes[y].left;
            if self.nodes[y].parent == z {
                self.nodes[x].parent = y;
            } else {
                self.transplant(y, x);
                let zl = self.nodes[z].left;
                self.nodes[y].left = zl;
                self.nodes[zl].parent = y;
            }
            self.transplant(z, y);
            let zr = self.nodes[z].right;
            self.nodes[y].right = zr;
            self.nodes[zr].parent = y;
            self.nodes[y].red = self.nodes[z].red;
        }

        if !removed_red {
            self.remove_fixup(x);
        }

        self.nodes[z] = Node::sentinel();
        self.free.push(z);
        self.nodes[NIL] = Node::sentinel();
        self.len -= 1;
        true
    }

    fn remove_fixup(&mut self, mut x: usize) {
        while x != self.root && !self.is_red(x) {
            let p = self.parent(x);
            if x == self.nodes[p].left {
                let mut w = self.nodes[p].right;
                if self.is_red(w) {
                    self.set_red(w, false);
                    self.set_red(p, true);
                    self.rotate_left(p);
                    w = self.nodes[self.parent(x)].right;
                }
                if !self.is_red(self.nodes[w].left) && !self.is_red(self.nodes[w].right) {
                    self.set_red(w, true);
                    x = self.parent(x);
                } else {
                    if !self.is_red(self.nodes[w].right) {
                        let wl = self.nodes[w].left;
                        self.set_red(wl, false);
                        self.set_red(w, true);
                        self.rotate_right(w);
                        w = self.nodes[self.parent(x)].right;
                    }
                    let p = self.parent(x);
                    let p_red = self.is_red(p);
                    self.set_red(w, p_red);
                    self.set_red(p, false);
                    let wr = self.nodes[w].right;
                    self.set_red(wr, false);
                    self.rotate_left(p);
                    x = self.root;
                }
            } else {
                let mut w = self.nodes[p].left;
                if self.is_red(w) {
                    self.set_red(w, false);
                    self.set_red(p, true);
                    self.rotate_right(p);
                    w = self.nodes[self.parent(x)].left;
                }
                if !self.is_red(self.nodes[w].left) && !self.is_red(self.nodes[w].right) {
                    self.set_red(w, true);
                    x = self.parent(x);
                } else {
                    if !self.is_red(self.nodes[w].left) {
                        let wr = self.nodes[w].right;
                        self.set_red(wr, false);
                        self.set_red(w, true);
                        self.rotate_left(w);
                        w = self.nodes[self.parent(x)].left;
                    }
                    let p = self.parent(x);
                    let p_red = self.is_red(p);
                    self.set_red(w, p_red);
                    self.set_red(p, false);
                    let wl = self.nodes[w].left;
                    self.set_red(wl, false);
                    self.rotate_right(p);
                    x = self.root;
                }
            }
        }
        self.set_red(x, false);
    }

    fn transplant(&mut self, u: usize, v: usize) {
        let up = self.nodes[u].parent;
        if up == NIL {
            self.root = v;
        } else if u == self.nodes[up].left {
            self.nodes[up].left = v;
        } else {
            self.nodes[up].right = v;
        }
        self.nodes[v].parent = up;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn find(&self, key: &K) -> Option<usize> {
        let mut cursor = self.root;
        while let Some(existing) = self.nodes[cursor].key.as_ref() {
            cursor = match key.cmp(existing) {
                Ordering::Less => self.nodes[cursor].left,
                Ordering::Greater => self.nodes[cursor].right,
                Ordering::Equal => return Some(cursor),
            };
        }
        None
    }

    fn minimum(&self, mut n: usize) -> usize {
        while self.nodes[n].left != NIL {
            n = self.nodes[n].left;
        }
        n
    }

    fn maximum(&self, mut n: usize) -> usize {
        while self.nodes[n].right != NIL {
            n = self.nodes[n].right;
        }
        n
    }

    fn parent(&self, n: usize) -> usize {
        self.nodes[n].parent
    }

    fn is_red(&self, n: usize) -> bool {
        n != NIL && self.nodes[n].red
    }

    fn set_red(&mut self, n: usize, red: bool) {
        if n != NIL {
            self.nodes[n].red = red;
        }
    }

    fn rotate_left(&mut self, x: usize) {
        let y = self.nodes[x].right;
        let yl = self.nodes[y].left;
        self.nodes[x].right = yl;
        if yl != NIL {
            self.nodes[yl].parent = x;
        }
        self.transplant(x, y);
        self.nodes[y].left = x;
        self.nodes[x].parent = y;
    }

    fn rotate_right(&mut self, x: usize) {
        let y = self.nodes[x].left;
        let yr = self.nodes[y].right;
        self.nodes[x].left = yr;
        if yr != NIL {
            self.nodes[yr].parent = x;
        }
        self.transplant(x, y);
        self.nodes[y].right = x;
        self.nodes[x].parent = y;
    }
}

// ---------------------------------------------------------------------------
// Iteration
// ---------------------------------------------------------------------------

/// In-order iterator over the keys of an [`RbTree`].
pub struct Iter<'a, K> {
    tree: &'a RbTree<K>,
    stack: Vec<usize>,
}

impl<K> Iter<'_, K> {
    fn push_left_spine(&mut self, mut n: usize) {
        while n != NIL {
            self.stack.push(n);
            n = self.tree.nodes[n].left;
        }
    }
}

impl<'a, K> Iterator for Iter<'a, K> {
    type Item = &'a K;

    fn next(&mut self) -> Option<&'a K> {
        let n = self.stack.pop()?;
        self.push_left_spine(self.tree.nodes[n].right);
        self.tree.nodes[n].key.as_ref()
    }
}

impl<'a, K: Ord> IntoIterator for &'a RbTree<K> {
    type Item = &'a K;
    type IntoIter = Iter<'a, K>;

    fn into_iter(self) -> Iter<'a, K> {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::{BTreeSet, VecDeque};

    impl<K: Ord + Clone> RbTree<K> {
        /// Keys in breadth-first order.
        fn bfs(&self) -> Vec<K> {
            let mut out = Vec::new();
            let mut queue = VecDeque::from([self.root]);
            while let Some(n) = queue.pop_front() {
                if n == NIL {
                    continue;
                }
                out.extend(self.nodes[n].key.clone());
                queue.push_back(self.nodes[n].left);
                queue.push_back(self.nodes[n].right);
            }
            out
        }

        /// Panics on any red-black violation; returns the black height.
        fn check_invariants(&self) -> usize {
            assert!(!self.is_red(self.root), "root is red");
            assert!(!self.nodes[NIL].red, "sentinel is red");
            if self.root != NIL {
                assert_eq!(self.parent(self.root), NIL);
            }
            let height = self.black_height(self.root);
            let keys: Vec<&K> = self.iter().collect();
            assert_eq!(keys.len(), self.len);
            assert!(keys.windows(2).all(|w| w[0] < w[1]), "keys out of order");
            height
        }

        fn black_height(&self, n: usize) -> usize {
            if n == NIL {
                return 1;
            }
            let node = &self.nodes[n];
            if node.red {
                assert!(!self.is_red(node.left) && !self.is_red(node.right), "red-red");
            }
            for child in [node.left, node.right] {
                if child != NIL {
                    assert_eq!(self.parent(child), n, "broken parent link");
                }
            }
            let left = self.black_height(node.left);
            let right = self.black_height(node.right);
            assert_eq!(left, right, "unequal black height");
            left + usize::from(!node.red)
        }
    }

    fn tree_of(values: &[u32]) -> RbTree<u32> {
        let mut tree = RbTree::new();
        for &v in values {
            assert!(tree.insert(v));
        }
        tree.check_invariants();
        tree
    }

    #[test]
    fn test_insert_shapes() {
        let cases: [(&[u32], &[u32]); 3] = [
            (
                &[41, 38, 31, 12, 19, 8, 7, 40, 45, 49, 48],
                &[38, 19, 41, 8, 31, 40, 48, 7, 12, 45, 49],
            ),
            (
                &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20],
                &[8, 4, 12, 2, 6, 10, 16, 1, 3, 5, 7, 9, 11, 14, 18, 13, 15, 17, 19, 20],
            ),
            (
                &[20, 19, 18, 17, 16, 15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1],
                &[13, 9, 17, 5, 11, 15, 19, 3, 7, 10, 12, 14, 16, 18, 20, 2, 4, 6, 8, 1],
            ),
        ];
        for (values, expected) in cases {
            assert_eq!(tree_of(values).bfs(), expected);
        }
    }

    #[test]
    fn test_remove_shapes() {
        let cases: [(&[u32], u32, &[u32]); 9] = [
            (&[41, 38, 31, 12, 19, 8], 41, &[19, 12, 38, 8, 31]),
            (
                &[60, 30, 80, 20, 50, 70, 90, 10, 100],
                60,
                &[50, 20, 80, 10, 30, 70, 90, 100],
            ),
            (
                &[50, 20, 80, 10, 30, 70, 90, 100],
                80,
                &[50, 20, 90, 10, 30, 70, 100],
            ),
            (
                &[60, 30, 80, 20, 50, 70, 90, 10, 100],
                30,
                &[60, 20, 80, 10, 50, 70, 90, 100],
            ),
            (
                &[38, 19, 86, 10, 31, 55, 89, 8, 56, 120],
                10,
                &[38, 19, 86, 8, 31, 55, 89, 56, 120],
            ),
            (
                &[38, 19, 120, 8, 31, 86, 140, 55, 89, 130, 150, 56, 160],
                120,
                &[86, 38, 140, 19, 55, 89, 150, 8, 31, 56, 130, 160],
            ),
            (&[20, 10, 30, 25], 10, &[25, 20, 30]),
            (&[20, 10, 30, 15], 30, &[15, 10, 20]),
            (
                &[56, 38, 140, 19, 55, 120, 150, 8, 31, 130, 160],
                56,
                &[55, 19, 140, 8, 38, 120, 150, 31, 130, 160],
            ),
        ];
        for (values, target, expected) in cases {
            let mut tree = tree_of(values);
            assert!(tree.remove(&target));
            tree.check_invariants();
            assert_eq!(tree.bfs(), expected, "removing {} from {:?}", target, values);
        }
    }

    #[test]
    fn test_duplicates_and_missing_keys_are_noops() {
        let mut tree = tree_of(&[5, 3, 8]);
        assert!(!tree.insert(5));
        assert_eq!(tree.len(), 3);
        assert!(tree.remove(&3));
        assert!(!tree.remove(&3));
        assert!(!tree.remove(&42));
        assert_eq!(tree.len(), 2);
        tree.check_invariants();
    }

    #[test]
    fn test_remove_everything_then_reuse_slots() {
        let mut tree = tree_of(&[4, 2, 6, 1, 3, 5, 7]);
        for v in [4, 1, 7, 2, 6, 3, 5] {
            assert!(tree.remove(&v));
            tree.check_invariants();
        }
        assert!(tree.is_empty());
        assert_eq!(tree.first(), None);
        assert_eq!(tree.iter().count(), 0);

        let slots = tree.nodes.len();
        for v in [10, 20, 30] {
            tree.insert(v);
        }
        assert_eq!(tree.nodes.len(), slots);
        assert_eq!(tree.iter().copied().collect::<Vec<_>>(), vec![10, 20, 30]);
        assert_eq!(tree.first(), Some(&10));
    }

    #[test]
    fn test_randomized_against_btreeset() {
        let mut rng = rand::rng();
        let mut tree = RbTree::new();
        let mut reference = BTreeSet::new();
        for _ in 0..4000 {
            let key: u32 = rng.random_range(0..300);
            if rng.random_bool(0.55) {
                assert_eq!(tree.insert(key), reference.insert(key));
            } else {
                assert_eq!(tree.remove(&key), reference.remove(&key));
            }
            assert!(tree.contains(&key) == reference.contains(&key));
        }
        tree.check_invariants();
        assert!(tree.iter().eq(reference.iter()));
    }

    #[test]
    fn test_invariants_hold_after_every_operation() {
        let mut rng = rand::rng();
        let mut tree = RbTree::new();
        for _ in 0..500 {
            let key: u16 = rng.random_range(0..64);
            if rng.random_bool(0.5) {
                tree.insert(key);
            } else {
                tree.remove(&key);
            }
            tree.check_invariants();
        }
    }
}
