//! Hierarchical path trie.
//!
//! [`PathTrie`] maps [`FsPath`]s to values at any depth. Nodes live in an
//! arena and point at their parent by index, so moving a whole subtree is a
//! matter of detaching one node and re-attaching it somewhere else: the
//! descendants follow without being visited. Lookups cost O(depth); renames
//! and removals cost O(depth) plus the size of the subtree they report on.
//!
//! Mutations never call back into user code. Instead, [`PathTrie::rename`]
//! and [`PathTrie::remove`] return one [`Moved`] / [`Removed`] entry per
//! affected valued path, and the caller dispatches them once the mutation is
//! done.
//!
//! # Invariants
//!
//! - The count stored at a node equals the number of values at or below it.
//! - Apart from the root, a node with neither value nor children does not
//!   exist: it is pruned as soon as it becomes empty.

use crate::{error::Result, Error, FsPath, PathCase};
use std::collections::HashMap;
use std::sync::Arc;

type NodeIx = usize;

#[derive(Debug, Clone)]
struct Node<V> {
    name: Arc<str>,
    parent: Option<NodeIx>,
    value: Option<V>,
    /// Children keyed by case-folded name
    children: HashMap<String, NodeIx>,
    /// Values at or below this node
    count: usize,
}

impl<V> Node<V> {
    fn new(name: Arc<str>, parent: Option<NodeIx>) -> Self {
        Self {
            name,
            parent,
            value: None,
            children: HashMap::new(),
            count: 0,
        }
    }
}

/// A valued entry that moved during a rename.
#[derive(Debug, Clone, PartialEq)]
pub struct Moved<V> {
    pub from: FsPath,
    pub to: FsPath,
    pub value: V,
}

/// A valued entry that was dropped by a removal.
#[derive(Debug, Clone, PartialEq)]
pub struct Removed<V> {
    pub path: FsPath,
    pub value: V,
}

/// A path, its value and everything beneath it.
#[derive(Debug, Clone, PartialEq)]
pub struct Hierarchy<V> {
    pub path: FsPath,
    pub value: Option<V>,
    /// Children ordered by case-folded name
    pub children: Vec<Hierarchy<V>>,
}

impl<V> Hierarchy<V> {
    /// Number of values in this tree.
    pub fn count(&self) -> usize {
        usize::from(self.value.is_some()) + self.children.iter().map(Hierarchy::count).sum::<usize>()
    }
}

/// A map keyed by filesystem path with whole-subtree rename and removal.
#[derive(Debug, Clone)]
pub struct PathTrie<V> {
    nodes: Vec<Option<Node<V>>>,
    free: Vec<NodeIx>,
    root: NodeIx,
    root_path: FsPath,
    case: PathCase,
}

impl<V> Default for PathTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> PathTrie<V> {
    /// Create a case-insensitive trie rooted at the empty path.
    pub fn new() -> Self {
        Self::with_root(FsPath::root(), PathCase::Insensitive)
    }

    /// Create a trie that only accepts paths at or below `root_path`.
    pub fn with_root(root_path: FsPath, case: PathCase) -> Self {
        let name: Arc<str> = Arc::from(root_path.name().unwrap_or(""));
        Self {
            nodes: vec![Some(Node::new(name, None))],
            free: Vec::new(),
            root: 0,
            root_path,
            case,
        }
    }

    /// The path this trie is rooted at.
    pub fn root_path(&self) -> &FsPath {
        &self.root_path
    }

    /// The comparison rule used for keys.
    pub fn case(&self) -> PathCase {
        self.case
    }

    /// Number of stored values.
    pub fn count(&self) -> usize {
        self.node(self.root).count
    }

    /// Whether no value is stored.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Number of values at or below `path`.
    pub fn count_under(&self, path: &FsPath) -> usize {
        self.find(path).map_or(0, |ix| self.node(ix).count)
    }

    /// Value stored at exactly `path`.
    pub fn get(&self, path: &FsPath) -> Option<&V> {
        self.find(path).and_then(|ix| self.node(ix).value.as_ref())
    }

    /// Mutable value stored at exactly `path`.
    pub fn get_mut(&mut self, path: &FsPath) -> Option<&mut V> {
        let ix = self.find(path)?;
        self.node_mut(ix).value.as_mut()
    }

    /// Whether a value is stored at exactly `path`.
    pub fn contains(&self, path: &FsPath) -> bool {
        self.get(path).is_some()
    }

    /// Store a value at an unoccupied path.
    pub fn add(&mut self, path: &FsPath, value: V) -> Result<()> {
        if self.contains(path) {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        let ix = self.ensure(path)?;
        self.put_value(ix, value);
        Ok(())
    }

    /// Store (`Some`) or clear (`None`) the value at `path`, returning the old one.
    ///
    /// Clearing touches only the slot itself; descendants stay in place.
    pub fn set(&mut self, path: &FsPath, value: Option<V>) -> Result<Option<V>> {
        self.relative(path)?;
        match value {
            Some(value) => {
                let ix = self.ensure(path)?;
                Ok(self.put_value(ix, value))
            }
            None => Ok(self.find(path).and_then(|ix| self.take_value(ix))),
        }
    }

    /// Remove `path` and everything beneath it.
    ///
    /// Returns one entry per value that was removed; an empty list means
    /// nothing was stored there.
    pub fn remove(&mut self, path: &FsPath) -> Result<Vec<Removed<V>>> {
        self.relative(path)?;
        let Some(ix) = self.find(path) else {
            return Ok(Vec::new());
        };

        let subtree = self.subtree(ix, path.clone());
        let mut removed = Vec::new();
        for (node_ix, node_path) in &subtree {
            if let Some(value) = self.node_mut(*node_ix).value.take() {
                removed.push(Removed {
                    path: node_path.clone(),
                    value,
                });
            }
        }

        if ix == self.root {
            for (node_ix, _) in subtree.iter().skip(1) {
                self.release(*node_ix);
            }
            let root = self.node_mut(ix);
            root.children.clear();
            root.count = 0;
        } else {
            let parent = self.detach(ix);
            for (node_ix, _) in &subtree {
                self.release(*node_ix);
            }
            self.sub_count(parent, removed.len());
            self.prune(parent);
        }

        Ok(removed)
    }

    /// Move the entry at `from`, together with everything beneath it, to `to`.
    ///
    /// Returns one entry per moved value with its old and new path.
    pub fn rename(&mut self, from: &FsPath, to: &FsPath) -> Result<Vec<Moved<V>>>
    where
        V: Clone,
    {
        let case = self.case;
        self.relative(from)?;
        self.relative(to)?;
        if from.eq_with(&self.root_path, case) {
            return Err(Error::InvalidArgument(format!(
                "cannot rename the trie root {from}"
            )));
        }
        let overlap = from.common_ancestor(to, case);
        if !overlap.starts_with(&self.root_path, case) {
            return Err(Error::InvalidArgument(format!(
                "{from} and {to} share no ancestor inside {}",
                self.root_path
            )));
        }
        let same_slot = from.eq_with(to, case);
        if !same_slot && to.starts_with(from, case) {
            return Err(Error::InvalidArgument(format!(
                "cannot move {from} inside itself ({to})"
            )));
        }

        let src = self
            .find(from)
            .ok_or_else(|| Error::NotFound(from.to_string()))?;
        let Some(new_name) = to.name() else {
            return Err(Error::InvalidArgument("rename target is empty".into()));
        };
        let new_name: Arc<str> = Arc::from(new_name);

        if same_slot {
            if from.eq_with(to, PathCase::Sensitive) {
                return Ok(Vec::new());
            }
            // Case-only change: the folded key stays, the display name changes.
            self.node_mut(src).name = new_name;
            return Ok(self.moved_entries(src, from, to));
        }

        if self.find(to).is_some() {
            return Err(Error::AlreadyExists(to.to_string()));
        }

        let moved = self.moved_entries(src, from, to);
        let Some(target_parent) = to.parent() else {
            return Err(Error::InvalidArgument("rename target is empty".into()));
        };
        let new_parent = self.ensure(&target_parent)?;
        let delta = self.node(src).count;

        let old_parent = self.detach(src);
        self.sub_count(old_parent, delta);

        let key = case.fold(&new_name).into_owned();
        {
            let node = self.node_mut(src);
            node.name = new_name;
            node.parent = Some(new_parent);
        }
        self.node_mut(new_parent).children.insert(key, src);
        self.add_count(new_parent, delta);
        self.prune(old_parent);

        Ok(moved)
    }

    /// Snapshot of `path` and everything beneath it.
    pub fn hierarchy(&self, path: &FsPath) -> Option<Hierarchy<V>>
    where
        V: Clone,
    {
        self.find(path).map(|ix| self.build_hierarchy(ix, path.clone()))
    }

    /// Iterate every `(path, value)` pair, in no particular order.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            trie: self,
            stack: vec![(self.root, self.root_path.clone())],
        }
    }

    /// Iterate every `(path, value)` pair at or below `path`.
    pub fn iter_under(&self, path: &FsPath) -> Iter<'_, V> {
        let stack = match self.find(path) {
            Some(ix) => vec![(ix, path.clone())],
            None => Vec::new(),
        };
        Iter { trie: self, stack }
    }

    // ------------------------------------------------------------------
    // Arena plumbing
    // ------------------------------------------------------------------

    fn node(&self, ix: NodeIx) -> &Node<V> {
        match self.nodes.get(ix) {
            Some(Some(node)) => node,
            _ => unreachable!("trie node {ix} was released"),
        }
    }

    fn node_mut(&mut self, ix: NodeIx) -> &mut Node<V> {
        match self.nodes.get_mut(ix) {
            Some(Some(node)) => node,
            _ => unreachable!("trie node {ix} was released"),
        }
    }

    fn alloc(&mut self, node: Node<V>) -> NodeIx {
        match self.free.pop() {
            Some(ix) => {
                self.nodes[ix] = Some(node);
                ix
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, ix: NodeIx) {
        self.nodes[ix] = None;
        self.free.push(ix);
    }

    /// Segments of `path` below the trie root.
    fn relative<'p>(&self, path: &'p FsPath) -> Result<Vec<&'p str>> {
        if !path.starts_with(&self.root_path, self.case) {
            return Err(Error::InvalidArgument(format!(
                "{path} is outside {}",
                self.root_path
            )));
        }
        Ok(path.segments().skip(self.root_path.depth()).collect())
    }

    fn find(&self, path: &FsPath) -> Option<NodeIx> {
        let segments = self.relative(path).ok()?;
        let mut current = self.root;
        for segment in segments {
            let key = self.case.fold(segment);
            current = *self.node(current).children.get(&*key)?;
        }
        Some(current)
    }

    /// Find or create the node for `path`, materializing intermediate nodes.
    fn ensure(&mut self, path: &FsPath) -> Result<NodeIx> {
        let segments = self.relative(path)?;
        let mut current = self.root;
        for segment in segments {
            let key = self.case.fold(segment).into_owned();
            current = match self.node(current).children.get(&key) {
                Some(&child) => child,
                None => {
                    let child = self.alloc(Node::new(Arc::from(segment), Some(current)));
                    self.node_mut(current).children.insert(key, child);
                    child
                }
            };
        }
        Ok(current)
    }

    /// Unlink a non-root node from its parent and return the parent.
    fn detach(&mut self, ix: NodeIx) -> NodeIx {
        let (parent, key) = {
            let node = self.node(ix);
            match node.parent {
                Some(parent) => (parent, self.case.fold(&node.name).into_owned()),
                None => unreachable!("the trie root cannot be detached"),
            }
        };
        self.node_mut(parent).children.remove(&key);
        parent
    }

    fn put_value(&mut self, ix: NodeIx, value: V) -> Option<V> {
        let previous = self.node_mut(ix).value.replace(value);
        if previous.is_none() {
            self.add_count(ix, 1);
        }
        previous
    }

    fn take_value(&mut self, ix: NodeIx) -> Option<V> {
        let previous = self.node_mut(ix).value.take();
        if previous.is_some() {
            self.sub_count(ix, 1);
            self.prune(ix);
        }
        previous
    }

    fn add_count(&mut self, from: NodeIx, amount: usize) {
        let mut current = Some(from);
        while let Some(ix) = current {
            let node = self.node_mut(ix);
            node.count += amount;
            current = node.parent;
        }
    }

    fn sub_count(&mut self, from: NodeIx, amount: usize) {
        let mut current = Some(from);
        while let Some(ix) = current {
            let node = self.node_mut(ix);
            node.count -= amount;
            current = node.parent;
        }
    }

    /// Drop empty nodes from `from` upwards, stopping at the root.
    fn prune(&mut self, from: NodeIx) {
        let mut current = from;
        while current != self.root {
            let node = self.node(current);
            if node.value.is_some() || !node.children.is_empty() {
                break;
            }
            let parent = self.detach(current);
            self.release(current);
            current = parent;
        }
    }

    /// Every node of the subtree at `ix` with its path, parents first.
    fn subtree(&self, ix: NodeIx, path: FsPath) -> Vec<(NodeIx, FsPath)> {
        let mut out = Vec::new();
        let mut stack = vec![(ix, path)];
        while let Some((current, current_path)) = stack.pop() {
            let node = self.node(current);
            for &child in node.children.values() {
                let child_path = current_path.join_unchecked(&self.node(child).name);
                stack.push((child, child_path));
            }
            out.push((current, current_path));
        }
        out
    }

    fn moved_entries(&self, src: NodeIx, from: &FsPath, to: &FsPath) -> Vec<Moved<V>>
    where
        V: Clone,
    {
        self.subtree(src, FsPath::root())
            .into_iter()
            .filter_map(|(ix, suffix)| {
                self.node(ix).value.clone().map(|value| Moved {
                    from: from.join_path(&suffix),
                    to: to.join_path(&suffix),
                    value,
                })
            })
            .collect()
    }

    fn build_hierarchy(&self, ix: NodeIx, path: FsPath) -> Hierarchy<V>
    where
        V: Clone,
    {
        let node = self.node(ix);
        let mut keys: Vec<(&String, &NodeIx)> = node.children.iter().collect();
        keys.sort_by(|a, b| a.0.cmp(b.0));
        let children = keys
            .into_iter()
            .map(|(_, &child)| {
                let child_path = path.join_unchecked(&self.node(child).name);
                self.build_hierarchy(child, child_path)
            })
            .collect();
        Hierarchy {
            path,
            value: node.value.clone(),
            children,
        }
    }
}

/// Iterator over the valued entries of a [`PathTrie`].
#[derive(Debug)]
pub struct Iter<'a, V> {
    trie: &'a PathTrie<V>,
    stack: Vec<(NodeIx, FsPath)>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (FsPath, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((ix, path)) = self.stack.pop() {
            let node = self.trie.node(ix);
            for &child in node.children.values() {
                let child_path = path.join_unchecked(&self.trie.node(child).name);
                self.stack.push((child, child_path));
            }
            if let Some(value) = node.value.as_ref() {
                return Some((path, value));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn p(s: &str) -> FsPath {
        FsPath::parse(s).unwrap()
    }

    fn sample() -> PathTrie<u32> {
        let mut trie = PathTrie::new();
        trie.add(&p("A"), 1).unwrap();
        trie.add(&p("A/B"), 2).unwrap();
        trie.add(&p("A/B/x.txt"), 3).unwrap();
        trie.add(&p("A/B/y/z.txt"), 4).unwrap();
        trie
    }

    #[test]
    fn add_get_count() {
        let trie = sample();
        assert_eq!(trie.get(&p("A/B/x.txt")), Some(&3));
        assert_eq!(trie.get(&p("a/b/Y/Z.TXT")), Some(&4));
        assert_eq!(trie.count(), 4);
        // Intermediate node without a value
        assert!(!trie.contains(&p("A/B/y")));
        assert_eq!(trie.count_under(&p("A/B/y")), 1);
    }

    #[test]
    fn non_ascii_case_variants_share_a_slot() {
        let mut trie = PathTrie::new();
        // Final sigma and a titlecase digraph fold per character
        trie.add(&p("ΟΔΟΣ/ǅemal"), 1).unwrap();
        assert_eq!(trie.get(&p("οδοσ/ǆemal")), Some(&1));
        assert_eq!(trie.get(&p("ΟδοΣ/ǄEMAL")), Some(&1));
        assert!(matches!(
            trie.add(&p("οδοσ/ǆemal"), 2),
            Err(Error::AlreadyExists(_))
        ));
        assert_eq!(trie.count(), 1);
    }

    #[test]
    fn add_rejects_occupied_path() {
        let mut trie = sample();
        assert!(matches!(
            trie.add(&p("a/b"), 9),
            Err(Error::AlreadyExists(_))
        ));
        assert_eq!(trie.get(&p("A/B")), Some(&2));
    }

    #[test]
    fn set_none_clears_only_the_slot() {
        let mut trie = sample();
        assert_eq!(trie.set(&p("A/B"), None).unwrap(), Some(2));
        assert_eq!(trie.count(), 3);
        assert_eq!(trie.get(&p("A/B/x.txt")), Some(&3));
        assert_eq!(trie.set(&p("A/B"), Some(5)).unwrap(), None);
        assert_eq!(trie.set(&p("A/B"), Some(6)).unwrap(), Some(5));
        assert_eq!(trie.count(), 4);
    }

    #[test]
    fn clearing_a_leaf_prunes_empty_intermediates() {
        let mut trie = PathTrie::new();
        trie.add(&p("a/b/c/d"), 1).unwrap();
        trie.set(&p("a/b/c/d"), None).unwrap();
        assert!(trie.hierarchy(&p("a")).is_none());
        assert_eq!(trie.count(), 0);
    }

    #[test]
    fn rename_moves_subtree_and_reports_each_value() {
        let mut trie = sample();
        let moved = trie.rename(&p("A/B"), &p("A/C")).unwrap();

        assert_eq!(trie.get(&p("A/C")), Some(&2));
        assert_eq!(trie.get(&p("A/C/x.txt")), Some(&3));
        assert_eq!(trie.get(&p("A/C/y/z.txt")), Some(&4));
        assert!(!trie.contains(&p("A/B")));
        assert!(!trie.contains(&p("A/B/x.txt")));
        assert_eq!(trie.count_under(&p("A/B")), 0);
        assert_eq!(trie.count(), 4);

        let pairs: BTreeMap<String, (String, u32)> = moved
            .into_iter()
            .map(|m| (m.from.to_string(), (m.to.to_string(), m.value)))
            .collect();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs["A/B"], ("A/C".to_string(), 2));
        assert_eq!(pairs["A/B/x.txt"], ("A/C/x.txt".to_string(), 3));
        assert_eq!(pairs["A/B/y/z.txt"], ("A/C/y/z.txt".to_string(), 4));
    }

    #[test]
    fn rename_across_subtrees_creates_and_prunes_intermediates() {
        let mut trie = PathTrie::new();
        trie.add(&p("left/deep/file"), 1).unwrap();
        trie.add(&p("right"), 2).unwrap();

        let moved = trie.rename(&p("left/deep"), &p("right/new/place")).unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(trie.get(&p("right/new/place/file")), Some(&1));
        assert!(trie.hierarchy(&p("left")).is_none());
        assert_eq!(trie.count_under(&p("right")), 2);
    }

    #[test]
    fn rename_errors() {
        let mut trie = sample();
        assert!(matches!(
            trie.rename(&p("A/missing"), &p("A/other")),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            trie.rename(&p("A/B/x.txt"), &p("A")),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            trie.rename(&p("A/B"), &p("A/B/inner")),
            Err(Error::InvalidArgument(_))
        ));

        let mut rooted: PathTrie<u32> = PathTrie::with_root(p("root"), PathCase::Insensitive);
        rooted.add(&p("root/a"), 1).unwrap();
        assert!(matches!(
            rooted.rename(&p("root/a"), &p("elsewhere/a")),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            rooted.add(&p("elsewhere"), 1),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn case_only_rename_relabels() {
        let mut trie = sample();
        let moved = trie.rename(&p("A/B"), &p("A/b")).unwrap();
        assert_eq!(moved.len(), 3);
        let hierarchy = trie.hierarchy(&p("A")).unwrap();
        let names: Vec<String> = hierarchy
            .children
            .iter()
            .map(|h| h.path.to_string())
            .collect();
        assert_eq!(names, vec!["A/b"]);
        assert_eq!(trie.get(&p("A/B/x.txt")), Some(&3));
    }

    #[test]
    fn remove_folder_reports_every_value() {
        let mut trie = sample();
        trie.add(&p("other"), 7).unwrap();
        let removed = trie.remove(&p("A/B")).unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(trie.count_under(&p("A/B")), 0);
        assert_eq!(trie.count(), 2);
        assert!(trie.remove(&p("A/B")).unwrap().is_empty());
    }

    #[test]
    fn remove_root_clears_everything() {
        let mut trie = sample();
        let removed = trie.remove(&FsPath::root()).unwrap();
        assert_eq!(removed.len(), 4);
        assert!(trie.is_empty());
        trie.add(&p("fresh"), 1).unwrap();
        assert_eq!(trie.count(), 1);
    }

    #[test]
    fn hierarchy_and_iteration() {
        let trie = sample();
        let tree = trie.hierarchy(&p("A/B")).unwrap();
        assert_eq!(tree.value, Some(2));
        assert_eq!(tree.count(), 3);
        assert_eq!(tree.children.len(), 2);

        let all: BTreeSet<String> = trie.iter().map(|(path, _)| path.to_string()).collect();
        assert_eq!(all.len(), 4);
        let under: BTreeSet<String> = trie
            .iter_under(&p("A/B/y"))
            .map(|(path, _)| path.to_string())
            .collect();
        assert_eq!(under, BTreeSet::from(["A/B/y/z.txt".to_string()]));
    }

    #[test]
    fn case_sensitive_trie_keeps_distinct_names() {
        let mut trie = PathTrie::with_root(FsPath::root(), PathCase::Sensitive);
        trie.add(&p("Readme"), 1).unwrap();
        trie.add(&p("README"), 2).unwrap();
        assert_eq!(trie.count(), 2);
        assert_eq!(trie.get(&p("readme")), None);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_path() -> impl Strategy<Value = String> {
            proptest::collection::vec(prop_oneof![Just("a"), Just("b"), Just("c")], 1..5)
                .prop_map(|segments| segments.join("/"))
        }

        proptest! {
            #[test]
            fn prop_count_tracks_adds_and_removes(
                paths in proptest::collection::btree_set(arb_path(), 1..20),
                removals in proptest::collection::vec(any::<bool>(), 20),
            ) {
                let mut trie = PathTrie::new();
                for (i, path) in paths.iter().enumerate() {
                    trie.add(&p(path), i).unwrap();
                }
                prop_assert_eq!(trie.count(), paths.len());

                let mut expected = paths.len();
                for (path, remove) in paths.iter().zip(removals) {
                    if remove {
                        if trie.set(&p(path), None).unwrap().is_some() {
                            expected -= 1;
                        }
                    }
                }
                prop_assert_eq!(trie.count(), expected);
                prop_assert_eq!(trie.iter().count(), expected);
            }

            #[test]
            fn prop_rename_preserves_values(
                paths in proptest::collection::btree_set(arb_path(), 1..20),
            ) {
                let mut trie = PathTrie::new();
                for (i, path) in paths.iter().enumerate() {
                    trie.add(&p(&format!("src/{path}")), i).unwrap();
                }
                let moved = trie.rename(&p("src"), &p("dst/inner")).unwrap();
                prop_assert_eq!(moved.len(), paths.len());
                prop_assert_eq!(trie.count_under(&p("dst/inner")), paths.len());
                for (i, path) in paths.iter().enumerate() {
                    let moved_path = p(&format!("dst/inner/{path}"));
                    prop_assert_eq!(trie.get(&moved_path), Some(&i));
                }
                prop_assert!(trie.hierarchy(&p("src")).is_none());
            }
        }
    }
}
