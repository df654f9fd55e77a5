//! # B-Tree Core
//!
//! [`BTreeIndex`] is the handle an application holds: it owns the pager,
//! the two codecs and the comparator, and runs every tree algorithm. The
//! tree is a classic B-tree of branching factor `ORDER`: entries live in
//! every node, each node fills one fixed slot of the tree file, and all
//! leaves sit at the same depth.
//!
//! ## Search
//!
//! `find_path` walks from the root recording one `(slot, index)` frame per
//! node. The index is where the scan stopped, which doubles as the child
//! taken when the walk descends. Mutations replay this stack bottom-up, so
//! no node ever needs a parent pointer.
//!
//! ## Insert
//!
//! The new entry goes into the leaf the search ended at. A leaf may
//! temporarily exceed `MAX_KEYS` on disk; the split cascade then walks the
//! recorded stack upward. Each split promotes the upper median: for an
//! overfull node the separator is `entries[len / 2]`, the right sibling
//! takes everything above it, and the separator moves into the parent.
//! When the stack runs out the root itself split, and a new internal root
//! is allocated with the two halves as children.
//!
//! ## Erase
//!
//! Erasing from a leaf removes the entry and, on underflow, rebalances
//! bottom-up: borrow from the left sibling, else borrow from the right,
//! else merge with a sibling and let the parent's own underflow cascade.
//! Erasing a separator from an internal node replaces it with its in-order
//! predecessor (when the left child can spare an entry) or successor
//! (right child), deleting from the leaf instead. When both children are
//! minimal they are folded together around the separator and the erase
//! continues inside the merged subtree.
//!
//! An internal root left with no separators promotes its surviving child;
//! a root leaf left with no entries empties the tree. Dead slots are never
//! reclaimed.
//!
//! ## Durability
//!
//! Every mutated node is written back before the operation returns, data
//! records ahead of the slots that reference them, and the header last.
//! There is no journal: a crash mid-operation can leave the pair of files
//! inconsistent, and recovering from that is out of scope.

use std::fmt;
use std::io::{self, Write as _};
use std::path::Path as FsPath;

use eyre::{bail, ensure, Result, WrapErr};
use tracing::{debug, trace};

use super::node::{Entry, Node};
use super::path::{Frame, Path};
use super::DEFAULT_ORDER;
use crate::codec::{Codec, KeyOrder, NaturalOrder};
use crate::storage::{Pager, RawNode};

/// Persistent ordered key→value index over a `<path>.tree` /
/// `<path>.data` file pair.
///
/// `KC` and `VC` encode keys and values, `C` orders keys, and `ORDER` is
/// the branching factor baked into the slot layout. Opening an existing
/// index with a different `ORDER` than it was written with fails the
/// header consistency checks.
pub struct BTreeIndex<KC, VC, C = NaturalOrder, const ORDER: usize = DEFAULT_ORDER>
where
    KC: Codec,
    VC: Codec,
    C: KeyOrder<KC::Item>,
{
    pub(crate) pager: Pager<ORDER>,
    pub(crate) cmp: C,
    key_codec: KC,
    value_codec: VC,
}

impl<KC, VC, C, const ORDER: usize> BTreeIndex<KC, VC, C, ORDER>
where
    KC: Codec,
    VC: Codec,
    C: KeyOrder<KC::Item>,
{
    pub(crate) const MIN_KEYS: usize = ORDER - 1;
    pub(crate) const MAX_KEYS: usize = 2 * ORDER - 1;

    /// Opens the index at `base`, creating it when absent, with default
    /// codecs and the natural key order.
    pub fn open<P: AsRef<FsPath>>(base: P) -> Result<Self>
    where
        KC: Default,
        VC: Default,
        C: Default,
    {
        Self::open_with(base, KC::default(), VC::default(), C::default())
    }

    /// Opens the index at `base` with explicit codecs and comparator.
    pub fn open_with<P: AsRef<FsPath>>(
        base: P,
        key_codec: KC,
        value_codec: VC,
        cmp: C,
    ) -> Result<Self> {
        let pager = Pager::open_or_create(base)?;
        Ok(Self {
            pager,
            cmp,
            key_codec,
            value_codec,
        })
    }

    /// Number of slots ever allocated, live and dead.
    pub fn node_count(&self) -> u64 {
        self.pager.node_count()
    }

    /// True when the index holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        match self.pager.root() {
            None => Ok(true),
            Some(root) => Ok(self.load_node(root)?.is_empty()),
        }
    }

    pub(crate) fn load_node(&self, slot: u64) -> Result<Node<KC::Item, VC::Item>> {
        let raw = self.pager.read_slot(slot)?;
        let mut entries = Vec::with_capacity(raw.len());
        for &offset in &raw.offsets {
            ensure!(
                offset != 0,
                "slot {} references an unwritten record (offset 0)",
                slot
            );
            let mut reader = self.pager.record_at(offset);
            let key = self
                .key_codec
                .decode(&mut reader)
                .wrap_err_with(|| format!("failed to decode key at data offset {}", offset))?;
            let value = self
                .value_codec
                .decode(&mut reader)
                .wrap_err_with(|| format!("failed to decode value at data offset {}", offset))?;
            entries.push(Entry { key, value });
        }
        Ok(Node {
            slot: raw.slot,
            is_leaf: raw.is_leaf,
            entries,
            children: raw.children,
        })
    }

    /// Appends the node's entries to the data file and rewrites its slot.
    /// Records superseded by the rewrite become garbage in the data file.
    pub(crate) fn store_node(&mut self, node: &Node<KC::Item, VC::Item>) -> Result<()> {
        let mut offsets = Vec::with_capacity(node.len());
        let mut record = Vec::new();
        for entry in &node.entries {
            record.clear();
            self.key_codec.encode(&entry.key, &mut record)?;
            self.value_codec.encode(&entry.value, &mut record)?;
            offsets.push(self.pager.append_record(&record)?);
        }
        self.pager.write_slot(&RawNode {
            slot: node.slot,
            is_leaf: node.is_leaf,
            children: node.children.clone(),
            offsets,
        })
    }

    /// Walks from the root toward `key`. Returns the descent stack, the
    /// index the search stopped at in the terminal node, and whether that
    /// index is an exact match. An empty tree yields an empty stack.
    pub(crate) fn find_path(&self, key: &KC::Item) -> Result<(Path, usize, bool)> {
        let mut path = Path::new();
        let Some(root) = self.pager.root() else {
            return Ok((path, 0, false));
        };

        let mut slot = root;
        loop {
            let node = self.load_node(slot)?;
            let (index, found) = node.find_index(key, &self.cmp);
            path.push(Frame { slot, index });
            if found || node.is_leaf {
                return Ok((path, index, found));
            }
            slot = node.child(index)?;
        }
    }

    /// Point lookup. Returns the stored value, or `None` when absent.
    pub fn at(&self, key: &KC::Item) -> Result<Option<VC::Item>> {
        let (path, index, found) = self.find_path(key)?;
        if !found {
            return Ok(None);
        }
        let Some(frame) = path.last() else {
            bail!("search reported a hit with an empty path");
        };
        let mut node = self.load_node(frame.slot)?;
        ensure!(
            index < node.len(),
            "entry index {} out of bounds in slot {}",
            index,
            frame.slot
        );
        Ok(Some(node.entries.swap_remove(index).value))
    }

    /// Inserts a new entry. Returns false, leaving the stored value
    /// untouched, when the key is already present.
    pub fn insert(&mut self, key: KC::Item, value: VC::Item) -> Result<bool> {
        let (mut path, index, found) = self.find_path(&key)?;
        if found {
            return Ok(false);
        }

        let Some(frame) = path.pop() else {
            // The tree was emptied by erases; start a fresh root leaf.
            // Slots are never reused, so the old root slot stays dead.
            let slot = self.pager.allocate_slot();
            let mut leaf = Node::new_leaf(slot);
            leaf.entries.push(Entry { key, value });
            self.store_node(&leaf)?;
            self.pager.set_root(Some(slot));
            self.pager.write_header()?;
            return Ok(true);
        };

        let mut leaf = self.load_node(frame.slot)?;
        leaf.entries.insert(index, Entry { key, value });
        self.store_node(&leaf)?;

        if leaf.len() > Self::MAX_KEYS {
            path.push(frame);
            self.split_cascade(path)?;
        }
        self.pager.write_header()?;
        Ok(true)
    }

    /// Splits the overfull node at the top of `path`, promoting its upper
    /// median into the parent, and keeps going while parents overflow.
    fn split_cascade(&mut self, mut path: Path) -> Result<()> {
        while let Some(frame) = path.pop() {
            let mut node = self.load_node(frame.slot)?;
            if node.len() <= Self::MAX_KEYS {
                return Ok(());
            }

            let mid = node.len() / 2;
            let right_slot = self.pager.allocate_slot();
            let mut right = if node.is_leaf {
                Node::new_leaf(right_slot)
            } else {
                Node::new_internal(right_slot)
            };
            right.entries = node.entries.split_off(mid + 1);
            let separator = node.pop_entry()?;
            if !node.is_leaf {
                right.children = node.children.split_off(mid + 1);
            }
            self.store_node(&node)?;
            self.store_node(&right)?;
            trace!(left = node.slot, right = right_slot, "split overfull node");

            match path.last().copied() {
                None => {
                    // `node` was the root: grow a level.
                    let root_slot = self.pager.allocate_slot();
                    let mut root = Node::new_internal(root_slot);
                    root.entries.push(separator);
                    root.children.push(node.slot);
                    root.children.push(right_slot);
                    self.store_node(&root)?;
                    self.pager.set_root(Some(root_slot));
                    debug!(root = root_slot, "tree grew a level");
                    return Ok(());
                }
                Some(parent_frame) => {
                    let mut parent = self.load_node(parent_frame.slot)?;
                    parent.entries.insert(parent_frame.index, separator);
                    parent.children.insert(parent_frame.index + 1, right_slot);
                    self.store_node(&parent)?;
                    // The parent frame stays on the stack; the next pass
                    // re-examines it for overflow.
                }
            }
        }
        Ok(())
    }

    /// Overwrites the value of an existing entry. Returns false when the
    /// key is absent. The previous record becomes data-file garbage.
    pub fn update(&mut self, key: &KC::Item, value: VC::Item) -> Result<bool> {
        let (path, index, found) = self.find_path(key)?;
        if !found {
            return Ok(false);
        }
        let Some(frame) = path.last() else {
            bail!("search reported a hit with an empty path");
        };
        let mut node = self.load_node(frame.slot)?;
        ensure!(
            index < node.len(),
            "entry index {} out of bounds in slot {}",
            index,
            frame.slot
        );
        node.entries[index].value = value;
        self.store_node(&node)?;
        Ok(true)
    }

    /// Removes an entry. Returns false when the key is absent.
    pub fn erase(&mut self, key: &KC::Item) -> Result<bool> {
        let (path, index, found) = self.find_path(key)?;
        if !found {
            return Ok(false);
        }
        self.erase_resolved(path, index, key)?;
        self.pager.write_header()?;
        Ok(true)
    }

    fn erase_resolved(&mut self, mut path: Path, mut index: usize, key: &KC::Item) -> Result<()> {
        loop {
            let Some(frame) = path.pop() else {
                bail!("search reported a hit with an empty path");
            };
            let mut node = self.load_node(frame.slot)?;
            ensure!(
                index < node.len(),
                "entry index {} out of bounds in slot {}",
                index,
                frame.slot
            );

            if node.is_leaf {
                node.entries.remove(index);
                self.store_node(&node)?;
                if Some(node.slot) == self.pager.root() {
                    if node.is_empty() {
                        self.pager.set_root(None);
                        debug!("tree emptied");
                    }
                } else if node.len() < Self::MIN_KEYS {
                    self.rebalance(&mut path, node)?;
                }
                return Ok(());
            }

            let left_slot = node.child(index)?;
            let right_slot = node.child(index + 1)?;

            let left = self.load_node(left_slot)?;
            if left.len() > Self::MIN_KEYS {
                // Replace the separator with its in-order predecessor, the
                // last entry of the rightmost leaf of the left subtree.
                path.push(Frame { slot: node.slot, index });
                let mut pred = left;
                while !pred.is_leaf {
                    let last = pred.len();
                    let next = pred.child(last)?;
                    path.push(Frame { slot: pred.slot, index: last });
                    pred = self.load_node(next)?;
                }
                node.entries[index] = pred.pop_entry()?;
                self.store_node(&node)?;
                self.store_node(&pred)?;
                if pred.len() < Self::MIN_KEYS {
                    self.rebalance(&mut path, pred)?;
                }
                return Ok(());
            }

            let right = self.load_node(right_slot)?;
            if right.len() > Self::MIN_KEYS {
                // Symmetric: in-order successor from the leftmost leaf of
                // the right subtree.
                path.push(Frame { slot: node.slot, index: index + 1 });
                let mut succ = right;
                while !succ.is_leaf {
                    let next = succ.child(0)?;
                    path.push(Frame { slot: succ.slot, index: 0 });
                    succ = self.load_node(next)?;
                }
                node.entries[index] = succ.take_first_entry()?;
                self.store_node(&node)?;
                self.store_node(&succ)?;
                if succ.len() < Self::MIN_KEYS {
                    self.rebalance(&mut path, succ)?;
                }
                return Ok(());
            }

            // Both children are minimal: fold the separator and the right
            // child into the left child. The separator is the key being
            // erased, so the erase continues inside the merged subtree.
            let mut left = left;
            let mut right = right;
            left.entries.push(node.entries.remove(index));
            left.entries.append(&mut right.entries);
            if !left.is_leaf {
                left.children.append(&mut right.children);
            }
            node.children.remove(index + 1);
            self.store_node(&left)?;
            self.store_node(&node)?;
            trace!(survivor = left.slot, dead = right_slot, "merged children around pending key");

            if Some(node.slot) == self.pager.root() && node.is_empty() {
                self.pager.set_root(Some(left.slot));
                debug!(root = left.slot, "tree lost a level");
            } else if node.len() < Self::MIN_KEYS && Some(node.slot) != self.pager.root() {
                self.rebalance(&mut path, node)?;
            }

            let (new_path, new_index, still_found) = self.find_path(key)?;
            ensure!(
                still_found,
                "key vanished while merging around slot {}",
                left_slot
            );
            path = new_path;
            index = new_index;
        }
    }

    /// Restores the minimum-occupancy invariant for `node` after an
    /// underflow, cascading upward while merges leave parents underfull.
    /// The frames in `path` are `node`'s proper ancestors.
    fn rebalance(&mut self, path: &mut Path, mut node: Node<KC::Item, VC::Item>) -> Result<()> {
        loop {
            if node.len() >= Self::MIN_KEYS {
                return Ok(());
            }
            // An underfull root is legal; it is resolved where it arises.
            let Some(parent_frame) = path.pop() else {
                return Ok(());
            };
            let mut parent = self.load_node(parent_frame.slot)?;
            let position = parent_frame.index;
            ensure!(
                position < parent.children.len() && parent.children[position] == node.slot,
                "descent frame for slot {} does not match child {} of slot {}",
                node.slot,
                position,
                parent.slot
            );

            // Borrow from the left sibling: rotate right through the parent.
            if position > 0 {
                let left_slot = parent.child(position - 1)?;
                let mut left = self.load_node(left_slot)?;
                if left.len() > Self::MIN_KEYS {
                    let moved = left.pop_entry()?;
                    let separator = std::mem::replace(&mut parent.entries[position - 1], moved);
                    node.entries.insert(0, separator);
                    if !node.is_leaf {
                        node.children.insert(0, left.pop_child()?);
                    }
                    self.store_node(&left)?;
                    self.store_node(&parent)?;
                    self.store_node(&node)?;
                    trace!(node = node.slot, from = left_slot, "borrowed from left sibling");
                    return Ok(());
                }
            }

            // Borrow from the right sibling: rotate left.
            if position < parent.len() {
                let right_slot = parent.child(position + 1)?;
                let mut right = self.load_node(right_slot)?;
                if right.len() > Self::MIN_KEYS {
                    let moved = right.take_first_entry()?;
                    let separator = std::mem::replace(&mut parent.entries[position], moved);
                    node.entries.push(separator);
                    if !node.is_leaf {
                        node.children.push(right.take_first_child()?);
                    }
                    self.store_node(&right)?;
                    self.store_node(&parent)?;
                    self.store_node(&node)?;
                    trace!(node = node.slot, from = right_slot, "borrowed from right sibling");
                    return Ok(());
                }
            }

            // Merge into the left sibling.
            if position > 0 {
                let left_slot = parent.child(position - 1)?;
                let mut left = self.load_node(left_slot)?;
                left.entries.push(parent.entries.remove(position - 1));
                left.entries.append(&mut node.entries);
                if !left.is_leaf {
                    left.children.append(&mut node.children);
                }
                parent.children.remove(position);
                self.store_node(&left)?;
                self.store_node(&parent)?;
                trace!(survivor = left_slot, dead = node.slot, "merged into left sibling");

                if Some(parent.slot) == self.pager.root() && parent.is_empty() {
                    self.pager.set_root(Some(left_slot));
                    debug!(root = left_slot, "tree lost a level");
                    return Ok(());
                }
                node = parent;
                continue;
            }

            // Merge the right sibling into this node.
            let right_slot = parent.child(position + 1)?;
            let mut right = self.load_node(right_slot)?;
            node.entries.push(parent.entries.remove(position));
            node.entries.append(&mut right.entries);
            if !node.is_leaf {
                node.children.append(&mut right.children);
            }
            parent.children.remove(position + 1);
            self.store_node(&node)?;
            self.store_node(&parent)?;
            trace!(survivor = node.slot, dead = right_slot, "merged right sibling");

            if Some(parent.slot) == self.pager.root() && parent.is_empty() {
                self.pager.set_root(Some(node.slot));
                debug!(root = node.slot, "tree lost a level");
                return Ok(());
            }
            node = parent;
        }
    }

    /// Walks the whole tree and checks the structural invariants: entry
    /// counts within bounds, keys strictly increasing, every key inside
    /// the separator interval above it, child counts consistent, and all
    /// leaves at one depth. Fails with a diagnostic naming the offending
    /// slot.
    pub fn validate(&self) -> Result<()> {
        let Some(root) = self.pager.root() else {
            return Ok(());
        };
        let mut leaf_depth = None;
        self.check_subtree(root, 0, None, None, &mut leaf_depth)
    }

    fn check_subtree(
        &self,
        slot: u64,
        depth: usize,
        lower: Option<&KC::Item>,
        upper: Option<&KC::Item>,
        leaf_depth: &mut Option<usize>,
    ) -> Result<()> {
        ensure!(
            slot < self.pager.node_count(),
            "slot {} out of bounds (node_count={})",
            slot,
            self.pager.node_count()
        );
        let node = self.load_node(slot)?;
        let is_root = Some(slot) == self.pager.root();

        ensure!(
            node.len() <= Self::MAX_KEYS,
            "slot {}: {} entries over the maximum {}",
            slot,
            node.len(),
            Self::MAX_KEYS
        );
        if is_root {
            if !node.is_leaf {
                ensure!(!node.is_empty(), "slot {}: internal root has no separators", slot);
            }
        } else {
            ensure!(
                node.len() >= Self::MIN_KEYS,
                "slot {}: {} entries under the minimum {}",
                slot,
                node.len(),
                Self::MIN_KEYS
            );
        }

        for pair in node.entries.windows(2) {
            ensure!(
                self.cmp.lt(&pair[0].key, &pair[1].key),
                "slot {}: keys out of order",
                slot
            );
        }
        if let (Some(lower), Some(first)) = (lower, node.entries.first()) {
            ensure!(
                self.cmp.lt(lower, &first.key),
                "slot {}: first key not above the separator on its left",
                slot
            );
        }
        if let (Some(upper), Some(last)) = (upper, node.entries.last()) {
            ensure!(
                self.cmp.lt(&last.key, upper),
                "slot {}: last key not below the separator on its right",
                slot
            );
        }

        if node.is_leaf {
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) => ensure!(
                    depth == expected,
                    "slot {}: leaf at depth {}, others at {}",
                    slot,
                    depth,
                    expected
                ),
            }
            return Ok(());
        }

        ensure!(
            node.children.len() == node.len() + 1,
            "slot {}: {} children for {} separators",
            slot,
            node.children.len(),
            node.len()
        );
        for i in 0..node.children.len() {
            let child_lower = if i == 0 { lower } else { Some(&node.entries[i - 1].key) };
            let child_upper = if i == node.len() { upper } else { Some(&node.entries[i].key) };
            self.check_subtree(node.children[i], depth + 1, child_lower, child_upper, leaf_depth)?;
        }
        Ok(())
    }

    /// Renders the tree one node per line, indented by depth. Debugging
    /// aid; the output format is not stable.
    pub fn dump(&self, out: &mut dyn io::Write) -> Result<()>
    where
        KC::Item: fmt::Debug,
        VC::Item: fmt::Debug,
    {
        match self.pager.root() {
            None => writeln!(out, "<empty>").wrap_err("failed to write dump")?,
            Some(root) => self.dump_node(out, root, 0)?,
        }
        Ok(())
    }

    fn dump_node(&self, out: &mut dyn io::Write, slot: u64, level: usize) -> Result<()>
    where
        KC::Item: fmt::Debug,
        VC::Item: fmt::Debug,
    {
        let node = self.load_node(slot)?;
        let kind = if node.is_leaf { "leaf" } else { "internal" };
        write!(out, "{}{} slot={}:", "    ".repeat(level), kind, slot)
            .wrap_err("failed to write dump")?;
        for entry in &node.entries {
            write!(out, " ({:?}: {:?})", entry.key, entry.value).wrap_err("failed to write dump")?;
        }
        writeln!(out).wrap_err("failed to write dump")?;
        if !node.is_leaf {
            for &child in &node.children {
                self.dump_node(out, child, level + 1)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FixedIntCodec, NaturalOrder, StringCodec};
    use tempfile::tempdir;

    type TestIndex = BTreeIndex<FixedIntCodec<i32>, StringCodec>;

    fn open_index(dir: &tempfile::TempDir) -> TestIndex {
        TestIndex::open(dir.path().join("idx")).unwrap()
    }

    fn insert_all(index: &mut TestIndex, keys: &[i32]) {
        for &key in keys {
            assert!(index.insert(key, format!("v{key}")).unwrap());
            index.validate().unwrap();
        }
    }

    fn keys_of(node: &Node<i32, String>) -> Vec<i32> {
        node.entries.iter().map(|e| e.key).collect()
    }

    #[test]
    fn fresh_index_is_empty() {
        let dir = tempdir().unwrap();
        let index = open_index(&dir);

        assert!(index.is_empty().unwrap());
        assert_eq!(index.at(&1).unwrap(), None);
        index.validate().unwrap();
    }

    #[test]
    fn insert_and_lookup_single_entry() {
        let dir = tempdir().unwrap();
        let mut index = open_index(&dir);

        assert!(index.insert(7, "seven".into()).unwrap());
        assert_eq!(index.at(&7).unwrap(), Some("seven".into()));
        assert_eq!(index.at(&8).unwrap(), None);
        assert!(!index.is_empty().unwrap());
    }

    #[test]
    fn duplicate_insert_keeps_first_value() {
        let dir = tempdir().unwrap();
        let mut index = open_index(&dir);

        assert!(index.insert(1, "first".into()).unwrap());
        assert!(!index.insert(1, "second".into()).unwrap());
        assert_eq!(index.at(&1).unwrap(), Some("first".into()));
    }

    #[test]
    fn update_overwrites_only_existing_keys() {
        let dir = tempdir().unwrap();
        let mut index = open_index(&dir);

        assert!(!index.update(&3, "x".into()).unwrap());
        index.insert(3, "old".into()).unwrap();
        assert!(index.update(&3, "new".into()).unwrap());
        assert_eq!(index.at(&3).unwrap(), Some("new".into()));
    }

    #[test]
    fn first_split_promotes_upper_median() {
        let dir = tempdir().unwrap();
        let mut index = open_index(&dir);

        // ORDER = 2: the fourth insert overflows the root leaf.
        insert_all(&mut index, &[10, 20, 30, 40]);

        let root_slot = index.pager.root().unwrap();
        let root = index.load_node(root_slot).unwrap();
        assert!(!root.is_leaf);
        assert_eq!(keys_of(&root), vec![30]);

        let left = index.load_node(root.children[0]).unwrap();
        let right = index.load_node(root.children[1]).unwrap();
        assert_eq!(keys_of(&left), vec![10, 20]);
        assert_eq!(keys_of(&right), vec![40]);

        for key in [10, 20, 30, 40] {
            assert_eq!(index.at(&key).unwrap(), Some(format!("v{key}")));
        }
    }

    #[test]
    fn sequential_inserts_build_expected_shape() {
        let dir = tempdir().unwrap();
        let mut index = open_index(&dir);

        insert_all(&mut index, &[1, 2, 3, 4, 5, 6, 7]);

        let root = index.load_node(index.pager.root().unwrap()).unwrap();
        assert_eq!(keys_of(&root), vec![3, 6]);
        assert_eq!(root.children.len(), 3);
        for key in 1..=7 {
            assert_eq!(index.at(&key).unwrap(), Some(format!("v{key}")));
        }
    }

    #[test]
    fn erase_from_leaf_without_underflow() {
        let dir = tempdir().unwrap();
        let mut index = open_index(&dir);

        insert_all(&mut index, &[1, 2, 3]);
        assert!(index.erase(&2).unwrap());
        assert!(!index.erase(&2).unwrap());

        assert_eq!(index.at(&2).unwrap(), None);
        assert_eq!(index.at(&1).unwrap(), Some("v1".into()));
        assert_eq!(index.at(&3).unwrap(), Some("v3".into()));
        index.validate().unwrap();
    }

    #[test]
    fn erase_borrows_from_right_sibling() {
        let dir = tempdir().unwrap();
        let mut index = open_index(&dir);

        // Shape: root [3, 6] over leaves [1, 2], [4, 5], [7].
        insert_all(&mut index, &[1, 2, 3, 4, 5, 6, 7]);

        index.erase(&1).unwrap();
        index.erase(&2).unwrap();
        index.validate().unwrap();

        for key in 3..=7 {
            assert_eq!(index.at(&key).unwrap(), Some(format!("v{key}")), "key {key}");
        }
        assert_eq!(index.at(&1).unwrap(), None);
        assert_eq!(index.at(&2).unwrap(), None);
    }

    #[test]
    fn erase_cascade_merges_and_collapses_height() {
        let dir = tempdir().unwrap();
        let mut index = open_index(&dir);

        insert_all(&mut index, &[1, 2, 3, 4, 5, 6, 7]);
        for key in [1, 2, 3, 4] {
            assert!(index.erase(&key).unwrap(), "erase {key}");
            index.validate().unwrap();
        }

        for key in [5, 6, 7] {
            assert_eq!(index.at(&key).unwrap(), Some(format!("v{key}")));
        }

        // Two more erases leave a lone root leaf again.
        index.erase(&5).unwrap();
        index.validate().unwrap();
        index.erase(&6).unwrap();
        index.validate().unwrap();

        let root = index.load_node(index.pager.root().unwrap()).unwrap();
        assert!(root.is_leaf);
        assert_eq!(keys_of(&root), vec![7]);
    }

    #[test]
    fn erase_separator_uses_predecessor() {
        let dir = tempdir().unwrap();
        let mut index = open_index(&dir);

        // Root [3, 6]; the left child of 3 holds [1, 2] and can spare one.
        insert_all(&mut index, &[1, 2, 3, 4, 5, 6, 7]);

        assert!(index.erase(&3).unwrap());
        index.validate().unwrap();

        let root = index.load_node(index.pager.root().unwrap()).unwrap();
        assert_eq!(keys_of(&root), vec![2, 6]);
        assert_eq!(index.at(&3).unwrap(), None);
        for key in [1, 2, 4, 5, 6, 7] {
            assert_eq!(index.at(&key).unwrap(), Some(format!("v{key}")));
        }
    }

    #[test]
    fn erase_separator_merges_minimal_children() {
        let dir = tempdir().unwrap();
        let mut index = open_index(&dir);

        // Root [3, 6] over [1, 2], [4, 5], [7]; erase down to minimal
        // children around 6, then erase 6 itself.
        insert_all(&mut index, &[1, 2, 3, 4, 5, 6, 7]);
        index.erase(&4).unwrap();

        assert!(index.erase(&6).unwrap());
        index.validate().unwrap();

        assert_eq!(index.at(&6).unwrap(), None);
        for key in [1, 2, 3, 5, 7] {
            assert_eq!(index.at(&key).unwrap(), Some(format!("v{key}")));
        }
    }

    #[test]
    fn erasing_every_key_empties_the_tree() {
        let dir = tempdir().unwrap();
        let mut index = open_index(&dir);

        insert_all(&mut index, &[4, 1, 7, 3, 9, 2, 8, 5, 6]);
        for key in 1..=9 {
            assert!(index.erase(&key).unwrap(), "erase {key}");
            index.validate().unwrap();
        }

        assert!(index.is_empty().unwrap());
        assert_eq!(index.pager.root(), None);
    }

    #[test]
    fn insert_after_emptying_restarts_the_tree() {
        let dir = tempdir().unwrap();
        let mut index = open_index(&dir);

        insert_all(&mut index, &[1, 2]);
        index.erase(&1).unwrap();
        index.erase(&2).unwrap();
        assert!(index.is_empty().unwrap());

        assert!(index.insert(42, "back".into()).unwrap());
        assert_eq!(index.at(&42).unwrap(), Some("back".into()));
        index.validate().unwrap();
    }

    #[test]
    fn deep_tree_stays_valid_under_churn() {
        let dir = tempdir().unwrap();
        let mut index = open_index(&dir);

        for key in 0..100 {
            index.insert(key, format!("v{key}")).unwrap();
        }
        index.validate().unwrap();

        for key in (0..100).step_by(3) {
            assert!(index.erase(&key).unwrap());
        }
        index.validate().unwrap();

        for key in 0..100 {
            let expected = if key % 3 == 0 { None } else { Some(format!("v{key}")) };
            assert_eq!(index.at(&key).unwrap(), expected, "key {key}");
        }
    }

    #[test]
    fn dump_renders_every_node() {
        let dir = tempdir().unwrap();
        let mut index = open_index(&dir);
        insert_all(&mut index, &[1, 2, 3, 4]);

        let mut out = Vec::new();
        index.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("internal"));
        assert!(text.lines().count() >= 3);

        let mut empty = Vec::new();
        let empty_index = TestIndex::open(dir.path().join("other")).unwrap();
        empty_index.dump(&mut empty).unwrap();
        assert_eq!(String::from_utf8(empty).unwrap(), "<empty>\n");
    }

    #[test]
    fn larger_branching_factor_keeps_the_tree_flat() {
        let dir = tempdir().unwrap();
        let mut index: BTreeIndex<FixedIntCodec<i32>, StringCodec, NaturalOrder, 8> =
            BTreeIndex::open(dir.path().join("wide")).unwrap();

        for key in 0..15 {
            index.insert(key, format!("v{key}")).unwrap();
        }
        index.validate().unwrap();

        // MAX_KEYS = 15 at ORDER 8: everything still fits in the root leaf.
        let root = index.load_node(index.pager.root().unwrap()).unwrap();
        assert!(root.is_leaf);
        assert_eq!(root.len(), 15);

        index.insert(15, "v15".into()).unwrap();
        index.validate().unwrap();
        let root = index.load_node(index.pager.root().unwrap()).unwrap();
        assert!(!root.is_leaf);
    }
}
